//! Adapting methods to delegate signatures.
//!
//! An adaptation builds one body that takes the delegate's parameters, supplies the
//! callee's receiver and arguments from them, calls the callee and converts its result
//! to the delegate's return type. The steps are:
//!
//! 1. Instance loading. An instance method takes its receiver from the first delegate
//!    parameter, by reference when the declaring type is a value type. A static method
//!    whose first delegate parameter has a sentinel type may skip that parameter.
//! 2. Argument binding. At each candidate parameter offset, each [`BindingStrategy`]
//!    that fits is attempted under an emitter checkpoint; a failed attempt is rolled back
//!    before the next one.
//! 3. The call, with `callvirt` only for virtual methods on reference types.
//! 4. Return conversion through the planner, then `ret`.

use log::{debug, trace, warn};

use crate::{
    adapter::{
        config::{AdapterConfig, BindingStrategy},
        slot::Slot,
    },
    emit::Emitter,
    metadata::{
        method::{MethodDesc, MethodRc},
        registry::TypeRegistry,
        signature::{DelegateSignature, SlotAccess},
    },
    runtime::AdaptedDelegate,
    Error, Result,
};

/// Builds [`AdaptedDelegate`]s for (method, signature) pairs.
///
/// Each call to [`MethodAdapter::adapt`] is an independent session with its own emitter;
/// the adapter itself holds no mutable state and can be shared between threads.
///
/// ```rust
/// use dotreflect::prelude::*;
///
/// let registry = TypeRegistry::new();
/// let math = CilType::class("Demo", "Math").extends(&registry.object()).build();
/// let negate = MethodDesc::builder("Negate", &math)
///     .static_method()
///     .param("value", &registry.int32())
///     .returns(&registry.int32())
///     .native(|_, args| Ok(Some(EmValue::I32(-args[0].as_i32()?))))
///     .build();
///
/// // the leading object parameter is skipped for static methods
/// let shape = DelegateSignature::new(
///     &registry.object(),
///     vec![SignatureParam::value(&registry.object()), SignatureParam::value(&registry.int32())],
/// );
/// let delegate = MethodAdapter::new(&registry).adapt(&negate, &shape)?;
///
/// let mut runtime = Runtime::new();
/// let result = delegate.invoke(&mut runtime, &mut [EmValue::Null, EmValue::I32(4)])?;
/// assert_eq!(runtime.render(&result.unwrap_or(EmValue::Null)), "-4");
/// # Ok::<(), dotreflect::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct MethodAdapter<'r> {
    registry: &'r TypeRegistry,
    config: AdapterConfig,
}

impl<'r> MethodAdapter<'r> {
    /// Creates an adapter with the default configuration.
    #[must_use]
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self::with_config(registry, AdapterConfig::default())
    }

    /// Creates an adapter with `config`.
    #[must_use]
    pub fn with_config(registry: &'r TypeRegistry, config: AdapterConfig) -> Self {
        MethodAdapter { registry, config }
    }

    /// The adapter configuration
    #[must_use]
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Adapts `method` to `signature`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdaptationFailed`] wrapping the cause: a conversion error from the
    /// planner, [`Error::MissingInstance`], [`Error::ArityMismatch`], or an emitter error.
    pub fn adapt(&self, method: &MethodRc, signature: &DelegateSignature) -> Result<AdaptedDelegate> {
        self.build(method, signature).map_err(|error| {
            warn!("Cannot adapt '{}' to {}: {}", method, signature, error);
            Error::AdaptationFailed {
                method: method.to_string(),
                signature: signature.to_string(),
                source: Box::new(error),
            }
        })
    }

    fn build(&self, method: &MethodRc, signature: &DelegateSignature) -> Result<AdaptedDelegate> {
        let mut emitter = Emitter::new(self.registry);

        let offsets = self.load_instance(&mut emitter, method, signature)?;
        self.bind_arguments(&mut emitter, method, signature, &offsets)?;
        emitter.call_method(method)?;

        let returned = Slot::on_stack(method.return_type(), SlotAccess::Default);
        let expected = Slot::of_type(signature.return_type(), SlotAccess::Default);
        emitter.load_as(&returned, &expected)?;
        emitter.ret(!signature.return_type().is_void())?;

        let (body, stream) = emitter.finalize()?;
        debug!("Adapted '{}' to {} in {} bytes", method, signature, body.bytecode().len());
        Ok(AdaptedDelegate::new(method, signature, body, stream))
    }

    /// Loads the receiver if there is one and returns the candidate offsets of the first
    /// argument parameter.
    fn load_instance(
        &self,
        emitter: &mut Emitter<'_>,
        method: &MethodDesc,
        signature: &DelegateSignature,
    ) -> Result<Vec<usize>> {
        let first = signature.params().first();

        if method.is_static() {
            return Ok(match first {
                Some(param) if self.config.is_sentinel(&param.ty) => vec![0, 1],
                _ => vec![0],
            });
        }

        let Some(receiver) = first else {
            return Err(Error::MissingInstance {
                method: method.full_name(),
            });
        };
        emitter.load_instance_for_member(&Slot::from_param(0, receiver), method)?;
        Ok(vec![1])
    }

    fn bind_arguments(
        &self,
        emitter: &mut Emitter<'_>,
        method: &MethodDesc,
        signature: &DelegateSignature,
        offsets: &[usize],
    ) -> Result<()> {
        let mut last_error = None;

        for &offset in offsets {
            for strategy in self.config.binding_order.strategies() {
                if !Self::fits(strategy, method, signature, offset) {
                    continue;
                }

                let checkpoint = emitter.checkpoint();
                let attempt = match strategy {
                    BindingStrategy::Positional => {
                        Self::bind_positional(emitter, method, signature, offset)
                    }
                    BindingStrategy::Params => Self::bind_params(emitter, method, offset),
                };

                match attempt {
                    Ok(()) => {
                        debug!("Bound '{}' with {} binding at offset {}", method, strategy, offset);
                        return Ok(());
                    }
                    Err(error) => {
                        debug!(
                            "{} binding of '{}' at offset {} failed: {}",
                            strategy, method, offset, error
                        );
                        trace!("Rolling back:\n{}", emitter.stream());
                        emitter.rollback(&checkpoint)?;
                        last_error = Some(error);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::ArityMismatch {
            method: method.full_name(),
            expected: method.params().len(),
            available: signature
                .arity()
                .saturating_sub(offsets.first().copied().unwrap_or_default()),
        }))
    }

    fn fits(
        strategy: BindingStrategy,
        method: &MethodDesc,
        signature: &DelegateSignature,
        offset: usize,
    ) -> bool {
        let remaining = signature.params().get(offset..).unwrap_or_default();
        match strategy {
            BindingStrategy::Positional => remaining.len() == method.params().len(),
            BindingStrategy::Params => match remaining {
                [array] => {
                    array.access == SlotAccess::Default
                        && array.ty.is_sz_array()
                        && array.ty.element_type().is_some_and(|element| element.is_object())
                }
                _ => false,
            },
        }
    }

    fn bind_positional(
        emitter: &mut Emitter<'_>,
        method: &MethodDesc,
        signature: &DelegateSignature,
        offset: usize,
    ) -> Result<()> {
        for (position, param) in method.params().iter().enumerate() {
            let index = offset + position;
            let Some(source) = signature.params().get(index) else {
                return Err(out_of_bounds_error!());
            };
            let index = u16::try_from(index)
                .map_err(|_| malformed_error!("Argument index {} out of range", index))?;

            emitter.load_as(&Slot::from_param(index, source), &Slot::parameter(param))?;
        }
        Ok(())
    }

    fn bind_params(emitter: &mut Emitter<'_>, method: &MethodDesc, offset: usize) -> Result<()> {
        let array_arg = u16::try_from(offset)
            .map_err(|_| malformed_error!("Argument index {} out of range", offset))?;

        emitter.check_params_length(array_arg, method.params().len())?;
        for (position, param) in method.params().iter().enumerate() {
            emitter.load_params_element(array_arg, position, &Slot::parameter(param))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapter::config::BindingOrder,
        metadata::{signature::SignatureParam, typesystem::CilType},
    };

    fn ops(delegate: &AdaptedDelegate) -> Vec<String> {
        delegate
            .stream()
            .iter()
            .filter(|entry| entry.instruction().is_op())
            .filter_map(|entry| {
                let line = entry.to_string();
                line.split_once(": ").map(|(_, op)| op.to_string())
            })
            .collect()
    }

    #[test]
    fn static_positional() -> Result<()> {
        let registry = TypeRegistry::new();
        let math = CilType::class("Demo", "Math").build();
        let add = MethodDesc::builder("Add", &math)
            .static_method()
            .param("a", &registry.int32())
            .param("b", &registry.int32())
            .returns(&registry.int32())
            .build();
        let shape = DelegateSignature::new(
            &registry.int32(),
            vec![SignatureParam::value(&registry.int32()); 2],
        );

        let delegate = MethodAdapter::new(&registry).adapt(&add, &shape)?;
        assert_eq!(ops(&delegate), vec![
                "ldarg.0",
                "ldarg.1",
                "call System.Int32 Demo.Math::Add(System.Int32, System.Int32)",
                "ret"
            ]);
        Ok(())
    }

    #[test]
    fn sentinel_is_skipped() -> Result<()> {
        let registry = TypeRegistry::new();
        let math = CilType::class("Demo", "Math").build();
        let negate = MethodDesc::builder("Negate", &math)
            .static_method()
            .param("value", &registry.int32())
            .returns(&registry.int32())
            .build();
        let shape = DelegateSignature::new(
            &registry.int32(),
            vec![
                SignatureParam::value(&registry.object()),
                SignatureParam::value(&registry.int32()),
            ],
        );

        let delegate = MethodAdapter::new(&registry).adapt(&negate, &shape)?;
        assert_eq!(ops(&delegate)[0], "ldarg.1");
        Ok(())
    }

    #[test]
    fn non_sentinel_leading_parameter_is_an_arity_mismatch() {
        let registry = TypeRegistry::new();
        let math = CilType::class("Demo", "Math").build();
        let negate = MethodDesc::builder("Negate", &math)
            .static_method()
            .param("value", &registry.int32())
            .build();
        let shape = DelegateSignature::new(
            &registry.void(),
            vec![SignatureParam::value(&registry.string()), SignatureParam::value(&registry.int32())],
        );

        let err = MethodAdapter::new(&registry).adapt(&negate, &shape).unwrap_err();
        assert!(matches!(
            err.root_cause(),
            Error::ArityMismatch {
                expected: 1,
                available: 2,
                ..
            }
        ));
    }

    #[test]
    fn instance_method_needs_a_receiver() {
        let registry = TypeRegistry::new();
        let widget = CilType::class("Demo", "Widget").build();
        let draw = MethodDesc::builder("Draw", &widget).build();
        let shape = DelegateSignature::new(&registry.void(), Vec::new());

        let err = MethodAdapter::new(&registry).adapt(&draw, &shape).unwrap_err();
        assert!(matches!(err, Error::AdaptationFailed { .. }));
        assert!(matches!(err.root_cause(), Error::MissingInstance { .. }));
    }

    #[test]
    fn virtual_methods_use_callvirt() -> Result<()> {
        let registry = TypeRegistry::new();
        let widget = CilType::class("Demo", "Widget").extends(&registry.object()).build();
        let draw = MethodDesc::builder("Draw", &widget).virtual_method().build();
        let shape = DelegateSignature::new(&registry.void(), vec![SignatureParam::value(&registry.object())]);

        let delegate = MethodAdapter::new(&registry).adapt(&draw, &shape)?;
        assert_eq!(
            ops(&delegate),
            vec![
                "ldarg.0",
                "castclass Demo.Widget",
                "callvirt System.Void Demo.Widget::Draw()",
                "ret"
            ]
        );
        Ok(())
    }

    #[test]
    fn failed_positional_attempt_is_rolled_back() -> Result<()> {
        let registry = TypeRegistry::new();
        let math = CilType::class("Demo", "Math").build();
        // one object[] parameter: positional binding fails on the first element, params binding succeeds
        let first = MethodDesc::builder("First", &math)
            .static_method()
            .param("value", &registry.date_time())
            .build();
        let shape = DelegateSignature::new(
            &registry.void(),
            vec![SignatureParam::value(&registry.object_array())],
        );

        let delegate = MethodAdapter::new(&registry).adapt(&first, &shape)?;
        let listing = ops(&delegate);
        assert_eq!(listing[0], "ldarg.0");
        assert_eq!(listing[1], "ldlen");
        assert!(listing.contains(&"unbox.any System.DateTime".to_string()));
        Ok(())
    }

    #[test]
    fn params_first_order() -> Result<()> {
        let registry = TypeRegistry::new();
        let math = CilType::class("Demo", "Math").build();
        let take = MethodDesc::builder("Take", &math)
            .static_method()
            .param("values", &registry.object_array())
            .build();
        let shape = DelegateSignature::new(
            &registry.void(),
            vec![SignatureParam::value(&registry.object_array())],
        );

        let positional = MethodAdapter::new(&registry).adapt(&take, &shape)?;
        assert_eq!(ops(&positional), vec!["ldarg.0", "call System.Void Demo.Math::Take(System.Object[])", "ret"]);

        let config = AdapterConfig::default().with_binding_order(BindingOrder::ParamsFirst);
        let params = MethodAdapter::with_config(&registry, config).adapt(&take, &shape)?;
        assert!(ops(&params).contains(&"ldelem.ref".to_string()));
        Ok(())
    }

    #[test]
    fn void_callee_fabricates_result() -> Result<()> {
        let registry = TypeRegistry::new();
        let log = CilType::class("Demo", "Log").build();
        let flush = MethodDesc::builder("Flush", &log).static_method().build();
        let shape = DelegateSignature::new(&registry.int32(), Vec::new());

        let delegate = MethodAdapter::new(&registry).adapt(&flush, &shape)?;
        assert_eq!(ops(&delegate), vec!["call System.Void Demo.Log::Flush()", "ldc.i4.0", "ret"]);
        Ok(())
    }
}
