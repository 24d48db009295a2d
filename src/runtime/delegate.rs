//! Adapted delegates.

use std::{fmt, sync::Arc};

use crate::{
    emit::{InstructionStream, MethodBody},
    metadata::{
        method::{MethodDesc, MethodRc, ParamAttributes},
        signature::{DelegateSignature, SlotAccess},
        typesystem::CilTypeRc,
    },
    runtime::{
        interpreter::Runtime,
        value::{EmValue, ManagedPointer},
    },
    Error, Result,
};

/// A method adapted to a delegate signature.
///
/// Holds the generated body together with its symbolic listing. Invoking the delegate
/// runs the body on a [`Runtime`]; by-reference parameters are read from and written
/// back to the caller's argument slice.
#[derive(Debug, Clone)]
pub struct AdaptedDelegate {
    method: MethodRc,
    signature: DelegateSignature,
    body: Arc<MethodBody>,
    stream: InstructionStream,
}

impl AdaptedDelegate {
    pub(crate) fn new(
        method: &MethodRc,
        signature: &DelegateSignature,
        body: MethodBody,
        stream: InstructionStream,
    ) -> Self {
        AdaptedDelegate {
            method: method.clone(),
            signature: signature.clone(),
            body: Arc::new(body),
            stream,
        }
    }

    /// The adapted method
    #[must_use]
    pub fn method(&self) -> &MethodRc {
        &self.method
    }

    /// The delegate signature
    #[must_use]
    pub fn signature(&self) -> &DelegateSignature {
        &self.signature
    }

    /// The generated body
    #[must_use]
    pub fn body(&self) -> &MethodBody {
        &self.body
    }

    /// Everything emitted for the body, including directives.
    #[must_use]
    pub fn stream(&self) -> &InstructionStream {
        &self.stream
    }

    /// The symbolic listing of the body.
    #[must_use]
    pub fn listing(&self) -> String {
        self.stream.to_string()
    }

    /// Invokes the delegate.
    ///
    /// `args` holds one value per delegate parameter. Values for `ref` and `out`
    /// parameters are updated in place after a successful call.
    ///
    /// # Returns
    ///
    /// The converted return value, or `None` for a `void` signature.
    ///
    /// # Errors
    ///
    /// - [`Error::ArgumentCount`] if `args` does not match the signature
    /// - [`Error::ManagedException`] if the body or the callee throws
    pub fn invoke(&self, runtime: &mut Runtime, args: &mut [EmValue]) -> Result<Option<EmValue>> {
        let params = self.signature.params();
        if args.len() != params.len() {
            return Err(Error::ArgumentCount {
                expected: params.len(),
                found: args.len(),
            });
        }

        let mut cells = Vec::new();
        let mut passed = Vec::with_capacity(args.len());
        for (param, arg) in params.iter().zip(args.iter()) {
            if param.access.is_by_ref() {
                let cell = runtime.push_cell(arg.clone());
                cells.push(cell);
                passed.push(EmValue::ManagedPtr(ManagedPointer::to_cell(cell)));
            } else {
                passed.push(arg.clone());
            }
        }

        let result = runtime.run_body(&self.body, passed);

        if result.is_ok() {
            let by_ref = params
                .iter()
                .zip(args.iter_mut())
                .filter(|(param, _)| param.access.is_by_ref());
            for ((_, arg), cell) in by_ref.zip(&cells) {
                *arg = runtime.cell(*cell)?.clone();
            }
        }
        if let Some(base) = cells.first() {
            runtime.release_cells(*base);
        }

        let value = result?;
        Ok(if self.signature.return_type().is_void() {
            None
        } else {
            value
        })
    }

    /// Wraps the body as a static method named `name` on `declaring`, with the
    /// delegate's parameters and return type. The method can be called from other
    /// bodies or through [`Runtime::call`].
    #[must_use]
    pub fn to_method(&self, name: &str, declaring: &CilTypeRc) -> MethodRc {
        let builder = self
            .signature
            .params()
            .iter()
            .enumerate()
            .fold(
                MethodDesc::builder(name, declaring).static_method(),
                |builder, (index, param)| {
                    let attributes = match param.access {
                        SlotAccess::In => ParamAttributes::IN,
                        SlotAccess::Out => ParamAttributes::OUT,
                        SlotAccess::Default | SlotAccess::Ref => ParamAttributes::empty(),
                    };
                    builder.param_with(&format!("arg{index}"), &param.ty, param.access, attributes)
                },
            );

        builder
            .returns(self.signature.return_type())
            .il(Arc::clone(&self.body))
            .build()
    }
}

impl fmt::Display for AdaptedDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} as {}", self.method, self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adapter::MethodAdapter,
        metadata::{registry::TypeRegistry, signature::SignatureParam, typesystem::CilType},
    };

    #[test]
    fn by_ref_arguments_are_written_back() {
        let registry = TypeRegistry::new();
        let math = CilType::class("Demo", "Math").build();
        let double = MethodDesc::builder("Double", &math)
            .static_method()
            .param_ref("value", &registry.int32())
            .native(|ctx, args| {
                let value = ctx.load(&args[0])?.as_i32()?;
                ctx.store(&args[0], EmValue::I32(value * 2))?;
                Ok(None)
            })
            .build();
        let shape = DelegateSignature::new(
            &registry.void(),
            vec![SignatureParam::by_ref(&registry.int32())],
        );

        let delegate = MethodAdapter::new(&registry).adapt(&double, &shape).unwrap();
        let mut runtime = Runtime::with_registry(registry);
        let mut args = [EmValue::I32(21)];

        assert_eq!(delegate.invoke(&mut runtime, &mut args).unwrap(), None);
        assert_eq!(args[0], EmValue::I32(42));
        assert!(matches!(
            delegate.invoke(&mut runtime, &mut []),
            Err(Error::ArgumentCount { expected: 1, found: 0 })
        ));
    }

    #[test]
    fn wraps_as_callable_method() {
        let registry = TypeRegistry::new();
        let math = CilType::class("Demo", "Math").build();
        let add = MethodDesc::builder("Add", &math)
            .static_method()
            .param("a", &registry.int32())
            .param("b", &registry.int32())
            .returns(&registry.int32())
            .native(|_, args| Ok(Some(EmValue::I32(args[0].as_i32()? + args[1].as_i32()?))))
            .build();
        let shape = DelegateSignature::of_method(&add);

        let delegate = MethodAdapter::new(&registry).adapt(&add, &shape).unwrap();
        let wrapper = delegate.to_method("AddThunk", &math);
        assert!(wrapper.is_static());
        assert_eq!(wrapper.params().len(), 2);
        assert_eq!(delegate.to_string(), format!("{add} as {shape}"));

        let mut runtime = Runtime::with_registry(registry);
        assert_eq!(
            runtime
                .call(&wrapper, vec![EmValue::I32(2), EmValue::I32(3)])
                .unwrap(),
            Some(EmValue::I32(5))
        );
    }
}
