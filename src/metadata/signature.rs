//! Delegate signatures.
//!
//! A [`DelegateSignature`] is the target shape of an adaptation: a return type and an
//! ordered list of parameters, each with an access mode. Equality and hashing are
//! structural so signatures double as cache keys.

use std::fmt;

use crate::metadata::{
    method::MethodDesc,
    typesystem::CilTypeRc,
};

/// How a value is passed.
///
/// `Ref`, `In` and `Out` all pass an address; they differ only in the read/write
/// discipline the callee promises, never in the instructions needed to produce them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SlotAccess {
    /// By value
    #[default]
    Default,
    /// `ref`
    Ref,
    /// `in` (read-only reference)
    In,
    /// `out` (write-only reference)
    Out,
}

impl SlotAccess {
    /// `true` for `ref`, `in` and `out`.
    #[must_use]
    pub fn is_by_ref(self) -> bool {
        self != SlotAccess::Default
    }

    /// The C# keyword prefix used in listings and messages, including a trailing space.
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            SlotAccess::Default => "",
            SlotAccess::Ref => "ref ",
            SlotAccess::In => "in ",
            SlotAccess::Out => "out ",
        }
    }
}

/// One parameter of a delegate signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureParam {
    /// Parameter type, without the by-reference wrapper
    pub ty: CilTypeRc,
    /// Access mode
    pub access: SlotAccess,
}

impl SignatureParam {
    /// A parameter with an explicit access mode.
    #[must_use]
    pub fn new(ty: &CilTypeRc, access: SlotAccess) -> Self {
        SignatureParam {
            ty: ty.clone(),
            access,
        }
    }

    /// A by-value parameter.
    #[must_use]
    pub fn value(ty: &CilTypeRc) -> Self {
        Self::new(ty, SlotAccess::Default)
    }

    /// A `ref` parameter.
    #[must_use]
    pub fn by_ref(ty: &CilTypeRc) -> Self {
        Self::new(ty, SlotAccess::Ref)
    }
}

impl fmt::Display for SignatureParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.access.keyword(), self.ty)
    }
}

/// The shape of a delegate: return type and ordered parameters.
///
/// ```rust
/// use dotreflect::prelude::*;
///
/// let registry = TypeRegistry::new();
/// let shape = DelegateSignature::new(
///     &registry.object(),
///     vec![SignatureParam::value(&registry.object()), SignatureParam::value(&registry.object_array())],
/// );
/// assert_eq!(shape.to_string(), "(System.Object, System.Object[])->System.Object");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DelegateSignature {
    return_type: CilTypeRc,
    params: Vec<SignatureParam>,
}

impl DelegateSignature {
    /// Creates a signature.
    #[must_use]
    pub fn new(return_type: &CilTypeRc, params: Vec<SignatureParam>) -> Self {
        DelegateSignature {
            return_type: return_type.clone(),
            params,
        }
    }

    /// The natural delegate shape of `method`.
    ///
    /// Instance methods get a leading receiver parameter, passed by reference when the
    /// declaring type is a value type.
    #[must_use]
    pub fn of_method(method: &MethodDesc) -> Self {
        let mut params = Vec::with_capacity(method.stack_arg_count());
        if !method.is_static() {
            let declaring = method.declaring_type();
            params.push(if declaring.is_value_type() {
                SignatureParam::by_ref(declaring)
            } else {
                SignatureParam::value(declaring)
            });
        }
        params.extend(
            method
                .params()
                .iter()
                .map(|param| SignatureParam::new(&param.ty, param.access)),
        );

        DelegateSignature {
            return_type: method.return_type().clone(),
            params,
        }
    }

    /// Return type
    #[must_use]
    pub fn return_type(&self) -> &CilTypeRc {
        &self.return_type
    }

    /// Parameters in order
    #[must_use]
    pub fn params(&self) -> &[SignatureParam] {
        &self.params
    }

    /// Number of parameters
    #[must_use]
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for DelegateSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, ")->{}", self.return_type)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::metadata::{registry::TypeRegistry, typesystem::CilType};

    #[test]
    fn structural_equality() {
        let registry = TypeRegistry::new();
        let a = DelegateSignature::new(&registry.int32(), vec![SignatureParam::value(&registry.int32())]);
        let b = DelegateSignature::new(
            &TypeRegistry::new().int32(),
            vec![SignatureParam::value(&TypeRegistry::new().int32())],
        );
        let c = DelegateSignature::new(&registry.int32(), vec![SignatureParam::by_ref(&registry.int32())]);

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn of_method_adds_receiver() {
        let registry = TypeRegistry::new();
        let counter = CilType::value_type("Demo", "Counter")
            .extends(&registry.value_type())
            .field("Value", &registry.int32())
            .build();
        let increment = MethodDesc::builder("Increment", &counter).build();

        let shape = DelegateSignature::of_method(&increment);
        assert_eq!(shape.arity(), 1);
        assert_eq!(shape.params()[0].access, SlotAccess::Ref);
        assert_eq!(shape.to_string(), "(ref Demo.Counter)->System.Void");

        let widget = CilType::class("Demo", "Widget").build();
        let resize = MethodDesc::builder("Resize", &widget)
            .param_out("width", &registry.int32())
            .returns(&registry.boolean())
            .build();
        assert_eq!(
            DelegateSignature::of_method(&resize).to_string(),
            "(Demo.Widget, out System.Int32)->System.Boolean"
        );
    }

    #[test]
    fn access_keywords() {
        assert!(!SlotAccess::Default.is_by_ref());
        assert!(SlotAccess::In.is_by_ref());
        assert_eq!(SlotAccess::Out.keyword(), "out ");
        assert_eq!(SlotAccess::default(), SlotAccess::Default);
    }
}
