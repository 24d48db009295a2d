//! Slots: value positions with an access mode.

use std::fmt;

use crate::{
    emit::LocalBuilder,
    metadata::{
        method::ParamDesc,
        signature::{SignatureParam, SlotAccess},
        typesystem::CilTypeRc,
    },
};

/// Where the value of a slot comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOrigin {
    /// A delegate argument
    Argument(u16),
    /// A local variable
    Local(LocalBuilder),
    /// Already on the evaluation stack
    Stack,
    /// A bare type with no backing value (callee parameters, return shapes)
    Type,
}

/// One value position: an access mode, a value type and where the value comes from.
///
/// When `access` is not [`SlotAccess::Default`] the physical value is an address of
/// `value_type`, never a value of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    access: SlotAccess,
    value_type: CilTypeRc,
    origin: SlotOrigin,
}

impl Slot {
    /// Creates a slot.
    #[must_use]
    pub fn new(access: SlotAccess, value_type: &CilTypeRc, origin: SlotOrigin) -> Self {
        Slot {
            access,
            value_type: value_type.clone(),
            origin,
        }
    }

    /// A delegate argument.
    #[must_use]
    pub fn argument(index: u16, value_type: &CilTypeRc, access: SlotAccess) -> Self {
        Self::new(access, value_type, SlotOrigin::Argument(index))
    }

    /// The delegate argument at `index` described by `param`.
    #[must_use]
    pub fn from_param(index: u16, param: &SignatureParam) -> Self {
        Self::argument(index, &param.ty, param.access)
    }

    /// A callee parameter, as a destination.
    #[must_use]
    pub fn parameter(param: &ParamDesc) -> Self {
        Self::of_type(&param.ty, param.access)
    }

    /// A bare type.
    #[must_use]
    pub fn of_type(value_type: &CilTypeRc, access: SlotAccess) -> Self {
        Self::new(access, value_type, SlotOrigin::Type)
    }

    /// A value already on the evaluation stack.
    #[must_use]
    pub fn on_stack(value_type: &CilTypeRc, access: SlotAccess) -> Self {
        Self::new(access, value_type, SlotOrigin::Stack)
    }

    /// A local variable.
    #[must_use]
    pub fn local(local: &LocalBuilder, access: SlotAccess) -> Self {
        Self::new(access, local.local_type(), SlotOrigin::Local(local.clone()))
    }

    /// The receiver of a method declared on `declaring`, as a destination.
    ///
    /// Value-type receivers are passed by reference so that mutating calls are visible.
    #[must_use]
    pub fn receiver(declaring: &CilTypeRc) -> Self {
        let access = if declaring.is_value_type() {
            SlotAccess::Ref
        } else {
            SlotAccess::Default
        };
        Self::of_type(declaring, access)
    }

    /// Access mode
    #[must_use]
    pub fn access(&self) -> SlotAccess {
        self.access
    }

    /// The type once the reference wrapper is stripped.
    #[must_use]
    pub fn value_type(&self) -> &CilTypeRc {
        &self.value_type
    }

    /// Where the value comes from.
    #[must_use]
    pub fn origin(&self) -> &SlotOrigin {
        &self.origin
    }

    /// `true` if the slot is backed by a value: a bound argument, a local or a value
    /// already on the evaluation stack. `false` for a bare type, which only describes
    /// a destination.
    #[must_use]
    pub fn is_on_stack(&self) -> bool {
        self.origin != SlotOrigin::Type
    }

    /// `true` if the value has already been pushed onto the evaluation stack.
    #[must_use]
    pub fn is_pushed(&self) -> bool {
        self.origin == SlotOrigin::Stack
    }

    /// `true` for `ref`, `in` and `out` slots.
    #[must_use]
    pub fn is_by_ref(&self) -> bool {
        self.access.is_by_ref()
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.access.keyword(), self.value_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{registry::TypeRegistry, typesystem::CilType};

    #[test]
    fn constructors() {
        let registry = TypeRegistry::new();
        let param = SignatureParam::by_ref(&registry.int32());

        let slot = Slot::from_param(2, &param);
        assert_eq!(slot.origin(), &SlotOrigin::Argument(2));
        assert!(slot.is_by_ref());
        assert!(slot.is_on_stack());
        assert!(!slot.is_pushed());
        assert_eq!(slot.to_string(), "ref System.Int32");

        let stacked = Slot::on_stack(&registry.string(), SlotAccess::Default);
        assert!(stacked.is_on_stack());
        assert!(stacked.is_pushed());

        let bare = Slot::of_type(&registry.int32(), SlotAccess::Default);
        assert!(!bare.is_on_stack());
        assert!(!bare.is_pushed());
        assert_eq!(stacked.to_string(), "System.String");
    }

    #[test]
    fn receivers() {
        let registry = TypeRegistry::new();
        let counter = CilType::value_type("Demo", "Counter").build();

        assert_eq!(Slot::receiver(&counter).access(), SlotAccess::Ref);
        assert_eq!(Slot::receiver(&registry.string()).access(), SlotAccess::Default);
        assert_eq!(Slot::receiver(&counter).origin(), &SlotOrigin::Type);
    }
}
