//! Method descriptors.
//!
//! A [`MethodDesc`] is an already-resolved method: declaring type, attributes, parameters
//! with their access modes, return type and an implementation the runtime can execute.
//! Implementations are either a Rust closure ([`MethodImpl::Native`]) or a CIL body
//! produced by this crate ([`MethodImpl::Il`]).

use std::{fmt, sync::Arc};

use bitflags::bitflags;

use crate::{
    emit::MethodBody,
    metadata::{
        signature::SlotAccess,
        token::{next_method_token, Token},
        typesystem::{CilFlavor, CilType, CilTypeRc},
    },
    runtime::{CallContext, EmValue},
    Result,
};

bitflags! {
    /// Method attributes relevant to binding and call emission.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodAttributes: u16 {
        /// No `this` parameter
        const STATIC = 0x0010;
        /// Final, cannot be overridden
        const FINAL = 0x0020;
        /// Dispatched through the vtable
        const VIRTUAL = 0x0040;
        /// Has no body
        const ABSTRACT = 0x0400;
        /// Name is special (constructors, accessors)
        const SPECIAL_NAME = 0x0800;
    }
}

bitflags! {
    /// Parameter attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ParamAttributes: u16 {
        /// `in` parameter
        const IN = 0x0001;
        /// `out` parameter
        const OUT = 0x0002;
        /// Optional parameter
        const OPTIONAL = 0x0010;
        /// `params T[]` parameter
        const PARAM_ARRAY = 0x1000;
    }
}

/// Signature of a native method implementation.
///
/// `args` holds the receiver first for instance methods. By-reference parameters arrive
/// as [`EmValue::ManagedPtr`] and are read and written through the [`CallContext`].
pub type NativeFn = dyn Fn(&mut CallContext<'_>, &[EmValue]) -> Result<Option<EmValue>> + Send + Sync;

/// What runs when a method is called.
#[derive(Clone)]
pub enum MethodImpl {
    /// A Rust closure
    Native(Arc<NativeFn>),
    /// A CIL body
    Il(Arc<MethodBody>),
    /// No body (abstract or metadata-only)
    None,
}

impl fmt::Debug for MethodImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodImpl::Native(_) => f.write_str("Native"),
            MethodImpl::Il(body) => write!(f, "Il({} bytes)", body.bytecode().len()),
            MethodImpl::None => f.write_str("None"),
        }
    }
}

/// A declared method parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDesc {
    /// Parameter name
    pub name: String,
    /// Parameter type, without the by-reference wrapper
    pub ty: CilTypeRc,
    /// How the parameter is passed
    pub access: SlotAccess,
    /// Attributes
    pub attributes: ParamAttributes,
}

impl ParamDesc {
    /// Returns `true` for a trailing `params T[]` parameter.
    #[must_use]
    pub fn is_param_array(&self) -> bool {
        self.attributes.contains(ParamAttributes::PARAM_ARRAY)
    }
}

/// A resolved method.
pub struct MethodDesc {
    token: Token,
    name: String,
    declaring: CilTypeRc,
    attributes: MethodAttributes,
    params: Vec<ParamDesc>,
    return_type: CilTypeRc,
    implementation: MethodImpl,
}

/// A reference-counted method descriptor.
pub type MethodRc = Arc<MethodDesc>;

impl MethodDesc {
    /// Start describing a method declared on `declaring`.
    ///
    /// The method is an instance method returning `System.Void` until told otherwise.
    #[must_use]
    pub fn builder(name: &str, declaring: &CilTypeRc) -> MethodDescBuilder {
        MethodDescBuilder {
            name: name.to_string(),
            declaring: declaring.clone(),
            attributes: MethodAttributes::empty(),
            params: Vec::new(),
            return_type: None,
            implementation: MethodImpl::None,
        }
    }

    /// Identity token, unique per descriptor.
    #[must_use]
    pub fn token(&self) -> Token {
        self.token
    }

    /// Method name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declaring type.
    #[must_use]
    pub fn declaring_type(&self) -> &CilTypeRc {
        &self.declaring
    }

    /// Attributes
    #[must_use]
    pub fn attributes(&self) -> MethodAttributes {
        self.attributes
    }

    /// `true` if the method has no `this` parameter.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.attributes.contains(MethodAttributes::STATIC)
    }

    /// `true` if the method is dispatched virtually.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.attributes.contains(MethodAttributes::VIRTUAL)
    }

    /// Declared parameters, excluding the receiver.
    #[must_use]
    pub fn params(&self) -> &[ParamDesc] {
        &self.params
    }

    /// Return type (`System.Void` for none).
    #[must_use]
    pub fn return_type(&self) -> &CilTypeRc {
        &self.return_type
    }

    /// The implementation.
    #[must_use]
    pub fn implementation(&self) -> &MethodImpl {
        &self.implementation
    }

    /// Number of values a caller pushes, including the receiver.
    #[must_use]
    pub fn stack_arg_count(&self) -> usize {
        self.params.len() + usize::from(!self.is_static())
    }

    /// `Namespace.Type::Name`
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}::{}", self.declaring, self.name)
    }
}

impl fmt::Display for MethodDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}::{}(", self.return_type, self.declaring, self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}{}", param.access.keyword(), param.ty)?;
        }
        f.write_str(")")
    }
}

impl fmt::Debug for MethodDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDesc")
            .field("token", &self.token)
            .field("signature", &self.to_string())
            .field("attributes", &self.attributes)
            .field("implementation", &self.implementation)
            .finish()
    }
}

/// Builder for [`MethodDesc`].
pub struct MethodDescBuilder {
    name: String,
    declaring: CilTypeRc,
    attributes: MethodAttributes,
    params: Vec<ParamDesc>,
    return_type: Option<CilTypeRc>,
    implementation: MethodImpl,
}

impl MethodDescBuilder {
    /// Marks the method static.
    #[must_use]
    pub fn static_method(mut self) -> Self {
        self.attributes |= MethodAttributes::STATIC;
        self
    }

    /// Marks the method virtual.
    #[must_use]
    pub fn virtual_method(mut self) -> Self {
        self.attributes |= MethodAttributes::VIRTUAL;
        self
    }

    /// Marks the method final.
    #[must_use]
    pub fn final_method(mut self) -> Self {
        self.attributes |= MethodAttributes::FINAL;
        self
    }

    /// Marks the method abstract.
    #[must_use]
    pub fn abstract_method(mut self) -> Self {
        self.attributes |= MethodAttributes::ABSTRACT;
        self
    }

    /// Marks the name as special.
    #[must_use]
    pub fn special_name(mut self) -> Self {
        self.attributes |= MethodAttributes::SPECIAL_NAME;
        self
    }

    /// Appends a by-value parameter.
    #[must_use]
    pub fn param(self, name: &str, ty: &CilTypeRc) -> Self {
        self.param_with(name, ty, SlotAccess::Default, ParamAttributes::empty())
    }

    /// Appends a `ref` parameter.
    #[must_use]
    pub fn param_ref(self, name: &str, ty: &CilTypeRc) -> Self {
        self.param_with(name, ty, SlotAccess::Ref, ParamAttributes::empty())
    }

    /// Appends an `in` parameter.
    #[must_use]
    pub fn param_in(self, name: &str, ty: &CilTypeRc) -> Self {
        self.param_with(name, ty, SlotAccess::In, ParamAttributes::IN)
    }

    /// Appends an `out` parameter.
    #[must_use]
    pub fn param_out(self, name: &str, ty: &CilTypeRc) -> Self {
        self.param_with(name, ty, SlotAccess::Out, ParamAttributes::OUT)
    }

    /// Appends a `params T[]` parameter with element type `element`.
    #[must_use]
    pub fn params_array(self, name: &str, element: &CilTypeRc) -> Self {
        let array = CilType::sz_array_of(element);
        self.param_with(
            name,
            &array,
            SlotAccess::Default,
            ParamAttributes::PARAM_ARRAY,
        )
    }

    /// Appends a parameter with explicit access and attributes.
    #[must_use]
    pub fn param_with(
        mut self,
        name: &str,
        ty: &CilTypeRc,
        access: SlotAccess,
        attributes: ParamAttributes,
    ) -> Self {
        self.params.push(ParamDesc {
            name: name.to_string(),
            ty: ty.clone(),
            access,
            attributes,
        });
        self
    }

    /// Sets the return type.
    #[must_use]
    pub fn returns(mut self, ty: &CilTypeRc) -> Self {
        self.return_type = Some(ty.clone());
        self
    }

    /// Implements the method with a Rust closure.
    #[must_use]
    pub fn native<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut CallContext<'_>, &[EmValue]) -> Result<Option<EmValue>> + Send + Sync + 'static,
    {
        self.implementation = MethodImpl::Native(Arc::new(f));
        self
    }

    /// Implements the method with a CIL body.
    #[must_use]
    pub fn il(mut self, body: Arc<MethodBody>) -> Self {
        self.implementation = MethodImpl::Il(body);
        self
    }

    /// Finishes the descriptor.
    #[must_use]
    pub fn build(self) -> MethodRc {
        let return_type = self.return_type.unwrap_or_else(|| {
            CilType::system("Void", CilFlavor::Void, None)
        });

        Arc::new(MethodDesc {
            token: next_method_token(),
            name: self.name,
            declaring: self.declaring,
            attributes: self.attributes,
            params: self.params,
            return_type,
            implementation: self.implementation,
        })
    }
}
