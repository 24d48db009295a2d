//! Type descriptors.
//!
//! A [`CilType`] describes one runtime type: its name, its [`CilFlavor`], its base type
//! and implemented interfaces, its instance fields and, for arrays and pointers, its
//! element type. Types are shared as [`CilTypeRc`] and compared structurally by full
//! name, so two descriptors for `System.Int32` are the same type wherever they came from.

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::metadata::token::{next_type_token, Token};

/// A reference-counted type descriptor.
pub type CilTypeRc = Arc<CilType>;

/// The fundamental kind of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CilFlavor {
    // Base primitive types
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    I,
    U,
    Object,
    String,

    // Complex types
    /// Single-dimensional, zero-based array
    Array,
    /// Unmanaged pointer
    Pointer,

    // Type categories
    Class,
    ValueType,
    Interface,
}

impl CilFlavor {
    /// Check if this is a primitive type
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            CilFlavor::Void
                | CilFlavor::Boolean
                | CilFlavor::Char
                | CilFlavor::I1
                | CilFlavor::U1
                | CilFlavor::I2
                | CilFlavor::U2
                | CilFlavor::I4
                | CilFlavor::U4
                | CilFlavor::I8
                | CilFlavor::U8
                | CilFlavor::R4
                | CilFlavor::R8
                | CilFlavor::I
                | CilFlavor::U
                | CilFlavor::Object
                | CilFlavor::String
        )
    }

    /// Check if this is a value type
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        matches!(
            self,
            CilFlavor::Boolean
                | CilFlavor::Char
                | CilFlavor::I1
                | CilFlavor::U1
                | CilFlavor::I2
                | CilFlavor::U2
                | CilFlavor::I4
                | CilFlavor::U4
                | CilFlavor::I8
                | CilFlavor::U8
                | CilFlavor::R4
                | CilFlavor::R8
                | CilFlavor::I
                | CilFlavor::U
                | CilFlavor::ValueType
        )
    }

    /// Check if this is a reference type
    #[must_use]
    pub fn is_reference_type(&self) -> bool {
        matches!(
            self,
            CilFlavor::Object
                | CilFlavor::String
                | CilFlavor::Array
                | CilFlavor::Class
                | CilFlavor::Interface
        )
    }

    /// Namespace and name of the BCL type behind a primitive flavor.
    #[must_use]
    pub fn primitive_name(&self) -> Option<(&'static str, &'static str)> {
        let name = match self {
            CilFlavor::Void => "Void",
            CilFlavor::Boolean => "Boolean",
            CilFlavor::Char => "Char",
            CilFlavor::I1 => "SByte",
            CilFlavor::U1 => "Byte",
            CilFlavor::I2 => "Int16",
            CilFlavor::U2 => "UInt16",
            CilFlavor::I4 => "Int32",
            CilFlavor::U4 => "UInt32",
            CilFlavor::I8 => "Int64",
            CilFlavor::U8 => "UInt64",
            CilFlavor::R4 => "Single",
            CilFlavor::R8 => "Double",
            CilFlavor::I => "IntPtr",
            CilFlavor::U => "UIntPtr",
            CilFlavor::Object => "Object",
            CilFlavor::String => "String",
            _ => return None,
        };
        Some(("System", name))
    }
}

/// An instance field of a type.
#[derive(Debug, Clone)]
pub struct FieldDesc {
    /// Field name
    pub name: String,
    /// Field type
    pub ty: CilTypeRc,
}

/// A type descriptor.
#[derive(Debug)]
pub struct CilType {
    token: Token,
    namespace: String,
    name: String,
    flavor: CilFlavor,
    base: Option<CilTypeRc>,
    interfaces: Vec<CilTypeRc>,
    fields: Vec<FieldDesc>,
    element: Option<CilTypeRc>,
}

impl CilType {
    /// Start describing a reference type.
    #[must_use]
    pub fn class(namespace: &str, name: &str) -> CilTypeBuilder {
        CilTypeBuilder::new(namespace, name, CilFlavor::Class)
    }

    /// Start describing a value type.
    ///
    /// Give it `System.ValueType` as base if it should be assignable to that type.
    #[must_use]
    pub fn value_type(namespace: &str, name: &str) -> CilTypeBuilder {
        CilTypeBuilder::new(namespace, name, CilFlavor::ValueType)
    }

    /// Start describing an interface.
    #[must_use]
    pub fn interface(namespace: &str, name: &str) -> CilTypeBuilder {
        CilTypeBuilder::new(namespace, name, CilFlavor::Interface)
    }

    /// The canonical descriptor of a primitive type, or `None` if `flavor` is not
    /// primitive.
    ///
    /// Primitive value types derive from `System.ValueType`, which derives from
    /// `System.Object`; `System.String` derives from `System.Object`.
    #[must_use]
    pub fn primitive(flavor: CilFlavor) -> Option<CilTypeRc> {
        let (_, name) = flavor.primitive_name()?;
        let object = Self::system("Object", CilFlavor::Object, None);

        let base = match flavor {
            CilFlavor::Void | CilFlavor::Object => return Some(Self::system(name, flavor, None)),
            CilFlavor::String => object,
            _ => Self::system("ValueType", CilFlavor::Class, Some(&object)),
        };
        Some(Self::system(name, flavor, Some(&base)))
    }

    /// A type in the `System` namespace with an optional base.
    pub(crate) fn system(name: &str, flavor: CilFlavor, base: Option<&CilTypeRc>) -> CilTypeRc {
        Arc::new(CilType {
            base: base.cloned(),
            ..CilType::bare("System", name, flavor)
        })
    }

    /// A single-dimensional array of `element`.
    #[must_use]
    pub fn sz_array_of(element: &CilTypeRc) -> CilTypeRc {
        Arc::new(CilType {
            base: Some(Self::system("Object", CilFlavor::Object, None)),
            element: Some(element.clone()),
            ..CilType::bare(&element.namespace, &format!("{}[]", element.name), CilFlavor::Array)
        })
    }

    /// An unmanaged pointer to `element`.
    #[must_use]
    pub fn pointer_to(element: &CilTypeRc) -> CilTypeRc {
        Arc::new(CilType {
            element: Some(element.clone()),
            ..CilType::bare(&element.namespace, &format!("{}*", element.name), CilFlavor::Pointer)
        })
    }

    fn bare(namespace: &str, name: &str, flavor: CilFlavor) -> CilType {
        CilType {
            token: next_type_token(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            flavor,
            base: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            element: None,
        }
    }

    /// Identity token of this descriptor.
    #[must_use]
    pub fn token(&self) -> Token {
        self.token
    }

    /// Namespace
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Simple name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `Namespace.Name`, or just the name for types in the global namespace.
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// The fundamental kind of this type.
    #[must_use]
    pub fn flavor(&self) -> CilFlavor {
        self.flavor
    }

    /// Direct base type.
    #[must_use]
    pub fn base(&self) -> Option<&CilTypeRc> {
        self.base.as_ref()
    }

    /// Directly implemented interfaces.
    #[must_use]
    pub fn interfaces(&self) -> &[CilTypeRc] {
        &self.interfaces
    }

    /// Instance fields in layout order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDesc] {
        &self.fields
    }

    /// Layout index of the field called `name`.
    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    /// Element type of an array or pointer.
    #[must_use]
    pub fn element_type(&self) -> Option<&CilTypeRc> {
        self.element.as_ref()
    }

    /// `true` for `System.Void`.
    #[must_use]
    pub fn is_void(&self) -> bool {
        self.flavor == CilFlavor::Void
    }

    /// `true` for `System.Object`.
    #[must_use]
    pub fn is_object(&self) -> bool {
        self.flavor == CilFlavor::Object
    }

    /// `true` for unmanaged pointer types.
    #[must_use]
    pub fn is_pointer(&self) -> bool {
        self.flavor == CilFlavor::Pointer
    }

    /// `true` for value types (primitives and structs).
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        self.flavor.is_value_type()
    }

    /// `true` for reference types.
    #[must_use]
    pub fn is_reference_type(&self) -> bool {
        self.flavor.is_reference_type()
    }

    /// `true` for `T[]`.
    #[must_use]
    pub fn is_sz_array(&self) -> bool {
        self.flavor == CilFlavor::Array
    }

    /// Returns `true` if this type derives from `other` (directly or transitively) or
    /// implements it as an interface. A type is not assignable to itself by this test.
    #[must_use]
    pub fn is_assignable_to(&self, other: &CilType) -> bool {
        if self.implements(other) {
            return true;
        }

        let mut current = self.base.as_ref();
        while let Some(base) = current {
            if **base == *other || base.implements(other) {
                return true;
            }
            current = base.base.as_ref();
        }
        false
    }

    fn implements(&self, interface: &CilType) -> bool {
        self.interfaces
            .iter()
            .any(|candidate| **candidate == *interface || candidate.implements(interface))
    }
}

impl PartialEq for CilType {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace && self.name == other.name
    }
}

impl Eq for CilType {}

impl Hash for CilType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for CilType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}.{}", self.namespace, self.name)
        }
    }
}

/// Builder for user-defined types.
///
/// ```rust
/// use dotreflect::prelude::*;
///
/// let registry = TypeRegistry::new();
/// let shape = CilType::interface("Demo", "IShape").build();
/// let circle = CilType::class("Demo", "Circle")
///     .extends(&registry.object())
///     .implements(&shape)
///     .field("radius", &registry.double())
///     .build();
///
/// assert!(circle.is_assignable_to(&shape));
/// assert!(circle.is_assignable_to(&registry.object()));
/// assert!(!shape.is_assignable_to(&circle));
/// ```
#[derive(Debug)]
pub struct CilTypeBuilder {
    ty: CilType,
}

impl CilTypeBuilder {
    fn new(namespace: &str, name: &str, flavor: CilFlavor) -> Self {
        CilTypeBuilder {
            ty: CilType::bare(namespace, name, flavor),
        }
    }

    /// Sets the base type.
    #[must_use]
    pub fn extends(mut self, base: &CilTypeRc) -> Self {
        self.ty.base = Some(base.clone());
        self
    }

    /// Adds an implemented interface.
    #[must_use]
    pub fn implements(mut self, interface: &CilTypeRc) -> Self {
        self.ty.interfaces.push(interface.clone());
        self
    }

    /// Appends an instance field.
    #[must_use]
    pub fn field(mut self, name: &str, ty: &CilTypeRc) -> Self {
        self.ty.fields.push(FieldDesc {
            name: name.to_string(),
            ty: ty.clone(),
        });
        self
    }

    /// Finishes the descriptor.
    #[must_use]
    pub fn build(self) -> CilTypeRc {
        Arc::new(self.ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitive_names() {
        let int32 = CilType::primitive(CilFlavor::I4).unwrap();
        assert_eq!(int32.full_name(), "System.Int32");
        assert!(int32.is_value_type());
        assert_eq!(
            int32.base().map(|b| b.full_name()),
            Some("System.ValueType".to_string())
        );
        assert!(CilType::primitive(CilFlavor::Class).is_none());
    }

    #[test]
    fn structural_equality() {
        let a = CilType::primitive(CilFlavor::String).unwrap();
        let b = CilType::primitive(CilFlavor::String).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.token(), b.token());

        let object = CilType::primitive(CilFlavor::Object).unwrap();
        assert_ne!(a, object);
    }

    #[test]
    fn arrays_and_pointers() {
        let int32 = CilType::primitive(CilFlavor::I4).unwrap();
        let array = CilType::sz_array_of(&int32);
        let pointer = CilType::pointer_to(&int32);

        assert_eq!(array.to_string(), "System.Int32[]");
        assert_eq!(pointer.to_string(), "System.Int32*");
        assert!(array.is_reference_type());
        assert!(pointer.is_pointer());
        assert!(!pointer.is_value_type());
        assert_eq!(array.element_type(), Some(&int32));
    }

    #[test]
    fn assignability() {
        let object = CilType::primitive(CilFlavor::Object).unwrap();
        let disposable = CilType::interface("System", "IDisposable").build();
        let base = CilType::class("Demo", "Base")
            .extends(&object)
            .implements(&disposable)
            .build();
        let derived = CilType::class("Demo", "Derived").extends(&base).build();

        assert!(derived.is_assignable_to(&base));
        assert!(derived.is_assignable_to(&object));
        assert!(derived.is_assignable_to(&disposable));
        assert!(!base.is_assignable_to(&derived));
        assert!(!derived.is_assignable_to(&derived));
    }

    #[test]
    fn fields() {
        let int32 = CilType::primitive(CilFlavor::I4).unwrap();
        let counter = CilType::value_type("Demo", "Counter")
            .field("Value", &int32)
            .field("Step", &int32)
            .build();

        assert_eq!(counter.field_index("Step"), Some(1));
        assert_eq!(counter.field_index("Missing"), None);
        assert_eq!(counter.fields()[0].ty, int32);
    }
}
