//! Runtime values.
//!
//! [`EmValue`] is what lives on the evaluation stack, in arguments and locals, in array
//! elements and object fields. Small integers are widened to `int32` as on a real CIL
//! stack; value types other than primitives are carried inline as [`StructValue`].

use std::fmt;

use crate::{
    metadata::typesystem::{CilFlavor, CilTypeRc},
    Error, Result,
};

/// A reference to an object on the managed heap.
///
/// Two `HeapRef`s are equal if they refer to the same object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HeapRef(pub(crate) usize);

impl HeapRef {
    /// Index of the object in its heap
    #[must_use]
    pub fn id(&self) -> usize {
        self.0
    }
}

impl fmt::Display for HeapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapRef({})", self.0)
    }
}

/// A value type instance stored inline.
#[derive(Clone, Debug, PartialEq)]
pub struct StructValue {
    /// The value type
    pub ty: CilTypeRc,
    /// Field values in declaration order
    pub fields: Vec<EmValue>,
}

/// What a managed pointer refers to.
#[derive(Clone, Debug, PartialEq)]
pub enum PointerTarget {
    /// An argument of an active frame
    Argument {
        /// Frame depth
        frame: usize,
        /// Argument index
        index: u16,
    },
    /// A local of an active frame
    Local {
        /// Frame depth
        frame: usize,
        /// Local index
        index: u16,
    },
    /// A host cell holding a by-reference argument of a delegate invocation
    Cell(usize),
    /// The value inside a box
    Boxed(HeapRef),
    /// An array element
    ArrayElement {
        /// The array
        array: HeapRef,
        /// Element index
        index: usize,
    },
    /// A field of a class instance, or of the struct inside a box
    ObjectField {
        /// The object
        object: HeapRef,
        /// Field index
        field: usize,
    },
    /// A field of the struct another pointer refers to
    Field {
        /// Pointer to the struct
        base: Box<ManagedPointer>,
        /// Field index
        field: usize,
    },
}

/// A managed pointer (`ref`, `in` and `out` arguments, `ldarga`, `ldloca`, `ldflda`,
/// `unbox`).
#[derive(Clone, Debug, PartialEq)]
pub struct ManagedPointer {
    /// What this pointer refers to
    pub target: PointerTarget,
}

impl ManagedPointer {
    /// Pointer to an argument of the frame at `frame`.
    #[must_use]
    pub fn to_argument(frame: usize, index: u16) -> Self {
        ManagedPointer {
            target: PointerTarget::Argument { frame, index },
        }
    }

    /// Pointer to a local of the frame at `frame`.
    #[must_use]
    pub fn to_local(frame: usize, index: u16) -> Self {
        ManagedPointer {
            target: PointerTarget::Local { frame, index },
        }
    }

    /// Pointer to a host cell.
    #[must_use]
    pub fn to_cell(cell: usize) -> Self {
        ManagedPointer {
            target: PointerTarget::Cell(cell),
        }
    }

    /// Pointer to the value inside a box.
    #[must_use]
    pub fn to_boxed(object: HeapRef) -> Self {
        ManagedPointer {
            target: PointerTarget::Boxed(object),
        }
    }

    /// Pointer to an array element.
    #[must_use]
    pub fn to_array_element(array: HeapRef, index: usize) -> Self {
        ManagedPointer {
            target: PointerTarget::ArrayElement { array, index },
        }
    }

    /// Pointer to an object field.
    #[must_use]
    pub fn to_object_field(object: HeapRef, field: usize) -> Self {
        ManagedPointer {
            target: PointerTarget::ObjectField { object, field },
        }
    }

    /// Pointer to field `field` of the struct this pointer refers to.
    #[must_use]
    pub fn field(self, field: usize) -> Self {
        ManagedPointer {
            target: PointerTarget::Field {
                base: Box::new(self),
                field,
            },
        }
    }
}

/// A runtime value.
#[derive(Clone, Debug, PartialEq)]
pub enum EmValue {
    /// Null reference
    Null,
    /// 32-bit integer; also `bool`, `char` and the 8/16-bit integers
    I32(i32),
    /// 64-bit integer; also `uint64` (bit pattern preserved)
    I64(i64),
    /// Native-sized integer, held as 64 bits
    NativeInt(i64),
    /// 32-bit floating point
    F32(f32),
    /// 64-bit floating point
    F64(f64),
    /// Reference to a heap object
    ObjectRef(HeapRef),
    /// Value type instance
    Struct(StructValue),
    /// Managed pointer
    ManagedPtr(ManagedPointer),
}

impl EmValue {
    /// Short name of the variant, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            EmValue::Null => "null",
            EmValue::I32(_) => "int32",
            EmValue::I64(_) => "int64",
            EmValue::NativeInt(_) => "native int",
            EmValue::F32(_) => "float32",
            EmValue::F64(_) => "float64",
            EmValue::ObjectRef(_) => "object reference",
            EmValue::Struct(_) => "struct",
            EmValue::ManagedPtr(_) => "managed pointer",
        }
    }

    fn mismatch(&self, operation: &'static str, expected: &'static str) -> Error {
        Error::TypeMismatch {
            operation,
            expected,
            found: self.type_name().to_string(),
        }
    }

    /// `true` for [`EmValue::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, EmValue::Null)
    }

    /// The value as `int32`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] for any other variant.
    pub fn as_i32(&self) -> Result<i32> {
        match self {
            EmValue::I32(value) => Ok(*value),
            other => Err(other.mismatch("as_i32", "int32")),
        }
    }

    /// The value as `int64`, widening `int32` and native integers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] for non-integer variants.
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            EmValue::I32(value) => Ok(i64::from(*value)),
            EmValue::I64(value) | EmValue::NativeInt(value) => Ok(*value),
            other => Err(other.mismatch("as_i64", "integer")),
        }
    }

    /// The value as `float64`, widening `float32`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] for non-float variants.
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            EmValue::F32(value) => Ok(f64::from(*value)),
            EmValue::F64(value) => Ok(*value),
            other => Err(other.mismatch("as_f64", "float")),
        }
    }

    /// The value as a boolean (`int32` non-zero).
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if the value is not an `int32`.
    pub fn as_bool(&self) -> Result<bool> {
        self.as_i32().map(|value| value != 0)
    }

    /// The heap reference, or `None` for null.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] for non-reference variants.
    pub fn as_object_ref(&self) -> Result<Option<HeapRef>> {
        match self {
            EmValue::Null => Ok(None),
            EmValue::ObjectRef(object) => Ok(Some(*object)),
            other => Err(other.mismatch("as_object_ref", "object reference")),
        }
    }

    /// The managed pointer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] for any other variant.
    pub fn as_managed_ptr(&self) -> Result<&ManagedPointer> {
        match self {
            EmValue::ManagedPtr(pointer) => Ok(pointer),
            other => Err(other.mismatch("as_managed_ptr", "managed pointer")),
        }
    }

    /// `true` for values a `brtrue` takes: non-zero numbers, non-null references.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            EmValue::Null => false,
            EmValue::I32(value) => *value != 0,
            EmValue::I64(value) | EmValue::NativeInt(value) => *value != 0,
            EmValue::F32(value) => *value != 0.0,
            EmValue::F64(value) => *value != 0.0,
            EmValue::ObjectRef(_) | EmValue::Struct(_) | EmValue::ManagedPtr(_) => true,
        }
    }

    /// The zero value of `ty`: null for reference types, zero for numbers, and a struct
    /// with zeroed fields for other value types.
    #[must_use]
    pub fn default_for(ty: &CilTypeRc) -> Self {
        match ty.flavor() {
            CilFlavor::Boolean
            | CilFlavor::Char
            | CilFlavor::I1
            | CilFlavor::U1
            | CilFlavor::I2
            | CilFlavor::U2
            | CilFlavor::I4
            | CilFlavor::U4 => EmValue::I32(0),
            CilFlavor::I8 | CilFlavor::U8 => EmValue::I64(0),
            CilFlavor::R4 => EmValue::F32(0.0),
            CilFlavor::R8 => EmValue::F64(0.0),
            CilFlavor::I | CilFlavor::U | CilFlavor::Pointer => EmValue::NativeInt(0),
            CilFlavor::ValueType => EmValue::Struct(StructValue {
                ty: ty.clone(),
                fields: ty
                    .fields()
                    .iter()
                    .map(|field| EmValue::default_for(&field.ty))
                    .collect(),
            }),
            CilFlavor::Void
            | CilFlavor::Object
            | CilFlavor::String
            | CilFlavor::Array
            | CilFlavor::Class
            | CilFlavor::Interface => EmValue::Null,
        }
    }

    /// Numeric equality for `ceq`/`beq`, reference equality for references.
    #[must_use]
    pub fn cil_equals(&self, other: &EmValue) -> bool {
        match (self, other) {
            (EmValue::I32(a), EmValue::I32(b)) => a == b,
            (EmValue::I32(_) | EmValue::I64(_) | EmValue::NativeInt(_), _)
                if matches!(other, EmValue::I32(_) | EmValue::I64(_) | EmValue::NativeInt(_)) =>
            {
                self.as_i64().ok() == other.as_i64().ok()
            }
            (EmValue::F32(_) | EmValue::F64(_), EmValue::F32(_) | EmValue::F64(_)) => {
                self.as_f64().ok() == other.as_f64().ok()
            }
            (EmValue::Null, EmValue::Null) => true,
            (EmValue::ObjectRef(a), EmValue::ObjectRef(b)) => a == b,
            _ => false,
        }
    }
}

impl From<i32> for EmValue {
    fn from(value: i32) -> Self {
        EmValue::I32(value)
    }
}

impl From<i64> for EmValue {
    fn from(value: i64) -> Self {
        EmValue::I64(value)
    }
}

impl From<f64> for EmValue {
    fn from(value: f64) -> Self {
        EmValue::F64(value)
    }
}

impl From<bool> for EmValue {
    fn from(value: bool) -> Self {
        EmValue::I32(i32::from(value))
    }
}
