//! The managed heap.

use std::sync::Arc;

use crate::{
    metadata::{
        registry::TypeRegistry,
        typesystem::{CilType, CilTypeRc},
    },
    runtime::value::{EmValue, HeapRef, StructValue},
    Error, Result,
};

/// An object on the managed heap.
#[derive(Clone, Debug, PartialEq)]
pub enum HeapObject {
    /// A string
    String(Arc<str>),
    /// A single-dimensional, zero-based array
    Array {
        /// Element type
        element: CilTypeRc,
        /// Elements
        items: Vec<EmValue>,
    },
    /// A class instance
    Instance {
        /// Runtime type
        ty: CilTypeRc,
        /// Field values in declaration order
        fields: Vec<EmValue>,
    },
    /// A boxed value type
    Boxed {
        /// The value type
        ty: CilTypeRc,
        /// The boxed value
        value: EmValue,
    },
}

impl HeapObject {
    /// Short name of the variant, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            HeapObject::String(_) => "string",
            HeapObject::Array { .. } => "array",
            HeapObject::Instance { .. } => "instance",
            HeapObject::Boxed { .. } => "boxed value",
        }
    }

    /// The runtime type of the object.
    #[must_use]
    pub fn runtime_type(&self, registry: &TypeRegistry) -> CilTypeRc {
        match self {
            HeapObject::String(_) => registry.string(),
            HeapObject::Array { element, .. } => CilType::sz_array_of(element),
            HeapObject::Instance { ty, .. } | HeapObject::Boxed { ty, .. } => ty.clone(),
        }
    }
}

/// Objects allocated by a [`crate::Runtime`].
///
/// Objects are never freed; the heap lives as long as its runtime. Allocation fails with
/// [`Error::LimitExceeded`] once `max_objects` objects exist (0 means unlimited).
#[derive(Debug, Clone, Default)]
pub struct ManagedHeap {
    objects: Vec<HeapObject>,
    max_objects: usize,
}

impl ManagedHeap {
    /// Creates an empty heap.
    #[must_use]
    pub fn new(max_objects: usize) -> Self {
        ManagedHeap {
            objects: Vec::new(),
            max_objects,
        }
    }

    /// Changes the object limit. Existing objects are kept even if they exceed it.
    pub fn set_max_objects(&mut self, max_objects: usize) {
        self.max_objects = max_objects;
    }

    /// Number of allocated objects
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// `true` if nothing was allocated
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Allocates `object`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LimitExceeded`] if the heap is full.
    pub fn alloc(&mut self, object: HeapObject) -> Result<HeapRef> {
        if self.max_objects != 0 && self.objects.len() >= self.max_objects {
            return Err(Error::LimitExceeded {
                limit: "heap objects",
                value: self.max_objects as u64,
            });
        }
        self.objects.push(object);
        Ok(HeapRef(self.objects.len() - 1))
    }

    /// Allocates a string.
    pub fn alloc_string(&mut self, value: &str) -> Result<HeapRef> {
        self.alloc(HeapObject::String(Arc::from(value)))
    }

    /// Allocates an array holding `items`.
    pub fn alloc_array(&mut self, element: &CilTypeRc, items: Vec<EmValue>) -> Result<HeapRef> {
        self.alloc(HeapObject::Array {
            element: element.clone(),
            items,
        })
    }

    /// Allocates a boxed `value` of type `ty`.
    pub fn alloc_boxed(&mut self, ty: &CilTypeRc, value: EmValue) -> Result<HeapRef> {
        self.alloc(HeapObject::Boxed {
            ty: ty.clone(),
            value,
        })
    }

    /// Allocates an instance of `ty` with zeroed fields.
    pub fn alloc_instance(&mut self, ty: &CilTypeRc) -> Result<HeapRef> {
        let fields = ty
            .fields()
            .iter()
            .map(|field| EmValue::default_for(&field.ty))
            .collect();
        self.alloc(HeapObject::Instance {
            ty: ty.clone(),
            fields,
        })
    }

    /// The object behind `object`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPointer`] for a reference this heap never handed out.
    pub fn get(&self, object: HeapRef) -> Result<&HeapObject> {
        self.objects
            .get(object.0)
            .ok_or_else(|| Error::InvalidPointer(object.to_string()))
    }

    /// Mutable access to the object behind `object`.
    pub fn get_mut(&mut self, object: HeapRef) -> Result<&mut HeapObject> {
        self.objects
            .get_mut(object.0)
            .ok_or_else(|| Error::InvalidPointer(object.to_string()))
    }

    /// The contents of a string object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if `object` is not a string.
    pub fn string(&self, object: HeapRef) -> Result<Arc<str>> {
        match self.get(object)? {
            HeapObject::String(value) => Ok(value.clone()),
            other => Err(Error::TypeMismatch {
                operation: "string",
                expected: "string",
                found: other.kind().to_string(),
            }),
        }
    }

    /// The elements of an array object.
    pub fn array(&self, object: HeapRef) -> Result<&[EmValue]> {
        match self.get(object)? {
            HeapObject::Array { items, .. } => Ok(items),
            other => Err(Error::TypeMismatch {
                operation: "array",
                expected: "array",
                found: other.kind().to_string(),
            }),
        }
    }

    /// Mutable elements of an array object.
    pub fn array_mut(&mut self, object: HeapRef) -> Result<&mut Vec<EmValue>> {
        match self.get_mut(object)? {
            HeapObject::Array { items, .. } => Ok(items),
            other => Err(Error::TypeMismatch {
                operation: "array",
                expected: "array",
                found: other.kind().to_string(),
            }),
        }
    }

    /// The fields of a class instance or of the struct inside a box.
    pub fn fields(&self, object: HeapRef) -> Result<&[EmValue]> {
        match self.get(object)? {
            HeapObject::Instance { fields, .. }
            | HeapObject::Boxed {
                value: EmValue::Struct(StructValue { fields, .. }),
                ..
            } => Ok(fields),
            other => Err(Error::TypeMismatch {
                operation: "fields",
                expected: "object with fields",
                found: other.kind().to_string(),
            }),
        }
    }

    /// Mutable fields of a class instance or of the struct inside a box.
    pub fn fields_mut(&mut self, object: HeapRef) -> Result<&mut Vec<EmValue>> {
        match self.get_mut(object)? {
            HeapObject::Instance { fields, .. }
            | HeapObject::Boxed {
                value: EmValue::Struct(StructValue { fields, .. }),
                ..
            } => Ok(fields),
            other => Err(Error::TypeMismatch {
                operation: "fields",
                expected: "object with fields",
                found: other.kind().to_string(),
            }),
        }
    }
}
