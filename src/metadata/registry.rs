//! The registry of well-known types.
//!
//! [`TypeRegistry`] is the injected lookup service the adapter and the emitter use for
//! `System.Object`, `System.Void`, the primitives and the exception types that generated
//! code may throw. It is populated once on construction (and by
//! [`TypeRegistry::register`] during set-up) and only read afterwards, so it can be
//! shared freely between threads.

use std::collections::HashMap;

use crate::{
    metadata::{
        method::{MethodDesc, MethodRc},
        typesystem::{CilFlavor, CilType, CilTypeRc},
    },
    runtime::EmValue,
};

/// Name of the field that carries an exception's message.
pub const EXCEPTION_MESSAGE_FIELD: &str = "_message";

/// Well-known type lookup.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: HashMap<String, CilTypeRc>,
    constructors: HashMap<String, MethodRc>,
    void: CilTypeRc,
    boolean: CilTypeRc,
    char: CilTypeRc,
    sbyte: CilTypeRc,
    byte: CilTypeRc,
    int16: CilTypeRc,
    uint16: CilTypeRc,
    int32: CilTypeRc,
    uint32: CilTypeRc,
    int64: CilTypeRc,
    uint64: CilTypeRc,
    single: CilTypeRc,
    double: CilTypeRc,
    intptr: CilTypeRc,
    uintptr: CilTypeRc,
    object: CilTypeRc,
    string: CilTypeRc,
    value_type: CilTypeRc,
    date_time: CilTypeRc,
    guid: CilTypeRc,
    exception: CilTypeRc,
    target_parameter_count_exception: CilTypeRc,
    invalid_cast_exception: CilTypeRc,
    null_reference_exception: CilTypeRc,
    object_array: CilTypeRc,
}

impl TypeRegistry {
    /// Builds the registry with every well-known type.
    #[must_use]
    pub fn new() -> Self {
        let object = CilType::system("Object", CilFlavor::Object, None);
        let value_type = CilType::system("ValueType", CilFlavor::Class, Some(&object));
        let primitive = |name: &str, flavor: CilFlavor| CilType::system(name, flavor, Some(&value_type));

        let int16 = primitive("Int16", CilFlavor::I2);
        let int32 = primitive("Int32", CilFlavor::I4);
        let int64 = primitive("Int64", CilFlavor::I8);
        let string = CilType::system("String", CilFlavor::String, Some(&object));

        let date_time = CilType::value_type("System", "DateTime")
            .extends(&value_type)
            .field("_ticks", &int64)
            .build();
        let guid = CilType::value_type("System", "Guid")
            .extends(&value_type)
            .field("_a", &int32)
            .field("_b", &int16)
            .field("_c", &int16)
            .field("_d", &int64)
            .build();

        let exception = CilType::class("System", "Exception")
            .extends(&object)
            .field(EXCEPTION_MESSAGE_FIELD, &string)
            .build();
        let derived_exception = |namespace: &str, name: &str| {
            CilType::class(namespace, name)
                .extends(&exception)
                .field(EXCEPTION_MESSAGE_FIELD, &string)
                .build()
        };
        let target_parameter_count_exception =
            derived_exception("System.Reflection", "TargetParameterCountException");
        let invalid_cast_exception = derived_exception("System", "InvalidCastException");
        let null_reference_exception = derived_exception("System", "NullReferenceException");

        let mut registry = TypeRegistry {
            types: HashMap::new(),
            constructors: HashMap::new(),
            void: CilType::system("Void", CilFlavor::Void, None),
            boolean: primitive("Boolean", CilFlavor::Boolean),
            char: primitive("Char", CilFlavor::Char),
            sbyte: primitive("SByte", CilFlavor::I1),
            byte: primitive("Byte", CilFlavor::U1),
            int16,
            uint16: primitive("UInt16", CilFlavor::U2),
            int32,
            uint32: primitive("UInt32", CilFlavor::U4),
            int64,
            uint64: primitive("UInt64", CilFlavor::U8),
            single: primitive("Single", CilFlavor::R4),
            double: primitive("Double", CilFlavor::R8),
            intptr: primitive("IntPtr", CilFlavor::I),
            uintptr: primitive("UIntPtr", CilFlavor::U),
            object_array: CilType::sz_array_of(&object),
            object,
            string,
            value_type,
            date_time,
            guid,
            exception,
            target_parameter_count_exception,
            invalid_cast_exception,
            null_reference_exception,
        };

        let well_known = [
            &registry.void,
            &registry.boolean,
            &registry.char,
            &registry.sbyte,
            &registry.byte,
            &registry.int16,
            &registry.uint16,
            &registry.int32,
            &registry.uint32,
            &registry.int64,
            &registry.uint64,
            &registry.single,
            &registry.double,
            &registry.intptr,
            &registry.uintptr,
            &registry.object,
            &registry.string,
            &registry.value_type,
            &registry.date_time,
            &registry.guid,
            &registry.exception,
            &registry.target_parameter_count_exception,
            &registry.invalid_cast_exception,
            &registry.null_reference_exception,
            &registry.object_array,
        ]
        .map(|ty| ty.clone());

        for ty in well_known {
            if ty.full_name().ends_with("Exception") {
                let ctor = exception_constructor(&ty, &registry.string);
                registry.constructors.insert(ty.full_name(), ctor);
            }
            registry.register(ty);
        }

        registry
    }

    /// Adds a type so it can be found by [`TypeRegistry::get`].
    pub fn register(&mut self, ty: CilTypeRc) {
        self.types.insert(ty.full_name(), ty);
    }

    /// Looks up a type by full name.
    #[must_use]
    pub fn get(&self, full_name: &str) -> Option<CilTypeRc> {
        self.types.get(full_name).cloned()
    }

    /// The registered descriptor of a primitive flavor.
    #[must_use]
    pub fn primitive(&self, flavor: CilFlavor) -> Option<CilTypeRc> {
        let (namespace, name) = flavor.primitive_name()?;
        self.get(&format!("{namespace}.{name}"))
    }

    /// The `(string message)` constructor of a registered exception type.
    #[must_use]
    pub fn exception_constructor(&self, exception: &CilType) -> Option<MethodRc> {
        self.constructors.get(&exception.full_name()).cloned()
    }

    /// `System.Void`
    #[must_use]
    pub fn void(&self) -> CilTypeRc {
        self.void.clone()
    }

    /// `System.Boolean`
    #[must_use]
    pub fn boolean(&self) -> CilTypeRc {
        self.boolean.clone()
    }

    /// `System.Char`
    #[must_use]
    pub fn char(&self) -> CilTypeRc {
        self.char.clone()
    }

    /// `System.SByte`
    #[must_use]
    pub fn sbyte(&self) -> CilTypeRc {
        self.sbyte.clone()
    }

    /// `System.Byte`
    #[must_use]
    pub fn byte(&self) -> CilTypeRc {
        self.byte.clone()
    }

    /// `System.Int16`
    #[must_use]
    pub fn int16(&self) -> CilTypeRc {
        self.int16.clone()
    }

    /// `System.UInt16`
    #[must_use]
    pub fn uint16(&self) -> CilTypeRc {
        self.uint16.clone()
    }

    /// `System.Int32`
    #[must_use]
    pub fn int32(&self) -> CilTypeRc {
        self.int32.clone()
    }

    /// `System.UInt32`
    #[must_use]
    pub fn uint32(&self) -> CilTypeRc {
        self.uint32.clone()
    }

    /// `System.Int64`
    #[must_use]
    pub fn int64(&self) -> CilTypeRc {
        self.int64.clone()
    }

    /// `System.UInt64`
    #[must_use]
    pub fn uint64(&self) -> CilTypeRc {
        self.uint64.clone()
    }

    /// `System.Single`
    #[must_use]
    pub fn single(&self) -> CilTypeRc {
        self.single.clone()
    }

    /// `System.Double`
    #[must_use]
    pub fn double(&self) -> CilTypeRc {
        self.double.clone()
    }

    /// `System.IntPtr`
    #[must_use]
    pub fn intptr(&self) -> CilTypeRc {
        self.intptr.clone()
    }

    /// `System.UIntPtr`
    #[must_use]
    pub fn uintptr(&self) -> CilTypeRc {
        self.uintptr.clone()
    }

    /// `System.Object`
    #[must_use]
    pub fn object(&self) -> CilTypeRc {
        self.object.clone()
    }

    /// `System.String`
    #[must_use]
    pub fn string(&self) -> CilTypeRc {
        self.string.clone()
    }

    /// `System.ValueType`
    #[must_use]
    pub fn value_type(&self) -> CilTypeRc {
        self.value_type.clone()
    }

    /// `System.DateTime`
    #[must_use]
    pub fn date_time(&self) -> CilTypeRc {
        self.date_time.clone()
    }

    /// `System.Guid`
    #[must_use]
    pub fn guid(&self) -> CilTypeRc {
        self.guid.clone()
    }

    /// `System.Exception`
    #[must_use]
    pub fn exception(&self) -> CilTypeRc {
        self.exception.clone()
    }

    /// `System.Reflection.TargetParameterCountException`
    #[must_use]
    pub fn target_parameter_count_exception(&self) -> CilTypeRc {
        self.target_parameter_count_exception.clone()
    }

    /// `System.InvalidCastException`
    #[must_use]
    pub fn invalid_cast_exception(&self) -> CilTypeRc {
        self.invalid_cast_exception.clone()
    }

    /// `System.NullReferenceException`
    #[must_use]
    pub fn null_reference_exception(&self) -> CilTypeRc {
        self.null_reference_exception.clone()
    }

    /// `System.Object[]`
    #[must_use]
    pub fn object_array(&self) -> CilTypeRc {
        self.object_array.clone()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn exception_constructor(exception: &CilTypeRc, string: &CilTypeRc) -> MethodRc {
    MethodDesc::builder(".ctor", exception)
        .special_name()
        .param("message", string)
        .native(|ctx, args| {
            let message = args.get(1).cloned().unwrap_or(EmValue::Null);
            if let Some(this) = args.first() {
                ctx.set_field(this, EXCEPTION_MESSAGE_FIELD, message)?;
            }
            Ok(None)
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_types() {
        let registry = TypeRegistry::new();

        assert_eq!(registry.int32().full_name(), "System.Int32");
        assert_eq!(registry.object_array().full_name(), "System.Object[]");
        assert!(registry.date_time().is_value_type());
        assert!(registry.string().is_reference_type());
        assert!(registry.int32().is_assignable_to(&registry.object()));
        assert!(registry
            .target_parameter_count_exception()
            .is_assignable_to(&registry.exception()));
    }

    #[test]
    fn lookups() {
        let mut registry = TypeRegistry::new();

        assert_eq!(
            registry.primitive(CilFlavor::R8),
            Some(registry.double())
        );
        assert_eq!(registry.get("System.Guid"), Some(registry.guid()));
        assert_eq!(registry.get("Demo.Point"), None);

        let point = CilType::value_type("Demo", "Point").build();
        registry.register(point.clone());
        assert_eq!(registry.get("Demo.Point"), Some(point));
    }

    #[test]
    fn exception_constructors() {
        let registry = TypeRegistry::new();

        let ctor = registry
            .exception_constructor(&registry.invalid_cast_exception())
            .unwrap();
        assert_eq!(ctor.name(), ".ctor");
        assert!(!ctor.is_static());
        assert_eq!(ctor.params().len(), 1);
        assert!(registry.exception_constructor(&registry.int32()).is_none());
    }
}
