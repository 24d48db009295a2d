//! Properties of the conversion planner over a spread of slot shapes.

use dotreflect::{
    adapter::{planner, Conversion},
    prelude::*,
};

/// Non-pointer, non-void types of every flavor the planner distinguishes.
fn sample_types(registry: &TypeRegistry) -> Vec<CilTypeRc> {
    let shape = CilType::interface("Demo", "IShape").build();
    let point = CilType::value_type("Demo", "Point")
        .extends(&registry.value_type())
        .implements(&shape)
        .field("X", &registry.int32())
        .build();
    let base = CilType::class("Demo", "Base")
        .extends(&registry.object())
        .build();

    vec![
        registry.boolean(),
        registry.char(),
        registry.byte(),
        registry.int32(),
        registry.uint64(),
        registry.double(),
        registry.intptr(),
        registry.string(),
        registry.object_array(),
        registry.date_time(),
        registry.exception(),
        shape,
        point,
        base,
    ]
}

fn accesses() -> [SlotAccess; 4] {
    [SlotAccess::Default, SlotAccess::Ref, SlotAccess::In, SlotAccess::Out]
}

#[test]
fn identity() {
    let registry = TypeRegistry::new();
    let mut types = sample_types(&registry);
    types.push(registry.object());

    for ty in &types {
        for access in accesses() {
            let slot = Slot::of_type(ty, access);
            assert_eq!(planner::can_load_as(&slot, &slot).unwrap(), 0, "{slot}");
        }
    }

    let void = Slot::of_type(&registry.void(), SlotAccess::Default);
    assert_eq!(planner::can_load_as(&void, &void).unwrap(), 0);
}

#[test]
fn void_sink_and_source() {
    let registry = TypeRegistry::new();
    let void = Slot::of_type(&registry.void(), SlotAccess::Default);
    let mut types = sample_types(&registry);
    types.push(registry.object());

    for ty in &types {
        for access in accesses() {
            let slot = Slot::of_type(ty, access);
            assert_eq!(planner::can_load_as(&slot, &void).unwrap(), 10, "{slot}");
            assert_eq!(planner::can_load_as(&void, &slot).unwrap(), 10, "{slot}");
        }
    }
}

#[test]
fn boxing_symmetry() {
    let registry = TypeRegistry::new();
    let object = Slot::of_type(&registry.object(), SlotAccess::Default);

    for ty in sample_types(&registry) {
        let slot = Slot::of_type(&ty, SlotAccess::Default);
        assert_eq!(planner::can_load_as(&slot, &object).unwrap(), 5, "{slot}");
        assert_eq!(planner::can_load_as(&object, &slot).unwrap(), 5, "{slot}");
    }
}

#[test]
fn inheritance_is_one_way() {
    let registry = TypeRegistry::new();
    let shape = CilType::interface("Demo", "IShape").build();
    let base = CilType::class("Demo", "Base")
        .extends(&registry.object())
        .implements(&shape)
        .build();
    let derived = CilType::class("Demo", "Derived").extends(&base).build();
    let point = CilType::value_type("Demo", "Point")
        .extends(&registry.value_type())
        .implements(&shape)
        .build();

    for (from, to) in [(&derived, &base), (&derived, &shape), (&base, &shape), (&point, &shape)] {
        let source = Slot::of_type(from, SlotAccess::Default);
        let dest = Slot::of_type(to, SlotAccess::Default);

        let plan = planner::plan(&source, &dest).unwrap();
        assert_eq!(plan.conversion, Conversion::Upcast);
        assert_eq!(plan.exactness, 2);
        assert!(
            planner::can_load_as(&dest, &source).is_err(),
            "{dest} must not load as {source}"
        );
    }
}

#[test]
fn pointers_are_unsupported() {
    let registry = TypeRegistry::new();
    let pointer = CilType::pointer_to(&registry.int32());
    let void = registry.void();
    let mut others = sample_types(&registry);
    others.push(registry.object());
    others.push(void);

    for ty in &others {
        for access in accesses() {
            let other = Slot::of_type(ty, access);
            let raw = Slot::of_type(&pointer, SlotAccess::Default);
            assert!(matches!(
                planner::can_load_as(&raw, &other),
                Err(Error::UnsupportedConversion { .. })
            ));
            assert!(matches!(
                planner::can_load_as(&other, &raw),
                Err(Error::UnsupportedConversion { .. })
            ));
        }
    }
}

#[test]
fn by_reference_crossings() {
    let registry = TypeRegistry::new();
    let int32 = registry.int32();
    let value = Slot::of_type(&int32, SlotAccess::Default);
    let reference = Slot::of_type(&int32, SlotAccess::Ref);
    let other = Slot::of_type(&registry.int64(), SlotAccess::Ref);

    assert_eq!(
        planner::plan(&value, &reference).unwrap().conversion,
        Conversion::TakeAddress
    );
    assert_eq!(
        planner::plan(&reference, &value).unwrap().conversion,
        Conversion::Dereference
    );
    assert!(matches!(
        planner::can_load_as(&reference, &other),
        Err(Error::UnsupportedConversion { .. })
    ));
    assert!(matches!(
        planner::can_load_as(&value, &Slot::of_type(&registry.int64(), SlotAccess::Default)),
        Err(Error::IllegalConversion { .. })
    ));
}
