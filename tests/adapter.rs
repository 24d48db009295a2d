//! End-to-end adaptation tests.
//!
//! Each test describes a callee, adapts it to a delegate shape and invokes the result on
//! a fresh runtime, checking both the emitted listing and the observed behavior.

use std::sync::Arc;

use dotreflect::{
    adapter::planner,
    prelude::*,
    runtime::StructValue,
};

fn ops(delegate: &AdaptedDelegate) -> Vec<String> {
    delegate
        .stream()
        .iter()
        .filter(|entry| entry.instruction().is_op())
        .filter_map(|entry| {
            entry
                .to_string()
                .split_once(": ")
                .map(|(_, op)| op.to_string())
        })
        .collect()
}

/// `static int Add(int a, int b)` with a CIL body, adapted to `(int, int)->int`.
#[test]
fn static_add_passes_arguments_through() -> Result<()> {
    let registry = TypeRegistry::new();
    let int32 = registry.int32();
    let math = CilType::class("Demo", "Math")
        .extends(&registry.object())
        .build();

    let mut emitter = Emitter::new(&registry);
    emitter.ldarg(0)?;
    emitter.ldarg(1)?;
    emitter.op(OpCode::Add)?;
    emitter.ret(true)?;
    let (body, _) = emitter.finalize()?;

    let add = MethodDesc::builder("Add", &math)
        .static_method()
        .param("a", &int32)
        .param("b", &int32)
        .returns(&int32)
        .il(Arc::new(body))
        .build();
    let shape = DelegateSignature::new(&int32, vec![SignatureParam::value(&int32); 2]);

    let delegate = MethodAdapter::new(&registry).adapt(&add, &shape)?;
    assert_eq!(
        ops(&delegate),
        vec![
            "ldarg.0",
            "ldarg.1",
            "call System.Int32 Demo.Math::Add(System.Int32, System.Int32)",
            "ret"
        ]
    );
    for param in shape.params() {
        let slot = Slot::of_type(&param.ty, param.access);
        assert_eq!(planner::can_load_as(&slot, &slot)?, 0);
    }

    let mut runtime = Runtime::with_registry(registry);
    let result = delegate.invoke(&mut runtime, &mut [EmValue::I32(2), EmValue::I32(3)])?;
    assert_eq!(result, Some(EmValue::I32(5)));
    Ok(())
}

/// `void Counter.Increment()` on a value type, adapted to `(ref Counter)->void`.
#[test]
fn value_type_receiver_is_passed_by_reference() -> Result<()> {
    let registry = TypeRegistry::new();
    let counter = CilType::value_type("Demo", "Counter")
        .extends(&registry.value_type())
        .field("Value", &registry.int32())
        .build();
    let increment = MethodDesc::builder("Increment", &counter)
        .native(|ctx, args| {
            let value = ctx.field(&args[0], "Value")?.as_i32()?;
            ctx.set_field(&args[0], "Value", EmValue::I32(value + 1))?;
            Ok(None)
        })
        .build();
    let shape = DelegateSignature::new(&registry.void(), vec![SignatureParam::by_ref(&counter)]);
    assert_eq!(shape, DelegateSignature::of_method(&increment));

    let delegate = MethodAdapter::new(&registry).adapt(&increment, &shape)?;
    let listing = ops(&delegate);
    assert_eq!(listing[0], "ldarg.0");
    assert!(listing[1].starts_with("call "));

    let mut runtime = Runtime::with_registry(registry);
    let mut args = [EmValue::default_for(&counter)];
    delegate.invoke(&mut runtime, &mut args)?;
    delegate.invoke(&mut runtime, &mut args)?;

    assert_eq!(
        args[0],
        EmValue::Struct(StructValue {
            ty: counter.clone(),
            fields: vec![EmValue::I32(2)],
        })
    );
    Ok(())
}

/// `static string Describe(object o)` adapted to `(int)->string` boxes the argument.
#[test]
fn value_argument_is_boxed_for_object_parameter() -> Result<()> {
    let registry = TypeRegistry::new();
    let text = CilType::class("Demo", "Text")
        .extends(&registry.object())
        .build();
    let describe = MethodDesc::builder("Describe", &text)
        .static_method()
        .param("o", &registry.object())
        .returns(&registry.string())
        .native(|ctx, args| {
            let description = format!("<{}>", ctx.render(&args[0]));
            Ok(Some(ctx.alloc_string(&description)?))
        })
        .build();
    let shape = DelegateSignature::new(
        &registry.string(),
        vec![SignatureParam::value(&registry.int32())],
    );

    let source = Slot::of_type(&registry.int32(), SlotAccess::Default);
    let dest = Slot::of_type(&registry.object(), SlotAccess::Default);
    assert_eq!(planner::can_load_as(&source, &dest)?, 5);

    let delegate = MethodAdapter::new(&registry).adapt(&describe, &shape)?;
    assert!(ops(&delegate).contains(&"box System.Int32".to_string()));

    let mut runtime = Runtime::with_registry(registry);
    let result = delegate
        .invoke(&mut runtime, &mut [EmValue::I32(42)])?
        .unwrap_or(EmValue::Null);
    assert_eq!(runtime.string(&result)?, "<42>");
    Ok(())
}

/// A three-parameter static method adapted to `(object, object[])->object` binds through
/// the array and checks its length only when invoked.
#[test]
fn params_array_length_is_checked_at_call_time() -> Result<()> {
    let registry = TypeRegistry::new();
    let int32 = registry.int32();
    let math = CilType::class("Demo", "Math")
        .extends(&registry.object())
        .build();
    let sum = MethodDesc::builder("Sum", &math)
        .static_method()
        .param("a", &int32)
        .param("b", &int32)
        .param("c", &int32)
        .returns(&int32)
        .native(|_, args| {
            let total = args
                .iter()
                .map(EmValue::as_i32)
                .sum::<Result<i32>>()?;
            Ok(Some(EmValue::I32(total)))
        })
        .build();
    let shape = DelegateSignature::new(
        &registry.object(),
        vec![
            SignatureParam::value(&registry.object()),
            SignatureParam::value(&registry.object_array()),
        ],
    );

    let delegate = MethodAdapter::new(&registry).adapt(&sum, &shape)?;
    let listing = ops(&delegate);
    assert_eq!(listing[0], "ldarg.1");
    assert_eq!(listing[1], "ldlen");
    assert_eq!(
        listing.iter().filter(|op| *op == "ldelem.ref").count(),
        3
    );
    assert!(delegate
        .listing()
        .contains("throw new System.Reflection.TargetParameterCountException"));

    let mut runtime = Runtime::with_registry(registry.clone());
    let mut boxed = Vec::new();
    for value in [1, 2, 3] {
        boxed.push(runtime.box_value(&int32, EmValue::I32(value))?);
    }

    let three = runtime.alloc_array(&registry.object(), boxed.clone())?;
    let result = delegate
        .invoke(&mut runtime, &mut [EmValue::Null, three])?
        .unwrap_or(EmValue::Null);
    assert_eq!(runtime.render(&result), "6");

    let two = runtime.alloc_array(&registry.object(), boxed[..2].to_vec())?;
    let err = delegate
        .invoke(&mut runtime, &mut [EmValue::Null, two])
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ManagedException { ref type_name, .. }
            if type_name == "System.Reflection.TargetParameterCountException"
    ));
    Ok(())
}

/// Unrelated value types cannot be converted; adaptation fails before anything runs.
#[test]
fn unrelated_value_types_are_illegal() {
    let registry = TypeRegistry::new();
    let source = Slot::of_type(&registry.date_time(), SlotAccess::Default);
    let dest = Slot::of_type(&registry.guid(), SlotAccess::Default);
    assert!(matches!(
        planner::can_load_as(&source, &dest),
        Err(Error::IllegalConversion { .. })
    ));

    let ids = CilType::class("Demo", "Ids").build();
    let store = MethodDesc::builder("Store", &ids)
        .static_method()
        .param("id", &registry.guid())
        .build();
    let shape = DelegateSignature::new(
        &registry.void(),
        vec![SignatureParam::value(&registry.date_time())],
    );

    let err = MethodAdapter::new(&registry)
        .adapt(&store, &shape)
        .unwrap_err();
    assert!(matches!(err, Error::AdaptationFailed { .. }));
    assert!(matches!(err.root_cause(), Error::IllegalConversion { .. }));
    assert!(err.to_string().contains("Demo.Ids"));
}

/// Reference receivers are cast from `object`, null receivers throw at the call.
#[test]
fn virtual_call_on_null_receiver_throws() -> Result<()> {
    let registry = TypeRegistry::new();
    let widget = CilType::class("Demo", "Widget")
        .extends(&registry.object())
        .build();
    let name = MethodDesc::builder("Name", &widget)
        .virtual_method()
        .returns(&registry.string())
        .native(|ctx, _| Ok(Some(ctx.alloc_string("widget")?)))
        .build();
    let shape = DelegateSignature::new(
        &registry.object(),
        vec![SignatureParam::value(&registry.object())],
    );

    let delegate = MethodAdapter::new(&registry).adapt(&name, &shape)?;
    let mut runtime = Runtime::with_registry(registry);

    let err = delegate
        .invoke(&mut runtime, &mut [EmValue::Null])
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ManagedException { ref type_name, .. } if type_name == "System.NullReferenceException"
    ));

    let text = runtime.alloc_string("not a widget")?;
    let err = delegate.invoke(&mut runtime, &mut [text]).unwrap_err();
    assert!(matches!(
        err,
        Error::ManagedException { ref type_name, .. } if type_name == "System.InvalidCastException"
    ));
    Ok(())
}

/// The cache hands out one delegate per (method, shape) and adapts batches in parallel.
#[test]
fn cached_delegates_are_shared() -> Result<()> {
    let registry = TypeRegistry::new();
    let math = CilType::class("Demo", "Math").build();
    let twice = MethodDesc::builder("Twice", &math)
        .static_method()
        .param("value", &registry.int64())
        .returns(&registry.int64())
        .native(|_, args| Ok(Some(EmValue::I64(args[0].as_i64()? * 2))))
        .build();
    let shapes = vec![
        DelegateSignature::of_method(&twice),
        DelegateSignature::new(&registry.object(), vec![SignatureParam::value(&registry.object())]),
    ];
    let requests: Vec<_> = shapes
        .iter()
        .map(|shape| (twice.clone(), shape.clone()))
        .collect();

    let cache = DelegateCache::new(registry.clone());
    let delegates = cache.adapt_all(&requests);
    assert_eq!(cache.len(), 2);

    let boxed_shape = cache.get_or_adapt(&twice, &shapes[1])?;
    let first = delegates[1].as_ref().map_err(Clone::clone)?;
    assert!(Arc::ptr_eq(first, &boxed_shape));

    let mut runtime = Runtime::with_registry(registry.clone());
    let boxed = runtime.box_value(&registry.int64(), EmValue::I64(21))?;
    let result = boxed_shape
        .invoke(&mut runtime, &mut [boxed])?
        .unwrap_or(EmValue::Null);
    assert_eq!(runtime.render(&result), "42");
    Ok(())
}
