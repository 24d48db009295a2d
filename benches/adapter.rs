//! Benchmarks for delegate adaptation and invocation.
//!
//! - Conversion planning over common slot pairs
//! - Building adapted bodies (positional and params binding)
//! - Cache hits
//! - Invoking an adapted delegate on the interpreter

extern crate dotreflect;

use criterion::{criterion_group, criterion_main, Criterion};
use dotreflect::{adapter::planner, prelude::*};
use std::hint::black_box;

fn add_method(registry: &TypeRegistry) -> MethodRc {
    let math = CilType::class("Bench", "Math")
        .extends(&registry.object())
        .build();
    MethodDesc::builder("Add", &math)
        .static_method()
        .param("a", &registry.int32())
        .param("b", &registry.int32())
        .returns(&registry.int32())
        .native(|_, args| Ok(Some(EmValue::I32(args[0].as_i32()? + args[1].as_i32()?))))
        .build()
}

/// Benchmark planning int32 -> object (boxing).
fn bench_plan_boxing(c: &mut Criterion) {
    let registry = TypeRegistry::new();
    let source = Slot::of_type(&registry.int32(), SlotAccess::Default);
    let dest = Slot::of_type(&registry.object(), SlotAccess::Default);

    c.bench_function("plan_int32_to_object", |b| {
        b.iter(|| black_box(planner::plan(black_box(&source), black_box(&dest)).unwrap()));
    });
}

/// Benchmark adapting `int Add(int, int)` to its natural shape.
fn bench_adapt_positional(c: &mut Criterion) {
    let registry = TypeRegistry::new();
    let add = add_method(&registry);
    let shape = DelegateSignature::of_method(&add);
    let adapter = MethodAdapter::new(&registry);

    c.bench_function("adapt_positional", |b| {
        b.iter(|| black_box(adapter.adapt(black_box(&add), black_box(&shape)).unwrap()));
    });
}

/// Benchmark adapting `int Add(int, int)` to `(object, object[]) -> object`.
fn bench_adapt_params(c: &mut Criterion) {
    let registry = TypeRegistry::new();
    let add = add_method(&registry);
    let shape = DelegateSignature::new(
        &registry.object(),
        vec![
            SignatureParam::value(&registry.object()),
            SignatureParam::value(&registry.object_array()),
        ],
    );
    let adapter = MethodAdapter::new(&registry);

    c.bench_function("adapt_params", |b| {
        b.iter(|| black_box(adapter.adapt(black_box(&add), black_box(&shape)).unwrap()));
    });
}

/// Benchmark a warm cache lookup.
fn bench_cache_hit(c: &mut Criterion) {
    let registry = TypeRegistry::new();
    let add = add_method(&registry);
    let shape = DelegateSignature::of_method(&add);
    let cache = DelegateCache::new(registry);
    cache.get_or_adapt(&add, &shape).unwrap();

    c.bench_function("cache_hit", |b| {
        b.iter(|| black_box(cache.get_or_adapt(black_box(&add), black_box(&shape)).unwrap()));
    });
}

/// Benchmark invoking the positional adaptation.
fn bench_invoke(c: &mut Criterion) {
    let registry = TypeRegistry::new();
    let add = add_method(&registry);
    let shape = DelegateSignature::of_method(&add);
    let delegate = MethodAdapter::new(&registry).adapt(&add, &shape).unwrap();
    let mut runtime = Runtime::with_registry(registry).with_limits(ExecutionLimits::unlimited());

    c.bench_function("invoke_add", |b| {
        b.iter(|| {
            let mut args = [EmValue::I32(2), EmValue::I32(3)];
            black_box(delegate.invoke(&mut runtime, black_box(&mut args)).unwrap())
        });
    });
}

criterion_group!(
    benches,
    bench_plan_boxing,
    bench_adapt_positional,
    bench_adapt_params,
    bench_cache_hit,
    bench_invoke
);
criterion_main!(benches);
