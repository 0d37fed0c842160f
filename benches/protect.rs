extern crate ircloak;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use ircloak::{
    emulation::{Process, RtValue},
    ir::{Constant, Global, IrType, Module, ModuleBuilder, Value},
    obfuscation::{ObfuscationEngine, ProtectionConfig},
};
use std::hint::black_box;

/// A module with `functions` functions, each reading its own string and one
/// string it shares with the next function through a table.
fn build_module(functions: usize, len: usize) -> Module {
    let mut mb = ModuleBuilder::new("bench");
    let text: String = (0..len).map(|i| char::from(b'a' + (i % 26) as u8)).collect();

    for i in 0..functions {
        let own = mb.global(Global::new(".str", Constant::c_string(&text)));
        let table = mb.global(Global::new(
            "table",
            Constant::Array {
                elem: IrType::Ptr,
                elements: vec![Constant::Global(own)],
            },
        ));
        mb.function(format!("f{i}"), vec![], IrType::I8, |fb| {
            let entry = fb.ins().element_ptr(IrType::Ptr, Value::global(table), 0)?;
            let string = fb.ins().load(IrType::Ptr, entry)?;
            let first = fb.ins().load(IrType::I8, string)?;
            fb.ins().ret(Some(first))?;
            Ok(())
        })
        .expect("bench fixture builds");
    }
    mb.finish()
}

/// Benchmark a full engine run over modules of growing size.
fn bench_process_module(c: &mut Criterion) {
    let engine = ObfuscationEngine::new(ProtectionConfig::default().with_seed(0x1234));

    let mut group = c.benchmark_group("process_module");
    for functions in [8usize, 64, 256] {
        group.throughput(Throughput::Elements(functions as u64));
        group.bench_with_input(BenchmarkId::from_parameter(functions), &functions, |b, &n| {
            b.iter_batched(
                || build_module(n, 64),
                |mut module| {
                    let result = engine.process_module(black_box(&mut module)).unwrap();
                    black_box(result)
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

/// Benchmark the first (decrypting) and later (guarded) entries of a protected function.
fn bench_guarded_entry(c: &mut Criterion) {
    let mut module = build_module(1, 256);
    ObfuscationEngine::new(ProtectionConfig::default().with_seed(7))
        .process_module(&mut module)
        .unwrap();
    let function = module.function_by_name("f0").unwrap();

    let mut group = c.benchmark_group("guarded_entry");
    group.bench_function("first_call", |b| {
        b.iter_batched(
            || Process::new(&module),
            |process| black_box(process.call(function, &[]).unwrap()),
            BatchSize::SmallInput,
        );
    });
    let warm = Process::new(&module);
    warm.call(function, &[]).unwrap();
    group.bench_function("later_call", |b| {
        b.iter(|| {
            let value: RtValue = warm.call(black_box(function), &[]).unwrap();
            black_box(value)
        });
    });
    group.finish();
}

criterion_group!(benches, bench_process_module, bench_guarded_entry);
criterion_main!(benches);
