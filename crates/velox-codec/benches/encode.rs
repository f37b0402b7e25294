use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;

use velox_codec::{Compiler, RawList, TypeDescr};

fn bench_list_i64(c: &mut Criterion) {
    let compiler = Compiler::new();
    let descr = Arc::new(TypeDescr::list(Arc::new(TypeDescr::i64())));
    let enc = compiler.compile(&descr).unwrap();

    let xs: Vec<i64> = (0..1024).collect();
    let raw = RawList::from_slice(&xs);

    let mut group = c.benchmark_group("encode_list_i64");
    group.throughput(Throughput::Bytes((xs.len() * 8) as u64));
    group.bench_function("1024_elements", |b| {
        b.iter(|| unsafe {
            enc.encode(black_box(&raw as *const RawList as *const u8))
                .unwrap()
        });
    });
    group.finish();
}

fn bench_list_string(c: &mut Criterion) {
    let compiler = Compiler::new();
    let descr = Arc::new(TypeDescr::list(Arc::new(TypeDescr::string())));
    let enc = compiler.compile(&descr).unwrap();

    let strings: Vec<String> = (0..256).map(|i| format!("element-{i:04}")).collect();
    let cells: Vec<RawList> = strings.iter().map(|s| RawList::from_str(s)).collect();
    let raw = RawList::from_slice(&cells);

    c.bench_function("encode_list_string_256", |b| {
        b.iter(|| unsafe {
            enc.encode(black_box(&raw as *const RawList as *const u8))
                .unwrap()
        });
    });
}

fn bench_compile_cached(c: &mut Criterion) {
    let compiler = Compiler::new();
    let descr = Arc::new(TypeDescr::list(Arc::new(TypeDescr::i32())));
    compiler.compile(&descr).unwrap();

    c.bench_function("compile_cache_hit", |b| {
        b.iter(|| compiler.compile(black_box(&descr)).unwrap());
    });
}

criterion_group!(
    benches,
    bench_list_i64,
    bench_list_string,
    bench_compile_cached
);
criterion_main!(benches);
