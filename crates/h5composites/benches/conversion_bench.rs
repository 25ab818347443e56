//! Benchmarks for datatype conversion and buffered dataset I/O.

use criterion::{criterion_group, criterion_main, Criterion};
use h5composites::conversion::convert_block;
use h5composites::{
    common_dtype, to_buffer, DType, ElementBlock, H5File, StaticH5DType, TypedReader, Writer,
};

const N: usize = 100_000;

fn u16_block() -> ElementBlock {
    let data: Vec<u8> = (0..N as u16).flat_map(|v| v.to_le_bytes()).collect();
    ElementBlock::new(DType::native_u16(), N, data, Default::default()).unwrap()
}

fn bench_numeric_conversion(c: &mut Criterion) {
    let block = u16_block();
    let target = DType::native_f64();
    c.bench_function("convert_100k_u16_to_f64", |b| {
        b.iter(|| convert_block(&block, &target).unwrap())
    });
}

fn bench_compound_conversion(c: &mut Criterion) {
    let src = <(u32, f32, [u8; 4])>::static_h5_dtype();
    let tgt = <(u64, f64, [u16; 4])>::static_h5_dtype();
    let value = to_buffer(&(7u32, 1.5f32, [1u8, 2, 3, 4])).unwrap();
    let mut data = Vec::with_capacity(N * value.bytes().len());
    for _ in 0..N {
        data.extend_from_slice(value.bytes());
    }
    let block = ElementBlock::new(src, N, data, Default::default()).unwrap();
    c.bench_function("convert_100k_compounds", |b| {
        b.iter(|| convert_block(&block, &tgt).unwrap())
    });
}

fn bench_common_dtype(c: &mut Criterion) {
    let dtypes = [
        <(u8, i16, f32)>::static_h5_dtype(),
        <(i8, u16, i32)>::static_h5_dtype(),
        <(u32, i8, f64)>::static_h5_dtype(),
    ];
    c.bench_function("common_dtype_3_compounds", |b| {
        b.iter(|| common_dtype(&dtypes).unwrap())
    });
}

fn bench_write_read_rows(c: &mut Criterion) {
    let dir = std::env::temp_dir();
    let path = dir.join("bench_h5composites_rows.h5");
    c.bench_function("write_then_read_100k_f64_rows", |b| {
        b.iter(|| {
            let file = H5File::create(&path, true).unwrap();
            {
                let mut writer = Writer::new(&file.root(), "values", DType::native_f64()).unwrap();
                writer.write_all((0..N).map(|i| i as f64)).unwrap();
            }
            let ds = file.root().dataset("values").unwrap();
            TypedReader::<f64>::new(&ds, None)
                .unwrap()
                .map(|v| v.unwrap())
                .sum::<f64>()
        })
    });
    let _ = std::fs::remove_file(&path);
}

criterion_group!(
    benches,
    bench_numeric_conversion,
    bench_compound_conversion,
    bench_common_dtype,
    bench_write_read_rows
);
criterion_main!(benches);
