use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::fs;
use std::io::Cursor;
use treebox::compression::Compression;
use treebox::container::{ContainerWriter, WriteOptions};
use treebox::path::ContainerPath;
use treebox::registry::CodecRegistry;
use treebox::tree::{ConvertOptions, TreeSerializer};
use treebox::value::Record;

fn bench_compression(c: &mut Criterion) {
    let data = vec![0u8; 1024 * 1024];

    c.bench_function("zstd_compress_1mb", |b| b.iter(|| Compression::Zstd.compress(black_box(&data), 3)));
    c.bench_function("lz4_compress_1mb", |b| b.iter(|| Compression::Lz4.compress(black_box(&data), 0)));
}

fn bench_write_records(c: &mut Criterion) {
    let data = vec![42u8; 64 * 1024];
    let paths: Vec<ContainerPath> = (0..16)
        .map(|i| ContainerPath::root().child(&format!("r{i}")).unwrap())
        .collect();

    c.bench_function("write_16_identical_records", |b| {
        b.iter(|| {
            let mut w = ContainerWriter::new(Cursor::new(Vec::new()), "bench", WriteOptions::default()).unwrap();
            for path in &paths {
                w.write_record(path, &Record::bytes(black_box(data.as_slice())), None).unwrap();
            }
            w.finalize().unwrap();
        })
    });
}

fn bench_convert_tree(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("tree");
    for d in 0..8 {
        let sub = src.join(format!("d{d}"));
        fs::create_dir_all(&sub).unwrap();
        for f in 0..16 {
            fs::write(sub.join(format!("f{f}.bin")), vec![(d * 16 + f) as u8; 4096]).unwrap();
        }
    }
    let registry = CodecRegistry::with_defaults();

    c.bench_function("convert_128_files", |b| {
        b.iter(|| {
            let mut w = ContainerWriter::new(Cursor::new(Vec::new()), "tree", WriteOptions::default()).unwrap();
            TreeSerializer::new(&registry, ConvertOptions::default())
                .convert(black_box(&src), &mut w, true)
                .unwrap();
            w.finalize().unwrap();
        })
    });
}

criterion_group!(benches, bench_compression, bench_write_records, bench_convert_tree);
criterion_main!(benches);
