use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gitwire_hash::hex::{hex_decode, hex_to_string};
use gitwire_hash::ObjectId;

fn hex_encode_decode(c: &mut Criterion) {
    let bytes = [
        0xde, 0xad, 0xbe, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x00, 0x11,
        0x22, 0x33, 0x44, 0x55, 0x66, 0x77,
    ];
    let hex = hex_to_string(&bytes);

    let mut group = c.benchmark_group("hex");

    group.bench_function("encode_20bytes", |b| b.iter(|| hex_to_string(black_box(&bytes))));

    group.bench_function("decode_40chars", |b| {
        b.iter(|| {
            let mut buf = [0u8; 20];
            hex_decode(black_box(hex.as_bytes()), &mut buf).unwrap();
            buf
        })
    });

    group.finish();
}

fn oid_parse(c: &mut Criterion) {
    let hex = "da39a3ee5e6b4b0d3255bfef95601890afd80709";
    c.bench_function("oid_from_hex", |b| b.iter(|| ObjectId::from_hex(black_box(hex)).unwrap()));
}

criterion_group!(benches, hex_encode_decode, oid_parse);
criterion_main!(benches);
