use std::io::Cursor;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use gitwire_protocol::pktline::{PktReader, PktWriter, MAX_PKT_DATA_LEN};

fn frame_throughput(c: &mut Criterion) {
    let payload = vec![0xABu8; MAX_PKT_DATA_LEN];
    let mut encoded = Vec::new();
    {
        let mut writer = PktWriter::new(&mut encoded);
        writer.write_data(&payload).unwrap();
    }

    let mut group = c.benchmark_group("pktline");
    group.throughput(Throughput::Bytes(payload.len() as u64));

    group.bench_function("write_max_frame", |b| {
        b.iter(|| {
            let mut buf = Vec::with_capacity(encoded.len());
            let mut writer = PktWriter::new(&mut buf);
            writer.write_data(black_box(&payload)).unwrap();
            buf
        })
    });

    group.bench_function("read_max_frame", |b| {
        b.iter(|| {
            let mut reader = PktReader::new(Cursor::new(black_box(&encoded)));
            reader.read_line().unwrap().unwrap().wire_len()
        })
    });

    group.finish();
}

fn small_lines(c: &mut Criterion) {
    let mut encoded = Vec::new();
    {
        let mut writer = PktWriter::new(&mut encoded);
        for _ in 0..64 {
            writer
                .write_text("want 95d09f2b10159347eece71399a7e2e907ea3df4f")
                .unwrap();
        }
        writer.write_flush().unwrap();
    }

    c.bench_function("pktline_read_64_want_lines", |b| {
        b.iter(|| {
            let mut reader = PktReader::new(Cursor::new(black_box(&encoded)));
            let mut count = 0;
            while let Some(pkt) = reader.read_line().unwrap() {
                if pkt.data().is_some() {
                    count += 1;
                }
            }
            count
        })
    });
}

criterion_group!(benches, frame_throughput, small_lines);
criterion_main!(benches);
