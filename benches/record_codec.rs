use std::io::Write;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use flate2::write::GzEncoder;
use flate2::Compression;

use cmdcache::record::{Record, StreamTag};
use cmdcache::storage::{RecordReader, RecordWriter};

const RECORDS: usize = 1_000;

fn sample_records() -> Vec<Record> {
    let line = b"Compiling cmdcache v0.1.0 (/src/cmdcache)\n";
    let mut records: Vec<Record> = (0..RECORDS)
        .map(|i| {
            let tag = if i % 4 == 0 { StreamTag::StdErr } else { StreamTag::StdOut };
            Record::output(tag, (i % 50) as u32, &line[..])
        })
        .collect();
    records.push(Record::exit_status(0));
    records
}

fn encode(records: &[Record]) -> Vec<u8> {
    let mut writer = RecordWriter::new(Vec::new()).unwrap();
    for record in records {
        writer.write_record(record).unwrap();
    }
    writer.into_inner()
}

fn bench_encode(c: &mut Criterion) {
    let records = sample_records();
    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(records.len() as u64));

    group.bench_function("raw", |b| {
        b.iter(|| black_box(encode(black_box(&records))));
    });

    group.bench_function("gzip", |b| {
        b.iter(|| {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&encode(black_box(&records))).unwrap();
            black_box(encoder.finish().unwrap())
        });
    });

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let bytes = encode(&sample_records());
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("raw", |b| {
        b.iter(|| {
            let reader = RecordReader::open(black_box(bytes.as_slice())).unwrap();
            black_box(reader.count())
        });
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
