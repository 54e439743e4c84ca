use bytes::BytesMut;
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use russound_rio::ZoneId;
use russound_rio::protocol::{Command, RioCodec, parse_line};
use tokio_util::codec::{Decoder, Encoder};

fn parse_benchmark(c: &mut Criterion) {
    let lines = [
        "S C[1].Z[1].name=\"Kitchen\"",
        "N C[2].Z[14].volume=\"25\"",
        "N S[3].B[2].P[6].name=\"Classic FM\"",
        "E Invalid command",
        "S",
    ];

    let mut group = c.benchmark_group("parse_line");
    group.throughput(Throughput::Elements(lines.len() as u64));
    group.bench_function("mixed", |b| {
        b.iter(|| {
            for line in &lines {
                black_box(parse_line(black_box(line)));
            }
        });
    });
    group.finish();
}

fn codec_benchmark(c: &mut Criterion) {
    // A WATCH dump: one notification per zone variable, then the outcome
    let mut wire = String::new();
    for zone in 1..=16 {
        for (name, value) in [("name", "Zone"), ("volume", "20"), ("status", "ON")] {
            wire.push_str(&format!("N C[1].Z[{zone}].{name}=\"{value}\"\r\n"));
        }
    }
    wire.push_str("S\r\n");

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Bytes(wire.len() as u64));
    group.bench_function("decode_watch_dump", |b| {
        b.iter(|| {
            let mut codec = RioCodec::new();
            let mut buf = BytesMut::from(wire.as_bytes());
            let mut count = 0;
            while let Ok(Some(line)) = codec.decode(&mut buf) {
                black_box(parse_line(&line));
                count += 1;
            }
            count
        });
    });
    group.finish();

    let zone = ZoneId::new(1, 1).unwrap();
    let command = Command::set(zone, "volume", "30").to_string();
    c.bench_function("codec_encode_set", |b| {
        b.iter(|| {
            let mut codec = RioCodec::new();
            let mut buf = BytesMut::with_capacity(64);
            codec.encode(black_box(command.as_str()), &mut buf).unwrap();
            buf
        });
    });
}

criterion_group!(benches, parse_benchmark, codec_benchmark);
criterion_main!(benches);
