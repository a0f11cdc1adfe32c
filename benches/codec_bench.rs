//! Benchmark: decode, encode and decode+encode of the recruitment message,
//! plus a stream of back-to-back copies through decode_stream.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use datafus_codec::{decode_stream, loader, Codec};
use std::path::PathBuf;

const RECRUITMENT_HEX: &str =
    "58c12604b79a01000000000000010100000032000a4a75616e2d426f6d6261427889362ce540000000";
const STREAM_COPIES: usize = 1000;

fn bench_codec(c: &mut Criterion) {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures");
    let codec = match loader::load_dir(&dir) {
        Ok(schema) => Codec::new(schema),
        Err(e) => {
            eprintln!("skip bench: {}: {}", dir.display(), e);
            return;
        }
    };
    let bytes = hex::decode(RECRUITMENT_HEX).unwrap();
    let entity = codec.decode_message(&bytes).unwrap().entity;
    let stream = bytes.repeat(STREAM_COPIES);

    c.bench_function("decode_recruitment", |b| {
        b.iter(|| codec.decode_message(black_box(&bytes)).unwrap())
    });

    c.bench_function("encode_recruitment", |b| {
        b.iter(|| codec.encode_message(black_box(&entity)).unwrap())
    });

    c.bench_function("decode_encode_recruitment", |b| {
        b.iter(|| {
            let decoded = codec.decode_message(black_box(&bytes)).unwrap();
            codec.encode_message(&decoded.entity).unwrap()
        })
    });

    c.bench_function("decode_stream_1000", |b| {
        b.iter(|| {
            let result = decode_stream(&codec, black_box(&stream));
            black_box(result.messages.len())
        })
    });
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
