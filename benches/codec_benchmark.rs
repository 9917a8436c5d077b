// Codec hot-path benchmarks: frame encoding and response decoding
use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use memwire::codec::KvCodec;
use memwire::payload::Payload;
use memwire::protocol::{RawResponse, STATUS_SUCCESS};
use memwire::request::{Operation, Request};
use rand::{Rng, distributions::Alphanumeric};

fn random_bytes(len: usize) -> Bytes {
    let body: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect();
    Bytes::from(body)
}

fn bench_encode_upsert(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_upsert");
    for size in [64usize, 1024, 16 * 1024] {
        let value = random_bytes(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &value, |b, value| {
            let mut codec = KvCodec::new("default", "bench", false);
            let mut opaque = 0u32;
            b.iter(|| {
                let frame = codec.encode(Request::new(
                    opaque,
                    17,
                    "default",
                    Operation::Upsert {
                        key: Bytes::from_static(b"bench-key"),
                        flags: 0,
                        expiry: 0,
                        payload: Payload::new(value.clone()),
                    },
                ));
                black_box(&frame);
                // Complete the request so the queue stays flat.
                codec
                    .decode(RawResponse {
                        opcode: 0,
                        status: STATUS_SUCCESS,
                        opaque,
                        cas: 1,
                        extras: Bytes::new(),
                        key: Bytes::new(),
                        value: Bytes::new(),
                    })
                    .expect("decode");
                opaque = opaque.wrapping_add(1);
            });
        });
    }
    group.finish();
}

fn bench_decode_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_get");
    for size in [64usize, 1024, 16 * 1024] {
        let value = random_bytes(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &value, |b, value| {
            let mut codec = KvCodec::new("default", "bench", false);
            let mut opaque = 0u32;
            b.iter(|| {
                codec.encode(Request::new(
                    opaque,
                    17,
                    "default",
                    Operation::Get {
                        key: Bytes::from_static(b"bench-key"),
                    },
                ));
                let decoded = codec
                    .decode(RawResponse {
                        opcode: 0,
                        status: STATUS_SUCCESS,
                        opaque,
                        cas: 1,
                        extras: Bytes::from_static(&[0, 0, 0, 2]),
                        key: Bytes::new(),
                        value: value.clone(),
                    })
                    .expect("decode");
                black_box(&decoded);
                opaque = opaque.wrapping_add(1);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode_upsert, bench_decode_get);
criterion_main!(benches);
