use std::hint::black_box;

use bencher::{TestCase, TestFile};
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use micro_msrp::codec::TransactionDecoder;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::Decoder;

static SEND_SMALL: TestFile = TestFile::new("send_small.txt", include_str!("../resources/transaction/send_small.txt"));
static SEND_LARGE: TestFile = TestFile::new("send_large.txt", include_str!("../resources/transaction/send_large.txt"));
static RESPONSE: TestFile = TestFile::new("response.txt", include_str!("../resources/transaction/response.txt"));

fn create_test_cases() -> Vec<TestCase> {
    vec![
        TestCase::small("response_decoder", RESPONSE),
        TestCase::small("small_send_decoder", SEND_SMALL),
        TestCase::large("large_send_decoder", SEND_LARGE),
    ]
}

fn benchmark_transaction_decoder(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("transaction_decoder");

    for case in create_test_cases() {
        group.throughput(Throughput::Bytes(case.file().content().len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(case.name()), &case, |b, case| {
            let mut decoder = TransactionDecoder::new();
            b.iter_batched_ref(
                || BytesMut::from(case.file().content()),
                |bytes_mut| {
                    while let Some(frame) = decoder.decode(bytes_mut).expect("input should be a valid msrp transaction") {
                        black_box(frame);
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn benchmark_pipelined_slices(criterion: &mut Criterion) {
    let wire = SEND_LARGE.repeated(16);
    let mut group = criterion.benchmark_group("transaction_decoder_slices");
    group.throughput(Throughput::Bytes(wire.len() as u64));

    for slice in [64, 1500, 16 * 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(slice), &slice, |b, &slice| {
            b.iter(|| {
                let mut decoder = TransactionDecoder::new();
                let mut src = BytesMut::new();
                for piece in wire.as_bytes().chunks(slice) {
                    src.extend_from_slice(piece);
                    while let Some(frame) = decoder.decode(&mut src).expect("input should be a valid msrp transaction") {
                        black_box(frame);
                    }
                }
            });
        });
    }

    group.finish();
}

criterion_group!(decoder, benchmark_transaction_decoder, benchmark_pipelined_slices);
criterion_main!(decoder);
