//! Performance benchmarks for mote-crypto.
//!
//! Run with: `cargo bench -p mote-crypto`

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use mote_crypto::hkdf::{HashFunction, hkdf_extract};
use mote_crypto::{AeadAlgorithm, KeyAgreementAlgorithm, derive_context};

fn bench_hkdf_expand(c: &mut Criterion) {
    let mut group = c.benchmark_group("hkdf_expand");

    for hash in [HashFunction::Sha256, HashFunction::Sha512] {
        let prk = hkdf_extract(hash, Some(b"salt".as_slice()), &[0x42; 32]);
        let mut output = [0u8; 32];

        group.throughput(Throughput::Bytes(output.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(format!("{hash:?}")), &hash, |b, _| {
            b.iter(|| prk.expand(black_box(b"info"), &mut output))
        });
    }

    group.finish();
}

fn bench_derive_context(c: &mut Criterion) {
    let mut group = c.benchmark_group("derive_context");
    let secret = [0x42u8; 32];

    for key_agreement in KeyAgreementAlgorithm::ALL {
        group.bench_with_input(
            BenchmarkId::from_parameter(key_agreement),
            &key_agreement,
            |b, &key_agreement| {
                b.iter(|| {
                    derive_context(
                        black_box(&secret),
                        b"client",
                        b"server",
                        None,
                        AeadAlgorithm::AesCcm64_64_128,
                        key_agreement,
                    )
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_hkdf_expand, bench_derive_context);
criterion_main!(benches);
