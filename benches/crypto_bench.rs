use std::io::Write;

use coffer::crypto::{generate_salt, CryptoContext};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_crypto(c: &mut Criterion) {
    let ctx = CryptoContext::new("hunter2", generate_salt());
    // Force key derivation once up front so the benchmark measures the
    // stream cipher, not scrypt (which is deliberately slow and would
    // otherwise dominate every iteration).
    let _ = ctx.writer(std::io::sink()).unwrap();

    let data = vec![0u8; 1024 * 1024];
    c.bench_function("aes256_ofb_encrypt_1mb", |b| {
        b.iter(|| {
            let mut out = Vec::with_capacity(data.len());
            let mut w = ctx.writer(&mut out).unwrap();
            w.write_all(black_box(&data)).unwrap();
        })
    });
}

criterion_group!(benches, bench_crypto);
criterion_main!(benches);
