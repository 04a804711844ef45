//! Benchmarks for the `svnserve` crate.
//!
//! Run with:
//! - `cargo bench`

#![allow(missing_docs)]

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use svnserve::{
    Capability, CapabilitySet, DeltaCodec, SvnUrl, SvndiffCodec, apply_textdelta,
};

fn abort_with_error(message: &str) -> ! {
    eprintln!("{message}");
    std::process::abort();
}

fn peers() -> [(&'static str, CapabilitySet); 3] {
    [
        ("svndiff0", CapabilitySet::default()),
        (
            "svndiff1",
            CapabilitySet::from_capabilities(&[Capability::Svndiff1]),
        ),
        (
            "svndiff2",
            CapabilitySet::from_capabilities(&[Capability::AcceptsSvndiff2]),
        ),
    ]
}

/// Mixed text that compresses, but not to nothing.
fn sample(size: usize) -> Vec<u8> {
    let line = b"fn main() { println!(\"hello\"); }\n";
    (0..size)
        .map(|i| line[i % line.len()] ^ ((i / 997) as u8 & 0x7))
        .collect()
}

fn bench_encode_fulltext(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_fulltext");
    let codec = SvndiffCodec::default();

    for &size in &[4 * 1024usize, 256 * 1024] {
        let contents = sample(size);
        group.throughput(Throughput::Bytes(size as u64));
        for (name, peer) in peers() {
            group.bench_with_input(BenchmarkId::new(name, size), &contents, |b, contents| {
                b.iter(|| {
                    let chunks = match codec.encode_fulltext(black_box(contents), &peer) {
                        Ok(chunks) => chunks,
                        Err(_) => abort_with_error("encode_fulltext failed"),
                    };
                    black_box(chunks.len());
                });
            });
        }
    }

    group.finish();
}

fn bench_textdelta_apply_fulltext(c: &mut Criterion) {
    let mut group = c.benchmark_group("textdelta_apply_fulltext");
    let codec = SvndiffCodec::default();

    for &size in &[4 * 1024usize, 256 * 1024] {
        let contents = sample(size);
        group.throughput(Throughput::Bytes(size as u64));

        for (name, peer) in peers() {
            let chunks = match codec.encode_fulltext(&contents, &peer) {
                Ok(chunks) => chunks,
                Err(_) => abort_with_error("encode_fulltext failed"),
            };

            group.bench_with_input(
                BenchmarkId::new(format!("{name}/apply"), size),
                &chunks,
                |b, chunks| {
                    b.iter(|| {
                        let mut out = Vec::with_capacity(size);
                        if apply_textdelta(&[], chunks.iter(), &mut out).is_err() {
                            abort_with_error("apply_textdelta failed");
                        }
                        black_box(out.len());
                    });
                },
            );

            group.bench_with_input(
                BenchmarkId::new(format!("{name}/decoder"), size),
                &chunks,
                |b, chunks| {
                    b.iter(|| {
                        let mut out = Vec::with_capacity(size);
                        let mut decoder = codec.decoder(Vec::new());
                        for chunk in chunks {
                            if decoder.push(chunk, &mut out).is_err() {
                                abort_with_error("decoder push failed");
                            }
                        }
                        if decoder.finish(&mut out).is_err() {
                            abort_with_error("decoder finish failed");
                        }
                        black_box(out.len());
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_url_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("url_parse");
    for input in [
        "svn://example.com/repo",
        "svn://example.com:3690/repo/trunk/src%20dir",
        "svn://[2001:db8::1]/repo",
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(input), input, |b, input| {
            b.iter(|| {
                let url = match SvnUrl::parse(black_box(input)) {
                    Ok(url) => url,
                    Err(_) => abort_with_error("SvnUrl::parse failed for benchmark input"),
                };
                black_box(url.path);
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_encode_fulltext,
    bench_textdelta_apply_fulltext,
    bench_url_parse
);
criterion_main!(benches);
