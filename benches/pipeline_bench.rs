//! Benchmarks for the host-side pipeline: cache keys and signature extraction

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use nativecall::compiler::{BuildConfig, BuildUnit};
use nativecall::project::DependencySpec;
use nativecall::{BuildMode, CacheKey, SignatureExtractor};

/// Benchmark key derivation for varying source sizes
fn bench_cache_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_key");

    for &functions in &[1, 16, 128] {
        let source = create_source(functions);
        group.throughput(Throughput::Bytes(source.len() as u64));

        group.bench_function(format!("unit_{}_fns", functions), |b| {
            b.iter(|| {
                let unit = BuildUnit::new(&source, BuildConfig::default());
                black_box(CacheKey::for_unit(&unit))
            })
        });
    }

    let source = create_source(16);
    let deps = vec![
        DependencySpec::new("serde")
            .with_version("1.0")
            .with_features(["derive"]),
        DependencySpec::new("itoa").with_version("1"),
    ];
    let config = BuildConfig::default();
    group.bench_function("project_16_fns", |b| {
        b.iter(|| black_box(CacheKey::for_project(&source, &deps, BuildMode::Release, &config)))
    });

    group.finish();
}

/// Benchmark marker scanning and signature parsing
fn bench_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("extraction");
    let extractor = SignatureExtractor::new();

    for &functions in &[1, 16, 128] {
        let source = create_source(functions);
        group.throughput(Throughput::Elements(functions as u64));

        group.bench_function(format!("{}_fns", functions), |b| {
            b.iter(|| black_box(extractor.extract_items(&source)))
        });
    }

    group.finish();
}

fn create_source(functions: usize) -> String {
    let mut source = String::from(
        "#[export]\npub struct Point { pub x: f64, pub y: f64 }\n\n",
    );
    for i in 0..functions {
        let item = match i % 3 {
            0 => format!("#[export]\nfn add_{i}(a: i32, b: i32) -> i32 {{ a + b }}\n\n"),
            1 => format!(
                "#[export]\npub fn lookup_{i}(map: HashMap<String, Vec<(u8, u16)>>, key: &str) -> Option<u16> {{\n    map.get(key)?.first().map(|p| p.1)\n}}\n\n"
            ),
            _ => format!(
                "#[export]\nfn checked_{i}(a: u64, b: u64) -> Result<u64, u8> {{\n    a.checked_div(b).ok_or(1)\n}}\n\n"
            ),
        };
        source.push_str(&item);
    }
    source
}

criterion_group!(benches, bench_cache_key, bench_extraction);
criterion_main!(benches);
