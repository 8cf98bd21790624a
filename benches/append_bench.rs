use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::tempdir;
use walcache::{CacheConfig, Cache};

fn bench_append(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let config = CacheConfig {
        cache_dir: dir.path().to_path_buf(),
        ..CacheConfig::default()
    };
    let cache = Cache::open(config).unwrap();
    let payload = vec![0x42u8; 64 * 1024];

    c.bench_function("write_64kib_block", |b| {
        b.iter(|| cache.write(black_box(b"bench-id"), black_box(&payload)).unwrap())
    });
}

criterion_group!(benches, bench_append);
criterion_main!(benches);
