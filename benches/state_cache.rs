//! Benchmarks for the state cache hot paths: lookup, insert, and the
//! tier-aware eviction sweep.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use tokio::runtime::Runtime;

use sightline::domain::models::config::CacheConfig;
use sightline::domain::models::SourceFlags;
use sightline::{CoverLevel, EntityRef, Position, PositionState, StateCache, VisibilityLevel};

fn entity(id: &str, x: f64) -> EntityRef {
    EntityRef::new(id, Position::new(x, 0.0))
}

fn snapshot(observer: &str, visibility: VisibilityLevel, cover: CoverLevel) -> PositionState {
    PositionState::from_sources(
        observer,
        "rogue",
        visibility,
        true,
        cover,
        true,
        None,
        SourceFlags::both(),
    )
}

fn bench_get_hit(c: &mut Criterion) {
    let runtime = Runtime::new().expect("runtime");
    let cache = StateCache::new(CacheConfig::default());
    let observer = entity("guard-0", 0.0);
    let subject = entity("rogue", 50.0);

    runtime.block_on(cache.put(
        &observer,
        &subject,
        snapshot("guard-0", VisibilityLevel::Hidden, CoverLevel::None),
        Some(Duration::from_secs(600)),
    ));

    c.bench_function("cache_get_hit", |b| {
        b.to_async(&runtime)
            .iter(|| async { cache.get(&observer, &subject).await });
    });
}

fn bench_put(c: &mut Criterion) {
    let runtime = Runtime::new().expect("runtime");
    let cache = StateCache::new(CacheConfig {
        max_entries: 100_000,
        ..CacheConfig::default()
    });
    let subject = entity("rogue", 50.0);

    c.bench_function("cache_put", |b| {
        let mut i = 0u64;
        b.to_async(&runtime).iter(|| {
            i += 1;
            let observer = entity(&format!("guard-{i}"), i as f64);
            let state = snapshot(&observer.id, VisibilityLevel::Full, CoverLevel::None);
            let cache = &cache;
            let subject = &subject;
            async move {
                cache
                    .put(&observer, subject, state, Some(Duration::from_secs(600)))
                    .await;
            }
        });
    });
}

fn bench_eviction_sweep(c: &mut Criterion) {
    let runtime = Runtime::new().expect("runtime");
    let levels = [
        (VisibilityLevel::Undetected, CoverLevel::None),
        (VisibilityLevel::Full, CoverLevel::Standard),
        (VisibilityLevel::Full, CoverLevel::Lesser),
        (VisibilityLevel::Full, CoverLevel::None),
    ];

    for size in [100usize, 1_000] {
        c.bench_with_input(
            BenchmarkId::new("cache_shrink_to_half", size),
            &size,
            |b, &size| {
                b.to_async(&runtime).iter(|| async move {
                    let cache = StateCache::new(CacheConfig {
                        max_entries: size * 2,
                        ..CacheConfig::default()
                    });
                    let subject = entity("rogue", 50.0);
                    for i in 0..size {
                        let (visibility, cover) = levels[i % levels.len()];
                        let observer = entity(&format!("guard-{i}"), i as f64);
                        cache
                            .put(
                                &observer,
                                &subject,
                                snapshot(&observer.id, visibility, cover),
                                Some(Duration::from_secs(600)),
                            )
                            .await;
                    }
                    cache.shrink_to(size / 2).await;
                });
            },
        );
    }
}

criterion_group!(benches, bench_get_hit, bench_put, bench_eviction_sweep);
criterion_main!(benches);
