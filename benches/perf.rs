use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use match_stats_resolver::config::EngineConfig;
use match_stats_resolver::engine::{Engine, EngineRegistry, ResolveJob};
use match_stats_resolver::estimator::EstimatorStore;
use match_stats_resolver::fitting::{self, FitConfig};
use match_stats_resolver::synthetic_feed::SyntheticMatch;

fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_780_000_000, 0).unwrap_or_default()
}

fn fitted_store() -> EstimatorStore {
    let rows = (0..30u64)
        .flat_map(|seed| SyntheticMatch::new(format!("h{seed}"), 47, seed).history_rows(5))
        .collect::<Vec<_>>();
    fitting::fit_store(&HashMap::from([(47, rows)]), FitConfig::default())
}

fn sample_jobs(count: u64) -> Vec<ResolveJob> {
    (0..count)
        .map(|seed| {
            let mut sim = SyntheticMatch::new(format!("live-{seed}"), 47, 1_000 + seed);
            let minute = 10 + (seed % 80) as u16;
            ResolveJob {
                batch: sim.batch_at(minute, t0()),
                context: Some(sim.context_at(minute)),
                previous: None,
            }
        })
        .collect()
}

fn bench_resolve_single(c: &mut Criterion) {
    let engine = Engine::new(
        EngineRegistry::standard(),
        Arc::new(fitted_store()),
        EngineConfig::default(),
    );
    let job = sample_jobs(1).remove(0);
    c.bench_function("resolve_single", |b| {
        b.iter(|| {
            let snap = engine.resolve(
                black_box(&job.batch),
                job.context.as_ref(),
                job.previous.as_ref(),
            );
            black_box(snap.completeness_pct);
        })
    });
}

fn bench_resolve_many(c: &mut Criterion) {
    let engine = Engine::new(
        EngineRegistry::standard(),
        Arc::new(fitted_store()),
        EngineConfig::default(),
    );
    let jobs = sample_jobs(256);
    c.bench_function("resolve_many_256", |b| {
        b.iter(|| {
            let snaps = engine.resolve_many(black_box(&jobs));
            black_box(snaps.len());
        })
    });
}

fn bench_fit_store(c: &mut Criterion) {
    let rows = (0..20u64)
        .flat_map(|seed| SyntheticMatch::new(format!("h{seed}"), 47, seed).history_rows(5))
        .collect::<Vec<_>>();
    let by_comp = HashMap::from([(47, rows)]);
    c.bench_function("fit_store_20_matches", |b| {
        b.iter(|| {
            let store = fitting::fit_store(black_box(&by_comp), FitConfig::default());
            black_box(store.competitions.len());
        })
    });
}

criterion_group!(
    benches,
    bench_resolve_single,
    bench_resolve_many,
    bench_fit_store
);
criterion_main!(benches);
