use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use match_stats_resolver::config::{self, EngineConfig};
use match_stats_resolver::engine::{Engine, EngineRegistry, ResolveJob};
use match_stats_resolver::estimator::EstimatorStore;
use match_stats_resolver::history;
use match_stats_resolver::observation::{MatchContext, ObservationBatch};
use match_stats_resolver::snapshot::ResolvedSnapshot;
use match_stats_resolver::synthetic_feed::SyntheticMatch;

const DEMO_COMPETITION_ID: u32 = 47;
const DEMO_MINUTES: &[u16] = &[15, 30, 45, 60, 75, 90];

#[derive(Debug, Deserialize)]
struct JobInput {
    batch: ObservationBatch,
    #[serde(default)]
    context: Option<MatchContext>,
    #[serde(default)]
    previous: Option<ResolvedSnapshot>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BatchInput {
    Jobs(Vec<JobInput>),
    Single(ObservationBatch),
}

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cfg = EngineConfig::from_env();
    let store = load_store(cfg.store_path.as_deref());
    let engine = Engine::new(EngineRegistry::from_config(&cfg), Arc::new(store), cfg.clone());

    let full = has_flag("--full");
    let competition = parse_flag_value("--competition").and_then(|v| v.parse::<u32>().ok());

    let snapshots = if let Some(path) = parse_flag_value("--batch") {
        resolve_file(&engine, Path::new(&path), competition)?
    } else if has_flag("--demo") {
        let seed = parse_flag_value("--seed")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(7);
        run_demo(&engine, competition.unwrap_or(DEMO_COMPETITION_ID), seed)
    } else {
        return Err(anyhow!(
            "usage: stats_resolver (--batch <file.json> [--competition <id>] | --demo [--seed <n>]) [--full] [--history <db>]"
        ));
    };

    if let Some(db_path) = parse_flag_value("--history")
        .map(PathBuf::from)
        .or_else(|| has_flag("--record").then(config::default_history_path).flatten())
    {
        record_history(&db_path, &snapshots, competition)?;
    }

    for (snapshot, _) in &snapshots {
        let line = if full {
            serde_json::to_string(snapshot).context("serialize snapshot")?
        } else {
            serde_json::to_string(&snapshot.to_flat_record()).context("serialize record")?
        };
        println!("{line}");
    }
    Ok(())
}

fn load_store(path: Option<&Path>) -> EstimatorStore {
    let Some(path) = path else {
        warn!("no estimator store path; estimates will fall back to sentinels");
        return EstimatorStore::empty();
    };
    if !path.exists() {
        warn!(path = %path.display(), "estimator store not found; run fit_estimators first");
        return EstimatorStore::empty();
    }
    match EstimatorStore::load(path) {
        Ok(store) => {
            info!(
                path = %path.display(),
                competitions = store.competitions.len(),
                "estimator store loaded"
            );
            store
        }
        Err(err) => {
            warn!(path = %path.display(), error = %format!("{err:#}"), "estimator store unreadable");
            EstimatorStore::empty()
        }
    }
}

fn resolve_file(
    engine: &Engine,
    path: &Path,
    competition: Option<u32>,
) -> Result<Vec<(ResolvedSnapshot, Option<MatchContext>)>> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let input: BatchInput =
        serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    let jobs = match input {
        BatchInput::Jobs(items) => items
            .into_iter()
            .map(|item| {
                let context = item.context.or_else(|| {
                    competition.map(|id| MatchContext::new(id, item.batch.minute, 0, 0))
                });
                ResolveJob {
                    batch: item.batch,
                    context,
                    previous: item.previous,
                }
            })
            .collect::<Vec<_>>(),
        BatchInput::Single(batch) => {
            let context = competition.map(|id| MatchContext::new(id, batch.minute, 0, 0));
            vec![ResolveJob {
                batch,
                context,
                previous: None,
            }]
        }
    };
    info!(jobs = jobs.len(), path = %path.display(), "resolving batch file");
    let snapshots = engine.resolve_many(&jobs);
    Ok(snapshots
        .into_iter()
        .zip(jobs.into_iter().map(|job| job.context))
        .collect())
}

fn run_demo(
    engine: &Engine,
    competition_id: u32,
    seed: u64,
) -> Vec<(ResolvedSnapshot, Option<MatchContext>)> {
    let mut sim = SyntheticMatch::new(format!("demo-{seed}"), competition_id, seed);
    let kickoff = Utc::now() - Duration::minutes(95);
    let mut out: Vec<(ResolvedSnapshot, Option<MatchContext>)> = Vec::new();
    for &minute in DEMO_MINUTES {
        let collected_at = kickoff + Duration::minutes(i64::from(minute));
        let batch = sim.batch_at(minute, collected_at);
        let ctx = sim.context_at(minute);
        let previous = out.last().map(|(snap, _)| snap);
        let snapshot = engine.resolve(&batch, Some(&ctx), previous);
        info!(
            minute,
            observations = batch.observations.len(),
            completeness = snapshot.completeness_pct,
            confidence = snapshot.confidence_score,
            flags = snapshot.validation_flags.len(),
            "demo snapshot"
        );
        out.push((snapshot, Some(ctx)));
    }
    out
}

fn record_history(
    db_path: &Path,
    snapshots: &[(ResolvedSnapshot, Option<MatchContext>)],
    competition: Option<u32>,
) -> Result<()> {
    let mut conn = history::open_db(db_path)?;
    let mut rows = 0usize;
    let mut values = 0usize;
    for (snapshot, ctx) in snapshots {
        let Some(ctx) = (*ctx).or_else(|| {
            competition.map(|id| MatchContext::new(id, snapshot.minute, 0, 0))
        }) else {
            warn!(match_id = %snapshot.match_id, "no competition for snapshot; not recorded");
            continue;
        };
        let summary = history::record_snapshot(&mut conn, &ctx, snapshot)?;
        rows += summary.rows;
        values += summary.values;
    }
    info!(db = %db_path.display(), rows, values, "history recorded");
    Ok(())
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}

fn parse_flag_value(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let prefix = format!("{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&prefix) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}
