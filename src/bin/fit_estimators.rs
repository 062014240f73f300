use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use tracing::info;
use tracing_subscriber::EnvFilter;

use match_stats_resolver::config;
use match_stats_resolver::fitting::{self, FitConfig};
use match_stats_resolver::history;
use match_stats_resolver::synthetic_feed::SyntheticMatch;

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let db_path = parse_path_arg("--db")
        .or_else(config::default_history_path)
        .context("unable to resolve history db path")?;
    let out_path = parse_path_arg("--out")
        .or_else(config::default_store_path)
        .context("unable to resolve estimator store path")?;
    let l2 = parse_arg("--l2")
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or(FitConfig::default().l2);

    let mut conn = history::open_db(&db_path)?;

    if let Some(matches) = parse_arg("--synthetic").and_then(|v| v.parse::<u64>().ok()) {
        let competition = parse_ids_arg()
            .and_then(|ids| ids.first().copied())
            .unwrap_or(47);
        let mut rows = Vec::new();
        for seed in 0..matches {
            let sim = SyntheticMatch::new(format!("synthetic-{competition}-{seed}"), competition, seed);
            rows.extend(sim.history_rows(5));
        }
        let summary = history::upsert_rows(&mut conn, &rows)?;
        info!(
            competition,
            matches,
            rows = summary.rows,
            values = summary.values,
            "seeded synthetic history"
        );
    }

    let competition_ids = match parse_ids_arg() {
        Some(ids) => ids,
        None => history::competition_ids(&conn)?,
    };
    if competition_ids.is_empty() {
        return Err(anyhow!("no competitions in {}", db_path.display()));
    }

    let mut rows_by_competition = HashMap::new();
    for id in &competition_ids {
        let rows = history::load_competition_rows(&conn, *id)?;
        info!(competition = id, rows = rows.len(), "loaded history");
        rows_by_competition.insert(*id, rows);
    }

    let store = fitting::fit_store(&rows_by_competition, FitConfig { l2 });
    store.save(&out_path)?;

    println!("Estimator fit complete");
    println!("DB: {}", db_path.display());
    println!("Store: {}", out_path.display());
    println!("L2: {l2}");
    for id in &competition_ids {
        let Some(comp) = store.competition(*id) else {
            continue;
        };
        let mean_rmse = if comp.models.is_empty() {
            0.0
        } else {
            comp.models.values().map(|m| m.train_rmse).sum::<f64>() / comp.models.len() as f64
        };
        println!(
            "competition {}: matches={} baselines={} models={} mean_rmse={:.3}",
            id,
            comp.sample_matches,
            comp.baselines.len(),
            comp.models.len(),
            mean_rmse
        );
    }
    Ok(())
}

fn parse_arg(name: &str) -> Option<String> {
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

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    parse_arg(name).map(PathBuf::from)
}

fn parse_ids_arg() -> Option<Vec<u32>> {
    let raw = parse_arg("--competition-ids")?;
    let mut seen = HashSet::new();
    let ids = raw
        .split([',', ';', ' '])
        .filter_map(|part| part.trim().parse::<u32>().ok())
        .filter(|id| *id != 0 && seen.insert(*id))
        .collect::<Vec<_>>();
    (!ids.is_empty()).then_some(ids)
}
