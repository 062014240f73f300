use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use nalgebra::{DMatrix, DVector};

use crate::estimator::{
    CompetitionModel, EstimatorStore, LinearFieldModel, MODEL_FEATURE_NAMES, STORE_VERSION,
    model_features,
};
use crate::field::{FieldKey, Stat};
use crate::history::HistoryRow;
use crate::snapshot::{FieldMap, Provenance, ResolvedField};

/// Matches needed before a competition's own averages fully replace the priors.
const MIN_BASELINE_MATCHES: f64 = 50.0;
/// A match counts as finished from this minute on.
const FULL_TIME_MINUTE: u16 = 90;
const MIN_FIT_SAMPLES: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct FitConfig {
    pub l2: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self { l2: 1.0 }
    }
}

/// Typical full-match value per side, used to shrink thin samples.
pub fn prior_baseline(stat: Stat) -> f64 {
    match stat {
        Stat::BallPossession => 50.0,
        Stat::ExpectedGoals => 1.35,
        Stat::TotalShots => 12.5,
        Stat::ShotsOnTarget => 4.3,
        Stat::ShotsOffTarget => 4.9,
        Stat::BlockedShots => 3.3,
        Stat::ShotsInsideBox => 8.0,
        Stat::ShotsOutsideBox => 4.5,
        Stat::BigChances => 2.3,
        Stat::BigChancesMissed => 1.4,
        Stat::Corners => 5.0,
        Stat::Offsides => 1.9,
        Stat::Fouls => 11.5,
        Stat::YellowCards => 1.9,
        Stat::RedCards => 0.08,
        Stat::TotalPasses => 460.0,
        Stat::AccuratePasses => 380.0,
        Stat::PassAccuracy => 81.0,
        Stat::Tackles => 16.0,
        Stat::Interceptions => 9.0,
        Stat::Clearances => 19.0,
        Stat::Saves => 3.0,
        Stat::Crosses => 17.0,
        Stat::DuelsWon => 50.0,
    }
}

pub fn fit_store(rows_by_competition: &HashMap<u32, Vec<HistoryRow>>, cfg: FitConfig) -> EstimatorStore {
    let mut ids = rows_by_competition.keys().copied().collect::<Vec<_>>();
    ids.sort_unstable();
    let mut store = EstimatorStore {
        version: STORE_VERSION,
        generated_at: Utc::now().to_rfc3339(),
        competitions: HashMap::new(),
    };
    for id in ids {
        let Some(rows) = rows_by_competition.get(&id) else {
            continue;
        };
        store.insert(fit_competition(id, rows, cfg));
    }
    store
}

pub fn fit_competition(competition_id: u32, rows: &[HistoryRow], cfg: FitConfig) -> CompetitionModel {
    let mut out = CompetitionModel::new(competition_id);
    let (baselines, matches) = full_match_baselines(rows);
    out.sample_matches = matches;
    out.baselines = baselines;
    for key in FieldKey::all() {
        if let Some(model) = fit_field_model(key, rows, cfg) {
            out.models.insert(key, model);
        }
    }
    out
}

/// Mean of each field at each match's final recorded minute (when that
/// minute reaches full time), shrunk toward `prior_baseline`.
fn full_match_baselines(rows: &[HistoryRow]) -> (BTreeMap<FieldKey, f64>, usize) {
    let mut last_by_match: HashMap<&str, &HistoryRow> = HashMap::new();
    for row in rows {
        let entry = last_by_match.entry(row.match_id.as_str()).or_insert(row);
        if row.minute > entry.minute {
            *entry = row;
        }
    }
    let finals = last_by_match
        .into_values()
        .filter(|r| r.minute >= FULL_TIME_MINUTE)
        .collect::<Vec<_>>();

    let mut out = BTreeMap::new();
    for key in FieldKey::all() {
        let values = finals
            .iter()
            .filter_map(|r| r.values.get(&key).copied())
            .collect::<Vec<_>>();
        if values.is_empty() {
            continue;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let w = (n / MIN_BASELINE_MATCHES).clamp(0.0, 1.0);
        let prior = prior_baseline(key.stat);
        out.insert(key, (1.0 - w) * prior + w * mean);
    }
    (out, finals.len())
}

/// Ridge regression on standardised features; the intercept is the target
/// mean and is not penalised.
fn fit_field_model(key: FieldKey, rows: &[HistoryRow], cfg: FitConfig) -> Option<LinearFieldModel> {
    let mut xs: Vec<[Option<f64>; 3]> = Vec::new();
    let mut ys: Vec<f64> = Vec::new();
    for row in rows {
        let Some(y) = row.values.get(&key).copied() else {
            continue;
        };
        let opposite: FieldMap = row
            .values
            .get(&key.opposite())
            .map(|v| {
                let field = ResolvedField {
                    field: key.opposite(),
                    value: *v,
                    source_kind: None,
                    provenance: Provenance::Observed,
                    confidence: 1.0,
                };
                (key.opposite(), field)
            })
            .into_iter()
            .collect();
        xs.push(model_features(key, &row.context(), &opposite));
        ys.push(y);
    }
    let n = ys.len();
    if n < MIN_FIT_SAMPLES {
        return None;
    }

    let k = MODEL_FEATURE_NAMES.len();
    let mut means = vec![0.0; k];
    let mut stds = vec![1.0; k];
    for j in 0..k {
        let present = xs.iter().filter_map(|x| x[j]).collect::<Vec<_>>();
        if present.is_empty() {
            continue;
        }
        let m = present.iter().sum::<f64>() / present.len() as f64;
        let var = present.iter().map(|v| (v - m).powi(2)).sum::<f64>() / present.len() as f64;
        means[j] = m;
        stds[j] = var.sqrt().max(1e-6);
    }

    let y_mean = ys.iter().sum::<f64>() / n as f64;
    let x = DMatrix::from_fn(n, k, |i, j| match xs[i][j] {
        Some(v) => (v - means[j]) / stds[j],
        None => 0.0,
    });
    let y = DVector::from_iterator(n, ys.iter().map(|v| v - y_mean));

    let xt = x.transpose();
    let gram = &xt * &x + DMatrix::identity(k, k) * cfg.l2.max(1e-9);
    let rhs = &xt * &y;
    let coeffs = gram.lu().solve(&rhs)?;

    let fitted = &x * &coeffs;
    let sse = (0..n).map(|i| (y[i] - fitted[i]).powi(2)).sum::<f64>();

    Some(LinearFieldModel {
        feature_names: MODEL_FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        feature_means: means,
        feature_stds: stds,
        coeffs: coeffs.iter().copied().collect(),
        intercept: y_mean,
        l2: cfg.l2,
        train_samples: n,
        train_rmse: (sse / n as f64).sqrt(),
    })
}
