use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::field::FieldKey;
use crate::issue::ResolutionIssue;
use crate::observation::MatchContext;
use crate::snapshot::{FieldMap, Provenance, ResolvedField};
use crate::source::{SourceKind, SourceRegistry};

pub const STORE_VERSION: u32 = 1;

pub const MODEL_FEATURE_NAMES: [&str; 3] = ["minute", "score_diff", "opposite_value"];

/// Regular minutes; baselines for running counts are stored per full match.
pub const REGULATION_MINUTES: f64 = 90.0;

/// Standardised linear model for one field of one competition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearFieldModel {
    #[serde(default)]
    pub feature_names: Vec<String>,
    #[serde(default)]
    pub feature_means: Vec<f64>,
    #[serde(default)]
    pub feature_stds: Vec<f64>,
    #[serde(default)]
    pub coeffs: Vec<f64>,
    #[serde(default)]
    pub intercept: f64,
    #[serde(default)]
    pub l2: f64,
    #[serde(default)]
    pub train_samples: usize,
    #[serde(default)]
    pub train_rmse: f64,
}

impl LinearFieldModel {
    /// Unknown features sit at their training mean, i.e. contribute nothing.
    pub fn predict(&self, features: &[Option<f64>]) -> f64 {
        let mut sum = self.intercept;
        for (idx, c) in self.coeffs.iter().enumerate() {
            let Some(Some(raw)) = features.get(idx) else {
                continue;
            };
            sum += c * standardized(*raw, idx, self);
        }
        sum
    }
}

fn standardized(x: f64, idx: usize, model: &LinearFieldModel) -> f64 {
    let mu = model.feature_means.get(idx).copied().unwrap_or(0.0);
    let sigma = model.feature_stds.get(idx).copied().unwrap_or(1.0).max(1e-6);
    (x - mu) / sigma
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitionModel {
    pub competition_id: u32,
    pub sample_matches: usize,
    /// Full-match mean per field.
    #[serde(default)]
    pub baselines: BTreeMap<FieldKey, f64>,
    #[serde(default)]
    pub models: BTreeMap<FieldKey, LinearFieldModel>,
}

impl CompetitionModel {
    pub fn new(competition_id: u32) -> Self {
        Self {
            competition_id,
            sample_matches: 0,
            baselines: BTreeMap::new(),
            models: BTreeMap::new(),
        }
    }
}

/// Read-only per-competition tables shared by every engine invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimatorStore {
    pub version: u32,
    pub generated_at: String,
    #[serde(default)]
    pub competitions: HashMap<u32, CompetitionModel>,
}

impl Default for EstimatorStore {
    fn default() -> Self {
        Self::empty()
    }
}

impl EstimatorStore {
    pub fn empty() -> Self {
        Self {
            version: STORE_VERSION,
            generated_at: String::new(),
            competitions: HashMap::new(),
        }
    }

    pub fn insert(&mut self, model: CompetitionModel) {
        self.competitions.insert(model.competition_id, model);
    }

    pub fn competition(&self, competition_id: u32) -> Option<&CompetitionModel> {
        self.competitions.get(&competition_id)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read estimator store {}", path.display()))?;
        let store: EstimatorStore =
            serde_json::from_str(&raw).context("parse estimator store")?;
        if store.version != STORE_VERSION {
            anyhow::bail!(
                "estimator store version {} (expected {STORE_VERSION})",
                store.version
            );
        }
        Ok(store)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self).context("serialize estimator store")?;
        fs::write(&tmp, json).context("write estimator store")?;
        fs::rename(&tmp, path).context("swap estimator store")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct EstimateOutcome {
    pub estimated: FieldMap,
    pub issues: Vec<ResolutionIssue>,
}

type Strategy = fn(&Estimator<'_>, FieldKey, &FieldMap, &MatchContext) -> Option<(f64, SourceKind)>;

/// Tried in order per missing field; the first answer wins.
const STRATEGIES: [Strategy; 2] = [pattern_estimate, baseline_estimate];

pub struct Estimator<'a> {
    store: &'a EstimatorStore,
    sources: &'a SourceRegistry,
    min_model_samples: usize,
}

impl<'a> Estimator<'a> {
    pub fn new(store: &'a EstimatorStore, sources: &'a SourceRegistry, min_model_samples: usize) -> Self {
        Self {
            store,
            sources,
            min_model_samples,
        }
    }

    /// Every key in `missing` comes back: estimated, or the sentinel with
    /// `Provenance::Missing` plus an `EstimationUnavailable` issue.
    pub fn estimate(
        &self,
        resolved: &FieldMap,
        missing: &BTreeSet<FieldKey>,
        context: Option<&MatchContext>,
    ) -> EstimateOutcome {
        let mut out = EstimateOutcome::default();
        for key in missing {
            let answer = context.and_then(|ctx| {
                STRATEGIES
                    .iter()
                    .find_map(|strategy| strategy(self, *key, resolved, ctx))
            });
            let field = match answer {
                Some((raw, kind)) => {
                    let value = clamp_for(*key, raw);
                    debug!(field = %key, source = %kind, value, "estimated");
                    ResolvedField {
                        field: *key,
                        value,
                        source_kind: Some(kind),
                        provenance: match kind {
                            SourceKind::MlEstimation => Provenance::PatternModel,
                            _ => Provenance::Baseline,
                        },
                        confidence: self.sources.reliability(kind),
                    }
                }
                None => {
                    warn!(
                        field = %key,
                        competition = ?context.map(|c| c.competition_id),
                        "no estimate available, using sentinel"
                    );
                    out.issues.push(ResolutionIssue::EstimationUnavailable {
                        field: *key,
                        competition_id: context.map(|c| c.competition_id),
                    });
                    ResolvedField {
                        field: *key,
                        value: 0.0,
                        source_kind: None,
                        provenance: Provenance::Missing,
                        confidence: 0.0,
                    }
                }
            };
            out.estimated.insert(*key, field);
        }
        out
    }
}

fn pattern_estimate(
    est: &Estimator<'_>,
    key: FieldKey,
    resolved: &FieldMap,
    ctx: &MatchContext,
) -> Option<(f64, SourceKind)> {
    let comp = est.store.competition(ctx.competition_id)?;
    let model = comp.models.get(&key)?;
    if model.train_samples < est.min_model_samples || model.coeffs.is_empty() {
        return None;
    }
    let features = model_features(key, ctx, resolved);
    let value = model.predict(&features);
    value.is_finite().then_some((value, SourceKind::MlEstimation))
}

fn baseline_estimate(
    est: &Estimator<'_>,
    key: FieldKey,
    _resolved: &FieldMap,
    ctx: &MatchContext,
) -> Option<(f64, SourceKind)> {
    let comp = est.store.competition(ctx.competition_id)?;
    let full_match = *comp.baselines.get(&key)?;
    let value = if key.stat.is_cumulative() {
        let elapsed = f64::from(ctx.minute).min(REGULATION_MINUTES) / REGULATION_MINUTES;
        full_match * elapsed
    } else {
        full_match
    };
    Some((value, SourceKind::CompetitionBaseline))
}

/// Feature vector in `MODEL_FEATURE_NAMES` order.
pub fn model_features(key: FieldKey, ctx: &MatchContext, resolved: &FieldMap) -> [Option<f64>; 3] {
    [
        Some(f64::from(ctx.minute)),
        Some(f64::from(ctx.score_diff(key.side))),
        resolved.get(&key.opposite()).map(|f| f.value),
    ]
}

fn clamp_for(key: FieldKey, raw: f64) -> f64 {
    let v = (raw.max(0.0) * 100.0).round() / 100.0;
    if key.stat.is_percentage() {
        v.min(100.0)
    } else {
        v
    }
}
