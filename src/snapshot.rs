use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::field::{FieldKey, Side, Stat};
use crate::source::SourceKind;

/// Working record keyed by `(stat, side)`. A key that is absent has not been
/// determined yet; the numeric sentinel only appears when a snapshot is sealed.
pub type FieldMap = BTreeMap<FieldKey, ResolvedField>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Observed,
    Derived,
    PatternModel,
    Baseline,
    /// Nothing could supply a value; the field carries the sentinel.
    Missing,
}

impl Provenance {
    /// Observation or derivation: counts toward completeness.
    pub fn is_evidence(self) -> bool {
        matches!(self, Provenance::Observed | Provenance::Derived)
    }

    pub fn is_estimated(self) -> bool {
        !self.is_evidence()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedField {
    pub field: FieldKey,
    pub value: f64,
    /// `None` only for `Provenance::Missing`.
    pub source_kind: Option<SourceKind>,
    pub provenance: Provenance,
    /// The winning tier's base reliability, not a probability of correctness.
    pub confidence: f64,
}

impl ResolvedField {
    pub fn stat(&self) -> Stat {
        self.field.stat
    }

    pub fn side(&self) -> Side {
        self.field.side
    }

    pub fn is_estimated(&self) -> bool {
        self.provenance.is_estimated()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagRule {
    UnknownSource,
    DerivationIncomplete,
    MissingData,
    NonNegative,
    PercentageRange,
    PossessionSum,
    ShotsConsistency,
    PassConsistency,
    MonotonicCounter,
}

impl FlagRule {
    pub fn name(self) -> &'static str {
        match self {
            FlagRule::UnknownSource => "unknown_source",
            FlagRule::DerivationIncomplete => "derivation_incomplete",
            FlagRule::MissingData => "missing_data",
            FlagRule::NonNegative => "non_negative",
            FlagRule::PercentageRange => "percentage_range",
            FlagRule::PossessionSum => "possession_sum",
            FlagRule::ShotsConsistency => "shots_consistency",
            FlagRule::PassConsistency => "pass_consistency",
            FlagRule::MonotonicCounter => "monotonic_counter",
        }
    }
}

impl fmt::Display for FlagRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Audit entry. `corrected_value` is `None` when the value was left alone.
/// On the wire the key is split into `field` (the stat name) and `side`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "FlagRecord", from = "FlagRecord")]
pub struct ValidationFlag {
    pub field: FieldKey,
    pub rule: FlagRule,
    pub original_value: Option<f64>,
    pub corrected_value: Option<f64>,
}

impl ValidationFlag {
    pub fn corrected(field: FieldKey, rule: FlagRule, original: f64, corrected: f64) -> Self {
        Self {
            field,
            rule,
            original_value: Some(original),
            corrected_value: Some(corrected),
        }
    }

    pub fn noted(field: FieldKey, rule: FlagRule, original: Option<f64>) -> Self {
        Self {
            field,
            rule,
            original_value: original,
            corrected_value: None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct FlagRecord {
    field: Stat,
    side: Side,
    rule: FlagRule,
    original_value: Option<f64>,
    corrected_value: Option<f64>,
}

impl From<ValidationFlag> for FlagRecord {
    fn from(flag: ValidationFlag) -> Self {
        Self {
            field: flag.field.stat,
            side: flag.field.side,
            rule: flag.rule,
            original_value: flag.original_value,
            corrected_value: flag.corrected_value,
        }
    }
}

impl From<FlagRecord> for ValidationFlag {
    fn from(rec: FlagRecord) -> Self {
        Self {
            field: FieldKey::new(rec.field, rec.side),
            rule: rec.rule,
            original_value: rec.original_value,
            corrected_value: rec.corrected_value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Collecting,
    Resolving,
    Deriving,
    Estimating,
    Validating,
    Scored,
}

impl Stage {
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Collecting => Some(Stage::Resolving),
            Stage::Resolving => Some(Stage::Deriving),
            Stage::Deriving => Some(Stage::Estimating),
            Stage::Estimating => Some(Stage::Validating),
            Stage::Validating => Some(Stage::Scored),
            Stage::Scored => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Stage::Scored
    }
}

/// Sealed output for one match-minute. Built once by the engine, then only read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSnapshot {
    pub match_id: String,
    pub minute: u16,
    pub catalog_version: u32,
    pub resolved_fields: Vec<ResolvedField>,
    pub completeness_pct: f64,
    pub confidence_score: f64,
    pub validation_flags: Vec<ValidationFlag>,
}

impl ResolvedSnapshot {
    pub fn field(&self, key: FieldKey) -> Option<&ResolvedField> {
        self.resolved_fields.iter().find(|f| f.field == key)
    }

    /// Output-boundary value. Fields nobody could determine carry the sentinel
    /// (`0.0`, or 50/50 for the possession pair); `missing_data` marks them.
    pub fn value(&self, key: FieldKey) -> f64 {
        self.field(key).map(|f| f.value).unwrap_or(0.0)
    }

    pub fn flags_for(&self, key: FieldKey) -> impl Iterator<Item = &ValidationFlag> {
        self.validation_flags.iter().filter(move |f| f.field == key)
    }

    pub fn has_flag(&self, key: FieldKey, rule: FlagRule) -> bool {
        self.flags_for(key).any(|f| f.rule == rule)
    }

    /// Fields filled by a model or baseline. Sentinels are left out; they
    /// carry `missing_data` instead.
    pub fn estimated_fields(&self) -> Vec<FieldKey> {
        self.resolved_fields
            .iter()
            .filter(|f| f.is_estimated() && f.provenance != Provenance::Missing)
            .map(|f| f.field)
            .collect()
    }

    pub fn field_map(&self) -> FieldMap {
        self.resolved_fields
            .iter()
            .map(|f| (f.field, f.clone()))
            .collect()
    }

    /// Flat `{stat}_{side}` record consumed by persistence and feature
    /// engineering, in catalog order.
    pub fn to_flat_record(&self) -> Map<String, Value> {
        let mut out = Map::new();
        out.insert("match_id".to_string(), Value::from(self.match_id.clone()));
        out.insert("minute".to_string(), Value::from(self.minute));
        for key in FieldKey::all() {
            out.insert(key.name(), Value::from(self.value(key)));
        }
        out.insert(
            "completeness_pct".to_string(),
            Value::from(self.completeness_pct),
        );
        out.insert(
            "confidence_score".to_string(),
            Value::from(self.confidence_score),
        );
        out.insert(
            "estimated_fields".to_string(),
            Value::from(
                self.estimated_fields()
                    .into_iter()
                    .map(|key| key.name())
                    .collect::<Vec<_>>(),
            ),
        );
        out.insert(
            "validation_flags".to_string(),
            serde_json::to_value(&self.validation_flags).unwrap_or_default(),
        );
        out
    }
}
