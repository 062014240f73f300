use thiserror::Error;

use crate::field::FieldKey;
use crate::snapshot::{FlagRule, ValidationFlag};

/// Everything that can go wrong while resolving one snapshot. None of these
/// abort the snapshot: each degrades to a fallback value and, except for stale
/// observations, an audit flag.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolutionIssue {
    #[error("stale observation for {field} from {origin} ({age_secs}s old)")]
    StaleObservation {
        field: FieldKey,
        origin: String,
        age_secs: i64,
    },
    #[error("unknown source `{origin}` for {field}")]
    UnknownSource {
        field: FieldKey,
        origin: String,
        value: f64,
    },
    #[error("derivation of {field} still pending after {passes} passes")]
    DerivationCycle { field: FieldKey, passes: usize },
    #[error("no model or baseline for {field} in competition {competition_id:?}")]
    EstimationUnavailable {
        field: FieldKey,
        competition_id: Option<u32>,
    },
    #[error("{rule} violated on {field}")]
    ValidationViolation {
        field: FieldKey,
        rule: FlagRule,
        original: f64,
        corrected: Option<f64>,
    },
}

impl ResolutionIssue {
    /// Audit flag recorded on the snapshot; stale observations are dropped
    /// silently.
    pub fn to_flag(&self) -> Option<ValidationFlag> {
        match self {
            ResolutionIssue::StaleObservation { .. } => None,
            ResolutionIssue::UnknownSource { field, value, .. } => Some(ValidationFlag::noted(
                *field,
                FlagRule::UnknownSource,
                Some(*value),
            )),
            ResolutionIssue::DerivationCycle { field, .. } => Some(ValidationFlag::noted(
                *field,
                FlagRule::DerivationIncomplete,
                None,
            )),
            ResolutionIssue::EstimationUnavailable { field, .. } => {
                Some(ValidationFlag::noted(*field, FlagRule::MissingData, None))
            }
            ResolutionIssue::ValidationViolation {
                field,
                rule,
                original,
                corrected,
            } => Some(match corrected {
                Some(value) => ValidationFlag::corrected(*field, *rule, *original, *value),
                None => ValidationFlag::noted(*field, *rule, Some(*original)),
            }),
        }
    }
}
