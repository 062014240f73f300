use serde::{Deserialize, Serialize};

use crate::field::FieldKey;
use crate::snapshot::FieldMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub completeness_pct: f64,
    pub confidence_score: f64,
    pub evidence_fields: usize,
    pub estimated_fields: usize,
}

/// Completeness counts evidence (observed or derived) over the whole catalog,
/// so a record filled purely by estimation scores 0 while still being full.
/// Confidence is the importance-weighted mean reliability of every field as
/// delivered, estimates included. Catalog slots absent from `fields` count as
/// unsupported with zero confidence.
pub fn score(fields: &FieldMap) -> Score {
    let mut total = 0usize;
    let mut evidence = 0usize;
    let mut estimated = 0usize;
    let mut weighted = 0.0;
    let mut weight_sum = 0.0;

    for key in FieldKey::all() {
        total += 1;
        let w = key.stat.importance();
        weight_sum += w;
        let Some(field) = fields.get(&key) else {
            continue;
        };
        if field.provenance.is_evidence() {
            evidence += 1;
        } else {
            estimated += 1;
        }
        weighted += w * field.confidence;
    }

    let completeness = if total == 0 {
        0.0
    } else {
        evidence as f64 / total as f64 * 100.0
    };
    let confidence = if weight_sum > 0.0 {
        weighted / weight_sum
    } else {
        0.0
    };
    Score {
        completeness_pct: round2(completeness),
        confidence_score: round4(confidence),
        evidence_fields: evidence,
        estimated_fields: estimated,
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}
