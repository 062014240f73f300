use tracing::debug;

use crate::field::{FieldKey, Side, Stat};
use crate::issue::ResolutionIssue;
use crate::snapshot::{FieldMap, FlagRule, Provenance, ResolvedSnapshot, ValidationFlag};

/// Allowed drift of the possession pair from 100 before it is rescaled.
pub const POSSESSION_TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Value is corrected and the correction flagged.
    Hard,
    /// Only flagged.
    Soft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationRule {
    NonNegative,
    PercentageRange,
    PossessionSum,
    ShotsConsistency,
    PassConsistency,
    MonotonicCounter,
}

impl ValidationRule {
    pub fn severity(self) -> Severity {
        match self {
            ValidationRule::MonotonicCounter => Severity::Soft,
            _ => Severity::Hard,
        }
    }

    pub fn flag_rule(self) -> FlagRule {
        match self {
            ValidationRule::NonNegative => FlagRule::NonNegative,
            ValidationRule::PercentageRange => FlagRule::PercentageRange,
            ValidationRule::PossessionSum => FlagRule::PossessionSum,
            ValidationRule::ShotsConsistency => FlagRule::ShotsConsistency,
            ValidationRule::PassConsistency => FlagRule::PassConsistency,
            ValidationRule::MonotonicCounter => FlagRule::MonotonicCounter,
        }
    }
}

/// Ordered cross-field checks. Clipping rules run before the rules that
/// compare fields, which keeps a second run over the output a no-op.
#[derive(Debug, Clone)]
pub struct Validator {
    rules: Vec<ValidationRule>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::standard()
    }
}

impl Validator {
    pub fn standard() -> Self {
        Self::with_rules(vec![
            ValidationRule::NonNegative,
            ValidationRule::PercentageRange,
            ValidationRule::PossessionSum,
            ValidationRule::ShotsConsistency,
            ValidationRule::PassConsistency,
            ValidationRule::MonotonicCounter,
        ])
    }

    pub fn with_rules(rules: Vec<ValidationRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ValidationRule] {
        &self.rules
    }

    /// Never drops a field; only adjusts values and records what changed.
    pub fn validate(
        &self,
        candidate: &FieldMap,
        previous: Option<&ResolvedSnapshot>,
    ) -> (FieldMap, Vec<ValidationFlag>) {
        let mut fields = candidate.clone();
        let mut flags = Vec::new();
        for rule in &self.rules {
            match rule {
                ValidationRule::NonNegative => non_negative(&mut fields, &mut flags),
                ValidationRule::PercentageRange => percentage_range(&mut fields, &mut flags),
                ValidationRule::PossessionSum => possession_sum(&mut fields, &mut flags),
                ValidationRule::ShotsConsistency => {
                    clip_part_to_whole(
                        &mut fields,
                        &mut flags,
                        Stat::ShotsOnTarget,
                        Stat::TotalShots,
                        FlagRule::ShotsConsistency,
                    );
                }
                ValidationRule::PassConsistency => {
                    clip_part_to_whole(
                        &mut fields,
                        &mut flags,
                        Stat::AccuratePasses,
                        Stat::TotalPasses,
                        FlagRule::PassConsistency,
                    );
                }
                ValidationRule::MonotonicCounter => {
                    if let Some(prev) = previous {
                        monotonic(&fields, prev, &mut flags);
                    }
                }
            }
        }
        (fields, flags)
    }
}

fn set_value(
    fields: &mut FieldMap,
    flags: &mut Vec<ValidationFlag>,
    key: FieldKey,
    corrected: f64,
    rule: FlagRule,
) {
    let Some(field) = fields.get_mut(&key) else {
        return;
    };
    let issue = ResolutionIssue::ValidationViolation {
        field: key,
        rule,
        original: field.value,
        corrected: Some(corrected),
    };
    debug!(%issue, "corrected");
    flags.extend(issue.to_flag());
    field.value = corrected;
}

fn non_negative(fields: &mut FieldMap, flags: &mut Vec<ValidationFlag>) {
    let negative = fields
        .values()
        .filter(|f| f.value < 0.0)
        .map(|f| f.field)
        .collect::<Vec<_>>();
    for key in negative {
        set_value(fields, flags, key, 0.0, FlagRule::NonNegative);
    }
}

fn percentage_range(fields: &mut FieldMap, flags: &mut Vec<ValidationFlag>) {
    let over = fields
        .values()
        .filter(|f| f.field.stat.is_percentage() && f.value > 100.0)
        .map(|f| f.field)
        .collect::<Vec<_>>();
    for key in over {
        set_value(fields, flags, key, 100.0, FlagRule::PercentageRange);
    }
}

fn possession_sum(fields: &mut FieldMap, flags: &mut Vec<ValidationFlag>) {
    let home_key = FieldKey::home(Stat::BallPossession);
    let away_key = FieldKey::away(Stat::BallPossession);
    let (Some(home), Some(away)) = (fields.get(&home_key), fields.get(&away_key)) else {
        return;
    };
    // Both sides unknown: an even split keeps the pair summing to 100 while
    // `missing_data` stays the marker.
    if home.provenance == Provenance::Missing && away.provenance == Provenance::Missing {
        for key in [home_key, away_key] {
            if let Some(field) = fields.get_mut(&key) {
                field.value = 50.0;
            }
        }
        return;
    }
    let (h, a) = (home.value, away.value);
    let sum = h + a;
    if (sum - 100.0).abs() <= POSSESSION_TOLERANCE + 1e-9 {
        return;
    }
    let new_home = if sum > 0.0 {
        round1(h / sum * 100.0)
    } else {
        50.0
    };
    let new_away = round1(100.0 - new_home);
    for (key, old, new) in [(home_key, h, new_home), (away_key, a, new_away)] {
        if (old - new).abs() > 1e-9 {
            set_value(fields, flags, key, new, FlagRule::PossessionSum);
        }
    }
}

fn clip_part_to_whole(
    fields: &mut FieldMap,
    flags: &mut Vec<ValidationFlag>,
    part: Stat,
    whole: Stat,
    rule: FlagRule,
) {
    for side in Side::BOTH {
        let part_key = FieldKey::new(part, side);
        let (Some(p), Some(w)) = (fields.get(&part_key), fields.get(&FieldKey::new(whole, side)))
        else {
            continue;
        };
        if p.value > w.value {
            let limit = w.value;
            set_value(fields, flags, part_key, limit, rule);
        }
    }
}

fn monotonic(fields: &FieldMap, previous: &ResolvedSnapshot, flags: &mut Vec<ValidationFlag>) {
    for field in fields.values() {
        if !field.field.stat.is_cumulative() || field.provenance == Provenance::Missing {
            continue;
        }
        let Some(prev) = previous.field(field.field) else {
            continue;
        };
        if prev.provenance == Provenance::Missing {
            continue;
        }
        if field.value + 1e-9 < prev.value {
            let issue = ResolutionIssue::ValidationViolation {
                field: field.field,
                rule: FlagRule::MonotonicCounter,
                original: field.value,
                corrected: None,
            };
            debug!(%issue, previous = prev.value, "counter went backwards");
            flags.extend(issue.to_flag());
        }
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ResolvedField;
    use crate::source::SourceKind;

    fn field(key: FieldKey, value: f64) -> (FieldKey, ResolvedField) {
        (
            key,
            ResolvedField {
                field: key,
                value,
                source_kind: Some(SourceKind::WebScrape),
                provenance: Provenance::Observed,
                confidence: 0.95,
            },
        )
    }

    #[test]
    fn possession_rescaled_proportionally() {
        let map: FieldMap = [
            field(FieldKey::home(Stat::BallPossession), 61.0),
            field(FieldKey::away(Stat::BallPossession), 44.0),
        ]
        .into_iter()
        .collect();
        let (out, flags) = Validator::standard().validate(&map, None);
        let h = out[&FieldKey::home(Stat::BallPossession)].value;
        let a = out[&FieldKey::away(Stat::BallPossession)].value;
        assert!((h - 58.1).abs() < 1e-9);
        assert!((a - 41.9).abs() < 1e-9);
        assert_eq!(flags.len(), 2);
        assert!(flags.iter().all(|f| f.rule == FlagRule::PossessionSum));
        assert_eq!(flags[0].original_value, Some(61.0));
    }

    #[test]
    fn possession_within_tolerance_untouched() {
        let map: FieldMap = [
            field(FieldKey::home(Stat::BallPossession), 50.05),
            field(FieldKey::away(Stat::BallPossession), 50.0),
        ]
        .into_iter()
        .collect();
        let (out, flags) = Validator::standard().validate(&map, None);
        assert!(flags.is_empty());
        assert_eq!(out, map);
    }

    #[test]
    fn zero_possession_pair_splits_evenly() {
        let map: FieldMap = [
            field(FieldKey::home(Stat::BallPossession), 0.0),
            field(FieldKey::away(Stat::BallPossession), 0.0),
        ]
        .into_iter()
        .collect();
        let (out, _) = Validator::standard().validate(&map, None);
        assert_eq!(out[&FieldKey::home(Stat::BallPossession)].value, 50.0);
        assert_eq!(out[&FieldKey::away(Stat::BallPossession)].value, 50.0);
    }

    #[test]
    fn unknown_possession_pair_defaults_to_even_split() {
        let sentinel = |key: FieldKey| {
            (
                key,
                ResolvedField {
                    field: key,
                    value: 0.0,
                    source_kind: None,
                    provenance: Provenance::Missing,
                    confidence: 0.0,
                },
            )
        };
        let map: FieldMap = [
            sentinel(FieldKey::home(Stat::BallPossession)),
            sentinel(FieldKey::away(Stat::BallPossession)),
        ]
        .into_iter()
        .collect();
        let v = Validator::standard();
        let (out, flags) = v.validate(&map, None);
        for key in [FieldKey::home(Stat::BallPossession), FieldKey::away(Stat::BallPossession)] {
            assert_eq!(out[&key].value, 50.0);
            assert_eq!(out[&key].provenance, Provenance::Missing);
            assert_eq!(out[&key].confidence, 0.0);
        }
        assert!(flags.is_empty());
        let (again, _) = v.validate(&out, None);
        assert_eq!(again, out);
    }

    #[test]
    fn negative_counts_clipped_before_comparisons() {
        let map: FieldMap = [
            field(FieldKey::away(Stat::ShotsOffTarget), -3.0),
            field(FieldKey::away(Stat::PassAccuracy), 104.0),
        ]
        .into_iter()
        .collect();
        let (out, flags) = Validator::standard().validate(&map, None);
        assert_eq!(out[&FieldKey::away(Stat::ShotsOffTarget)].value, 0.0);
        assert_eq!(out[&FieldKey::away(Stat::PassAccuracy)].value, 100.0);
        let rules = flags.iter().map(|f| f.rule).collect::<Vec<_>>();
        assert_eq!(rules, vec![FlagRule::NonNegative, FlagRule::PercentageRange]);
    }

    #[test]
    fn accurate_passes_clipped_to_total() {
        let map: FieldMap = [
            field(FieldKey::home(Stat::AccuratePasses), 420.0),
            field(FieldKey::home(Stat::TotalPasses), 400.0),
        ]
        .into_iter()
        .collect();
        let (out, flags) = Validator::standard().validate(&map, None);
        assert_eq!(out[&FieldKey::home(Stat::AccuratePasses)].value, 400.0);
        assert_eq!(flags[0].rule, FlagRule::PassConsistency);
        assert_eq!(flags[0].corrected_value, Some(400.0));
    }

    #[test]
    fn monotonic_breach_is_flag_only() {
        let prev_map: FieldMap = [field(FieldKey::home(Stat::Corners), 5.0)]
            .into_iter()
            .collect();
        let previous = ResolvedSnapshot {
            match_id: "m".to_string(),
            minute: 40,
            catalog_version: 1,
            resolved_fields: prev_map.into_values().collect(),
            completeness_pct: 0.0,
            confidence_score: 0.0,
            validation_flags: Vec::new(),
        };
        let map: FieldMap = [field(FieldKey::home(Stat::Corners), 4.0)]
            .into_iter()
            .collect();
        let (out, flags) = Validator::standard().validate(&map, Some(&previous));
        assert_eq!(out[&FieldKey::home(Stat::Corners)].value, 4.0);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].rule, FlagRule::MonotonicCounter);
        assert_eq!(flags[0].corrected_value, None);
        assert_eq!(ValidationRule::MonotonicCounter.severity(), Severity::Soft);
    }

    #[test]
    fn validate_twice_is_stable() {
        let map: FieldMap = [
            field(FieldKey::home(Stat::BallPossession), 70.0),
            field(FieldKey::away(Stat::BallPossession), 45.0),
            field(FieldKey::home(Stat::TotalShots), 10.0),
            field(FieldKey::home(Stat::ShotsOnTarget), 13.0),
            field(FieldKey::away(Stat::Corners), -1.0),
        ]
        .into_iter()
        .collect();
        let v = Validator::standard();
        let (once, _) = v.validate(&map, None);
        let (twice, flags) = v.validate(&once, None);
        assert_eq!(once, twice);
        assert!(flags.is_empty());
    }
}
