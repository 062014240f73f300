use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;

use match_stats_resolver::config::EngineConfig;
use match_stats_resolver::derivation::DerivationRules;
use match_stats_resolver::engine::{Engine, EngineRegistry};
use match_stats_resolver::estimator::{CompetitionModel, EstimatorStore};
use match_stats_resolver::field::{FieldKey, Side, Stat};
use match_stats_resolver::fitting::prior_baseline;
use match_stats_resolver::observation::{MatchContext, Observation, ObservationBatch};
use match_stats_resolver::resolver::FieldResolver;
use match_stats_resolver::snapshot::{FieldMap, Provenance, ResolvedField};
use match_stats_resolver::source::{SourceKind, SourceRegistry};
use match_stats_resolver::validator::Validator;

const SOURCES: [&str; 3] = ["web_scrape", "direct_api", "mobile_api"];

fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_780_000_000, 0).unwrap()
}

fn key_at(idx: usize) -> FieldKey {
    FieldKey::all().nth(idx % 48).unwrap()
}

/// (field index, value, source index, age in seconds)
fn raw_observations() -> impl Strategy<Value = Vec<(usize, f64, usize, i64)>> {
    prop::collection::vec((0usize..48, 0.0f64..200.0, 0usize..3, 0i64..300), 0..60)
}

fn to_observations(raw: &[(usize, f64, usize, i64)]) -> Vec<Observation> {
    raw.iter()
        .map(|(idx, value, src, age)| {
            Observation::new(
                key_at(*idx),
                value.round(),
                SOURCES[*src],
                t0() - Duration::seconds(*age),
            )
        })
        .collect()
}

fn engine_with_baselines() -> Engine {
    let mut model = CompetitionModel::new(47);
    for key in FieldKey::all() {
        model.baselines.insert(key, prior_baseline(key.stat));
    }
    let mut store = EstimatorStore::empty();
    store.insert(model);
    Engine::new(
        EngineRegistry::standard(),
        Arc::new(store),
        EngineConfig::default(),
    )
}

fn candidate_map(raw: &[(usize, f64)]) -> FieldMap {
    raw.iter()
        .map(|(idx, value)| {
            let key = key_at(*idx);
            (
                key,
                ResolvedField {
                    field: key,
                    value: *value,
                    source_kind: Some(SourceKind::DirectApi),
                    provenance: Provenance::Observed,
                    confidence: 0.90,
                },
            )
        })
        .collect()
}

proptest! {
    #[test]
    fn resolver_never_selects_stale(raw in raw_observations()) {
        let reg = SourceRegistry::standard();
        let observations = to_observations(&raw);
        let out = FieldResolver::new(&reg).resolve(&observations, t0());

        for key in FieldKey::all() {
            let fresh = observations
                .iter()
                .filter(|o| o.key() == key)
                .filter(|o| {
                    reg.lookup(&o.source)
                        .is_some_and(|tier| !tier.is_stale(o.observed_at, t0()))
                })
                .collect::<Vec<_>>();
            match out.resolved.get(&key) {
                None => prop_assert!(fresh.is_empty()),
                Some(field) => {
                    prop_assert!(fresh.iter().any(|o| o.value == field.value));
                }
            }
        }
    }

    #[test]
    fn higher_tier_wins_regardless_of_order(
        idx in 0usize..48,
        a in 0.0f64..100.0,
        b in 0.0f64..100.0,
        age_a in 0i64..60,
        age_b in 0i64..60,
        tiers in (0usize..3, 0usize..3).prop_filter("distinct tiers", |(x, y)| x != y),
    ) {
        let reg = SourceRegistry::standard();
        let key = key_at(idx);
        let first = Observation::new(key, a, SOURCES[tiers.0], t0() - Duration::seconds(age_a));
        let second = Observation::new(key, b, SOURCES[tiers.1], t0() - Duration::seconds(age_b));
        let expected = if tiers.0 < tiers.1 { a } else { b };

        let forward = FieldResolver::new(&reg).resolve(&[first.clone(), second.clone()], t0());
        let reverse = FieldResolver::new(&reg).resolve(&[second, first], t0());
        prop_assert_eq!(forward.resolved[&key].value, expected);
        prop_assert_eq!(reverse.resolved[&key].value, expected);
    }

    #[test]
    fn derivation_is_idempotent(raw in raw_observations()) {
        let reg = SourceRegistry::standard();
        let rules = DerivationRules::standard();
        let resolved = FieldResolver::new(&reg)
            .resolve(&to_observations(&raw), t0())
            .resolved;
        let missing = FieldKey::all()
            .filter(|k| !resolved.contains_key(k))
            .collect::<BTreeSet<_>>();
        let first = rules.derive(&resolved, &missing, 0.80);

        let mut merged = resolved.clone();
        merged.extend(first.derived);
        let still_missing = FieldKey::all()
            .filter(|k| !merged.contains_key(k))
            .collect::<BTreeSet<_>>();
        let second = rules.derive(&merged, &still_missing, 0.80);
        prop_assert!(second.derived.is_empty());
    }

    #[test]
    fn validator_is_idempotent(
        raw in prop::collection::vec((0usize..48, -50.0f64..250.0), 0..48),
    ) {
        let validator = Validator::standard();
        let (once, _) = validator.validate(&candidate_map(&raw), None);
        let (twice, flags) = validator.validate(&once, None);
        prop_assert_eq!(&once, &twice);
        prop_assert!(flags.is_empty());
    }

    #[test]
    fn corrected_snapshot_holds_invariants(raw in raw_observations()) {
        let engine = engine_with_baselines();
        let batch = ObservationBatch {
            match_id: "prop".to_string(),
            minute: 60,
            collected_at: t0(),
            observations: to_observations(&raw),
        };
        let ctx = MatchContext::new(47, 60, 1, 1);
        for context in [None, Some(&ctx)] {
            let snap = engine.resolve(&batch, context, None);
            prop_assert_eq!(snap.resolved_fields.len(), 48);

            let sum = snap.value(FieldKey::home(Stat::BallPossession))
                + snap.value(FieldKey::away(Stat::BallPossession));
            prop_assert!((99.9..=100.1).contains(&sum), "possession sum {}", sum);

            for side in Side::BOTH {
                let on = snap.value(FieldKey::new(Stat::ShotsOnTarget, side));
                let total = snap.value(FieldKey::new(Stat::TotalShots, side));
                prop_assert!(on <= total, "on {} > total {}", on, total);
                let accurate = snap.value(FieldKey::new(Stat::AccuratePasses, side));
                let passes = snap.value(FieldKey::new(Stat::TotalPasses, side));
                prop_assert!(accurate <= passes);
            }
            prop_assert!(snap.resolved_fields.iter().all(|f| f.value >= 0.0));
        }
    }

    #[test]
    fn real_observation_never_lowers_completeness(
        raw in raw_observations(),
        pick in 0usize..48,
        value in 0.0f64..50.0,
    ) {
        let engine = engine_with_baselines();
        let ctx = MatchContext::new(47, 60, 0, 0);
        let batch = ObservationBatch {
            match_id: "prop".to_string(),
            minute: 60,
            collected_at: t0(),
            observations: to_observations(&raw),
        };
        let before = engine.resolve(&batch, Some(&ctx), None);
        let estimated = before.estimated_fields();
        prop_assume!(!estimated.is_empty());
        let key = estimated[pick % estimated.len()];

        let richer = batch.clone().with(Observation::new(key, value.round(), "web_scrape", t0()));
        let after = engine.resolve(&richer, Some(&ctx), None);
        prop_assert!(after.completeness_pct > before.completeness_pct);
    }
}
