use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::field::{FieldKey, Side, Stat};
use crate::fitting::prior_baseline;
use crate::history::HistoryRow;
use crate::observation::{MatchContext, Observation, ObservationBatch};

/// Collector profile: which source name it reports under and how flaky it is.
#[derive(Debug, Clone)]
pub struct FeedProfile {
    pub source: &'static str,
    pub coverage: f64,
    pub noise: f64,
    pub stale_rate: f64,
}

pub fn default_profiles() -> Vec<FeedProfile> {
    vec![
        FeedProfile {
            source: "web_scrape",
            coverage: 0.55,
            noise: 0.0,
            stale_rate: 0.05,
        },
        FeedProfile {
            source: "direct_api",
            coverage: 0.65,
            noise: 0.05,
            stale_rate: 0.08,
        },
        FeedProfile {
            source: "mobile_api",
            coverage: 0.70,
            noise: 0.10,
            stale_rate: 0.10,
        },
    ]
}

/// Synthetic match whose true statistics grow minute by minute; every call to
/// `batch_at` samples what each collector would have reported.
pub struct SyntheticMatch {
    pub match_id: String,
    pub competition_id: u32,
    rng: StdRng,
    strength_home: f64,
    possession_home: f64,
    profiles: Vec<FeedProfile>,
}

impl SyntheticMatch {
    pub fn new(match_id: impl Into<String>, competition_id: u32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let strength_home = rng.gen_range(0.7..1.3);
        let possession_home = rng.gen_range(38.0..62.0);
        Self {
            match_id: match_id.into(),
            competition_id,
            rng,
            strength_home,
            possession_home,
            profiles: default_profiles(),
        }
    }

    /// Noise-free values at `minute`, consistent with the shot and pass
    /// identities.
    pub fn truth_at(&self, minute: u16) -> BTreeMap<FieldKey, f64> {
        let t = f64::from(minute.min(90)) / 90.0;
        let mut out = BTreeMap::new();
        for side in Side::BOTH {
            let k = match side {
                Side::Home => self.strength_home,
                Side::Away => 2.0 - self.strength_home,
            };
            let count = |stat: Stat| (prior_baseline(stat) * k * t).round();
            let on = count(Stat::ShotsOnTarget);
            let off = count(Stat::ShotsOffTarget);
            let blocked = count(Stat::BlockedShots);
            let total = on + off + blocked;
            let inside = (total * 0.65).round();
            let total_passes = count(Stat::TotalPasses);
            let accuracy = (prior_baseline(Stat::PassAccuracy) * k.sqrt()).clamp(55.0, 94.0);
            let accurate = (total_passes * accuracy / 100.0).round();
            let possession = match side {
                Side::Home => self.possession_home,
                Side::Away => 100.0 - self.possession_home,
            };

            let mut put = |stat: Stat, v: f64| {
                out.insert(FieldKey::new(stat, side), v);
            };
            put(Stat::BallPossession, (possession * 10.0).round() / 10.0);
            put(
                Stat::ExpectedGoals,
                ((prior_baseline(Stat::ExpectedGoals) * k * t) * 100.0).round() / 100.0,
            );
            put(Stat::TotalShots, total);
            put(Stat::ShotsOnTarget, on);
            put(Stat::ShotsOffTarget, off);
            put(Stat::BlockedShots, blocked);
            put(Stat::ShotsInsideBox, inside);
            put(Stat::ShotsOutsideBox, total - inside);
            put(Stat::TotalPasses, total_passes);
            put(Stat::AccuratePasses, accurate);
            put(
                Stat::PassAccuracy,
                if total_passes > 0.0 {
                    (accurate / total_passes * 1000.0).round() / 10.0
                } else {
                    0.0
                },
            );
            for stat in [
                Stat::BigChances,
                Stat::BigChancesMissed,
                Stat::Corners,
                Stat::Offsides,
                Stat::Fouls,
                Stat::YellowCards,
                Stat::RedCards,
                Stat::Tackles,
                Stat::Interceptions,
                Stat::Clearances,
                Stat::Saves,
                Stat::Crosses,
                Stat::DuelsWon,
            ] {
                put(stat, count(stat));
            }
        }
        out
    }

    pub fn context_at(&self, minute: u16) -> MatchContext {
        MatchContext::new(self.competition_id, minute, 0, 0)
    }

    pub fn batch_at(&mut self, minute: u16, collected_at: DateTime<Utc>) -> ObservationBatch {
        let truth = self.truth_at(minute);
        let mut batch = ObservationBatch::new(self.match_id.clone(), minute, collected_at);
        let profiles = self.profiles.clone();
        for profile in &profiles {
            for (key, value) in &truth {
                if !self.rng.gen_bool(profile.coverage.clamp(0.0, 1.0)) {
                    continue;
                }
                let jitter = if profile.noise > 0.0 {
                    1.0 + self.rng.gen_range(-profile.noise..profile.noise)
                } else {
                    1.0
                };
                let reported = if key.stat.is_percentage() {
                    (value * jitter * 10.0).round() / 10.0
                } else {
                    (value * jitter).round()
                };
                let age = if self.rng.gen_bool(profile.stale_rate.clamp(0.0, 1.0)) {
                    self.rng.gen_range(300..900)
                } else {
                    self.rng.gen_range(0..45)
                };
                batch.push(Observation::new(
                    *key,
                    reported,
                    profile.source,
                    collected_at - Duration::seconds(age),
                ));
            }
        }
        batch
    }

    /// Truth rows for every `step` minutes, used to seed a history store.
    pub fn history_rows(&self, step: u16) -> Vec<HistoryRow> {
        (step..=90)
            .step_by(usize::from(step.max(1)))
            .map(|minute| HistoryRow {
                match_id: self.match_id.clone(),
                competition_id: self.competition_id,
                minute,
                score_home: 0,
                score_away: 0,
                values: self.truth_at(minute),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truth_respects_identities() {
        let m = SyntheticMatch::new("s1", 47, 7);
        let truth = m.truth_at(60);
        assert_eq!(truth.len(), 48);
        for side in Side::BOTH {
            let v = |s: Stat| truth[&FieldKey::new(s, side)];
            assert_eq!(
                v(Stat::TotalShots),
                v(Stat::ShotsOnTarget) + v(Stat::ShotsOffTarget) + v(Stat::BlockedShots)
            );
            assert!(v(Stat::AccuratePasses) <= v(Stat::TotalPasses));
        }
        let poss = truth[&FieldKey::home(Stat::BallPossession)]
            + truth[&FieldKey::away(Stat::BallPossession)];
        assert!((poss - 100.0).abs() < 0.11);
    }

    #[test]
    fn same_seed_same_batch() {
        let now = Utc::now();
        let a = SyntheticMatch::new("s1", 47, 42).batch_at(30, now);
        let b = SyntheticMatch::new("s1", 47, 42).batch_at(30, now);
        assert_eq!(a, b);
        assert!(!a.observations.is_empty());
    }
}
