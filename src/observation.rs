use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::field::{FieldKey, Side, Stat};

/// A single reading reported by one collector. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub field: Stat,
    pub side: Side,
    pub value: f64,
    /// Registered source tier name, e.g. `web_scrape`.
    pub source: String,
    pub observed_at: DateTime<Utc>,
    #[serde(default = "default_raw_confidence")]
    pub raw_confidence: f64,
}

fn default_raw_confidence() -> f64 {
    1.0
}

impl Observation {
    pub fn new(
        key: FieldKey,
        value: f64,
        source: impl Into<String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            field: key.stat,
            side: key.side,
            value,
            source: source.into(),
            observed_at,
            raw_confidence: 1.0,
        }
    }

    pub fn key(&self) -> FieldKey {
        FieldKey::new(self.field, self.side)
    }
}

/// Everything collected for one match-minute once every fetcher returned or
/// timed out. `collected_at` is the reference point for staleness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationBatch {
    pub match_id: String,
    pub minute: u16,
    pub collected_at: DateTime<Utc>,
    #[serde(default)]
    pub observations: Vec<Observation>,
}

impl ObservationBatch {
    pub fn new(match_id: impl Into<String>, minute: u16, collected_at: DateTime<Utc>) -> Self {
        Self {
            match_id: match_id.into(),
            minute,
            collected_at,
            observations: Vec::new(),
        }
    }

    pub fn push(&mut self, obs: Observation) {
        self.observations.push(obs);
    }

    pub fn with(mut self, obs: Observation) -> Self {
        self.observations.push(obs);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchContext {
    pub competition_id: u32,
    pub minute: u16,
    pub score_home: u8,
    pub score_away: u8,
}

impl MatchContext {
    pub fn new(competition_id: u32, minute: u16, score_home: u8, score_away: u8) -> Self {
        Self {
            competition_id,
            minute,
            score_home,
            score_away,
        }
    }

    /// Goal difference from `side`'s point of view.
    pub fn score_diff(&self, side: Side) -> i32 {
        let diff = i32::from(self.score_home) - i32::from(self.score_away);
        match side {
            Side::Home => diff,
            Side::Away => -diff,
        }
    }
}
