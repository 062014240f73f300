use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    WebScrape,
    DirectApi,
    MobileApi,
    Derivation,
    MlEstimation,
    CompetitionBaseline,
}

impl SourceKind {
    pub const ALL: [SourceKind; 6] = [
        SourceKind::WebScrape,
        SourceKind::DirectApi,
        SourceKind::MobileApi,
        SourceKind::Derivation,
        SourceKind::MlEstimation,
        SourceKind::CompetitionBaseline,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SourceKind::WebScrape => "web_scrape",
            SourceKind::DirectApi => "direct_api",
            SourceKind::MobileApi => "mobile_api",
            SourceKind::Derivation => "derivation",
            SourceKind::MlEstimation => "ml_estimation",
            SourceKind::CompetitionBaseline => "competition_baseline",
        }
    }

    fn default_reliability(self) -> f64 {
        match self {
            SourceKind::WebScrape => 0.95,
            SourceKind::DirectApi => 0.90,
            SourceKind::MobileApi => 0.85,
            SourceKind::Derivation => 0.80,
            SourceKind::MlEstimation => 0.70,
            SourceKind::CompetitionBaseline => 0.60,
        }
    }

    fn default_max_age_secs(self) -> Option<i64> {
        match self {
            SourceKind::WebScrape => Some(120),
            SourceKind::DirectApi | SourceKind::MobileApi => Some(90),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTier {
    pub kind: SourceKind,
    pub name: String,
    pub base_reliability: f64,
    /// `None` for tiers that are produced inside the engine and never age.
    pub max_age_secs: Option<i64>,
}

impl SourceTier {
    pub fn is_stale(&self, observed_at: DateTime<Utc>, reference: DateTime<Utc>) -> bool {
        let Some(max_age) = self.max_age_secs else {
            return false;
        };
        reference.signed_duration_since(observed_at) > Duration::seconds(max_age)
    }
}

/// Static trust table. Looked up by the `source` name carried on each
/// observation; a name missing from the table is an unknown source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRegistry {
    tiers: Vec<SourceTier>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl SourceRegistry {
    pub fn standard() -> Self {
        let tiers = SourceKind::ALL
            .into_iter()
            .map(|kind| SourceTier {
                kind,
                name: kind.name().to_string(),
                base_reliability: kind.default_reliability(),
                max_age_secs: kind.default_max_age_secs(),
            })
            .collect();
        Self { tiers }
    }

    pub fn with_max_age(mut self, kind: SourceKind, secs: i64) -> Self {
        if let Some(tier) = self.tiers.iter_mut().find(|t| t.kind == kind) {
            tier.max_age_secs = Some(secs.max(0));
        }
        self
    }

    pub fn with_reliability(mut self, kind: SourceKind, reliability: f64) -> Self {
        if let Some(tier) = self.tiers.iter_mut().find(|t| t.kind == kind) {
            tier.base_reliability = reliability.clamp(0.0, 1.0);
        }
        self
    }

    pub fn lookup(&self, name: &str) -> Option<&SourceTier> {
        let want = name.trim().to_ascii_lowercase();
        self.tiers.iter().find(|t| t.name == want)
    }

    pub fn tier(&self, kind: SourceKind) -> Option<&SourceTier> {
        self.tiers.iter().find(|t| t.kind == kind)
    }

    pub fn reliability(&self, kind: SourceKind) -> f64 {
        self.tier(kind)
            .map(|t| t.base_reliability)
            .unwrap_or_else(|| kind.default_reliability())
    }

    pub fn tiers(&self) -> &[SourceTier] {
        &self.tiers
    }
}
