use std::env;
use std::path::PathBuf;

use crate::source::{SourceKind, SourceRegistry};

const CACHE_DIR: &str = "match_stats_resolver";
const STORE_FILE: &str = "estimator_store.json";
const HISTORY_FILE: &str = "history.sqlite";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub parallelism: usize,
    pub min_model_samples: usize,
    /// Per-tier max-age overrides in seconds.
    pub max_age_overrides: Vec<(SourceKind, i64)>,
    pub store_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            min_model_samples: 30,
            max_age_overrides: Vec::new(),
            store_path: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let parallelism = env::var("RESOLVER_PARALLELISM")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(defaults.parallelism)
            .clamp(1, 64);
        let min_model_samples = env::var("MIN_MODEL_SAMPLES")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(defaults.min_model_samples)
            .max(1);

        let mut max_age_overrides = Vec::new();
        for kind in [SourceKind::WebScrape, SourceKind::DirectApi, SourceKind::MobileApi] {
            let key = format!("SOURCE_MAX_AGE_{}_SECS", kind.name().to_ascii_uppercase());
            if let Some(secs) = env::var(&key).ok().and_then(|v| v.trim().parse::<i64>().ok()) {
                max_age_overrides.push((kind, secs.clamp(1, 3600)));
            }
        }

        let store_path = env::var("ESTIMATOR_STORE_PATH")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(default_store_path);

        Self {
            parallelism,
            min_model_samples,
            max_age_overrides,
            store_path,
        }
    }

    pub fn source_registry(&self) -> SourceRegistry {
        self.max_age_overrides
            .iter()
            .fold(SourceRegistry::standard(), |reg, (kind, secs)| {
                reg.with_max_age(*kind, *secs)
            })
    }
}

pub fn app_cache_dir() -> Option<PathBuf> {
    // Prefer XDG cache.
    if let Ok(base) = env::var("XDG_CACHE_HOME") {
        if !base.trim().is_empty() {
            return Some(PathBuf::from(base).join(CACHE_DIR));
        }
    }
    let home = env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join(CACHE_DIR))
}

pub fn default_store_path() -> Option<PathBuf> {
    app_cache_dir().map(|dir| dir.join(STORE_FILE))
}

pub fn default_history_path() -> Option<PathBuf> {
    app_cache_dir().map(|dir| dir.join(HISTORY_FILE))
}
