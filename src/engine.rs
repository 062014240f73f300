use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;
use rayon::prelude::*;
use tracing::debug;

use crate::config::EngineConfig;
use crate::derivation::DerivationRules;
use crate::estimator::{Estimator, EstimatorStore};
use crate::field::{CATALOG_VERSION, FieldKey};
use crate::issue::ResolutionIssue;
use crate::observation::{MatchContext, ObservationBatch};
use crate::resolver::FieldResolver;
use crate::scoring::{self, Score};
use crate::snapshot::{FieldMap, Provenance, ResolvedField, ResolvedSnapshot, Stage, ValidationFlag};
use crate::source::{SourceKind, SourceRegistry};
use crate::validator::Validator;

/// Versioned bundle of every rule table the engine consults. Passed in at
/// construction so tests can swap any part of it.
#[derive(Debug, Clone)]
pub struct EngineRegistry {
    pub catalog_version: u32,
    pub sources: SourceRegistry,
    pub derivations: DerivationRules,
    pub validator: Validator,
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl EngineRegistry {
    pub fn standard() -> Self {
        Self {
            catalog_version: CATALOG_VERSION,
            sources: SourceRegistry::standard(),
            derivations: DerivationRules::standard(),
            validator: Validator::standard(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            sources: config.source_registry(),
            ..Self::standard()
        }
    }

    pub fn with_sources(mut self, sources: SourceRegistry) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_derivations(mut self, derivations: DerivationRules) -> Self {
        self.derivations = derivations;
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }
}

/// Shared flag the surrounding pipeline flips on shutdown. Checked between
/// stages; an abandoned snapshot is dropped whole.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One unit of parallel work: a single match-minute.
#[derive(Debug, Clone)]
pub struct ResolveJob {
    pub batch: ObservationBatch,
    pub context: Option<MatchContext>,
    pub previous: Option<ResolvedSnapshot>,
}

struct SnapshotBuild<'a> {
    batch: &'a ObservationBatch,
    context: Option<&'a MatchContext>,
    previous: Option<&'a ResolvedSnapshot>,
    stage: Stage,
    fields: FieldMap,
    flags: Vec<ValidationFlag>,
    score: Option<Score>,
}

impl SnapshotBuild<'_> {
    fn record(&mut self, issues: Vec<ResolutionIssue>) {
        self.flags
            .extend(issues.iter().filter_map(ResolutionIssue::to_flag));
    }

    fn unresolved(&self) -> BTreeSet<FieldKey> {
        FieldKey::all()
            .filter(|k| !self.fields.contains_key(k))
            .collect()
    }
}

pub struct Engine {
    registry: EngineRegistry,
    store: Arc<EstimatorStore>,
    config: EngineConfig,
    pool: OnceCell<Option<rayon::ThreadPool>>,
}

impl Engine {
    pub fn new(registry: EngineRegistry, store: Arc<EstimatorStore>, config: EngineConfig) -> Self {
        Self {
            registry,
            store,
            config,
            pool: OnceCell::new(),
        }
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    pub fn store(&self) -> &EstimatorStore {
        &self.store
    }

    pub fn resolve(
        &self,
        batch: &ObservationBatch,
        context: Option<&MatchContext>,
        previous: Option<&ResolvedSnapshot>,
    ) -> ResolvedSnapshot {
        let mut build = self.begin(batch, context, previous);
        while !build.stage.is_terminal() {
            self.step(&mut build);
        }
        self.seal(build)
    }

    /// `None` when `cancel` fired before the snapshot was scored.
    pub fn resolve_cancellable(
        &self,
        batch: &ObservationBatch,
        context: Option<&MatchContext>,
        previous: Option<&ResolvedSnapshot>,
        cancel: &CancelToken,
    ) -> Option<ResolvedSnapshot> {
        let mut build = self.begin(batch, context, previous);
        while !build.stage.is_terminal() {
            if cancel.is_cancelled() {
                debug!(
                    match_id = %batch.match_id,
                    minute = batch.minute,
                    stage = ?build.stage,
                    "resolution abandoned"
                );
                return None;
            }
            self.step(&mut build);
        }
        Some(self.seal(build))
    }

    /// Independent match-minutes across the worker pool; output order follows
    /// `jobs`.
    pub fn resolve_many(&self, jobs: &[ResolveJob]) -> Vec<ResolvedSnapshot> {
        self.with_pool(|| {
            jobs.par_iter()
                .map(|job| self.resolve(&job.batch, job.context.as_ref(), job.previous.as_ref()))
                .collect()
        })
    }

    pub fn resolve_many_cancellable(
        &self,
        jobs: &[ResolveJob],
        cancel: &CancelToken,
    ) -> Vec<Option<ResolvedSnapshot>> {
        self.with_pool(|| {
            jobs.par_iter()
                .map(|job| {
                    self.resolve_cancellable(
                        &job.batch,
                        job.context.as_ref(),
                        job.previous.as_ref(),
                        cancel,
                    )
                })
                .collect()
        })
    }

    fn begin<'a>(
        &self,
        batch: &'a ObservationBatch,
        context: Option<&'a MatchContext>,
        previous: Option<&'a ResolvedSnapshot>,
    ) -> SnapshotBuild<'a> {
        SnapshotBuild {
            batch,
            context,
            previous,
            stage: Stage::Collecting,
            fields: FieldMap::new(),
            flags: Vec::new(),
            score: None,
        }
    }

    fn step(&self, build: &mut SnapshotBuild<'_>) {
        let Some(next) = build.stage.next() else {
            return;
        };
        match next {
            Stage::Collecting => {}
            Stage::Resolving => {
                let out = FieldResolver::new(&self.registry.sources)
                    .resolve(&build.batch.observations, build.batch.collected_at);
                build.fields = out.resolved;
                build.record(out.issues);
            }
            Stage::Deriving => {
                let unresolved = build.unresolved();
                let confidence = self.registry.sources.reliability(SourceKind::Derivation);
                let out = self
                    .registry
                    .derivations
                    .derive(&build.fields, &unresolved, confidence);
                build.fields.extend(out.derived);
                build.record(out.issues);
            }
            Stage::Estimating => {
                let missing = build.unresolved();
                let out = Estimator::new(
                    &self.store,
                    &self.registry.sources,
                    self.config.min_model_samples,
                )
                .estimate(&build.fields, &missing, build.context);
                build.fields.extend(out.estimated);
                build.record(out.issues);
            }
            Stage::Validating => {
                let (fields, flags) = self
                    .registry
                    .validator
                    .validate(&build.fields, build.previous);
                build.fields = fields;
                build.flags.extend(flags);
            }
            Stage::Scored => {
                build.score = Some(scoring::score(&build.fields));
            }
        }
        debug!(
            match_id = %build.batch.match_id,
            minute = build.batch.minute,
            from = ?build.stage,
            to = ?next,
            fields = build.fields.len(),
            "stage"
        );
        build.stage = next;
    }

    fn seal(&self, mut build: SnapshotBuild<'_>) -> ResolvedSnapshot {
        let score = build
            .score
            .unwrap_or_else(|| scoring::score(&build.fields));
        let resolved_fields = FieldKey::all()
            .map(|key| build.fields.remove(&key).unwrap_or_else(|| sentinel(key)))
            .collect::<Vec<_>>();
        ResolvedSnapshot {
            match_id: build.batch.match_id.clone(),
            minute: build.batch.minute,
            catalog_version: self.registry.catalog_version,
            resolved_fields,
            completeness_pct: score.completeness_pct,
            confidence_score: score.confidence_score,
            validation_flags: build.flags,
        }
    }

    fn with_pool<T: Send>(&self, action: impl FnOnce() -> T + Send) -> T {
        let pool = self.pool.get_or_init(|| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.parallelism)
                .build()
                .ok()
        });
        if let Some(pool) = pool.as_ref() {
            pool.install(action)
        } else {
            action()
        }
    }
}

fn sentinel(key: FieldKey) -> ResolvedField {
    ResolvedField {
        field: key,
        value: 0.0,
        source_kind: None,
        provenance: Provenance::Missing,
        confidence: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::field::Stat;
    use crate::observation::Observation;

    fn engine() -> Engine {
        Engine::new(
            EngineRegistry::standard(),
            Arc::new(EstimatorStore::empty()),
            EngineConfig::default(),
        )
    }

    #[test]
    fn every_field_present_exactly_once() {
        let now = Utc::now();
        let batch = ObservationBatch::new("m1", 10, now).with(Observation::new(
            FieldKey::home(Stat::Corners),
            2.0,
            "web_scrape",
            now,
        ));
        let snap = engine().resolve(&batch, None, None);
        assert_eq!(snap.resolved_fields.len(), 48);
        let keys = snap
            .resolved_fields
            .iter()
            .map(|f| f.field)
            .collect::<BTreeSet<_>>();
        assert_eq!(keys.len(), 48);
    }

    #[test]
    fn cancelled_token_abandons_whole_snapshot() {
        let now = Utc::now();
        let batch = ObservationBatch::new("m1", 10, now);
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(
            engine()
                .resolve_cancellable(&batch, None, None, &cancel)
                .is_none()
        );
    }
}
