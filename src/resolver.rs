use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::field::FieldKey;
use crate::issue::ResolutionIssue;
use crate::observation::Observation;
use crate::snapshot::{FieldMap, Provenance, ResolvedField};
use crate::source::{SourceRegistry, SourceTier};

#[derive(Debug, Clone, Default)]
pub struct ResolverOutcome {
    pub resolved: FieldMap,
    pub issues: Vec<ResolutionIssue>,
}

/// Priority arbitration between competing sources. Values are never blended:
/// the highest tier wins, the freshest reading breaks ties.
pub struct FieldResolver<'a> {
    sources: &'a SourceRegistry,
}

impl<'a> FieldResolver<'a> {
    pub fn new(sources: &'a SourceRegistry) -> Self {
        Self { sources }
    }

    pub fn resolve(&self, observations: &[Observation], reference: DateTime<Utc>) -> ResolverOutcome {
        let mut out = ResolverOutcome::default();
        let mut groups: BTreeMap<FieldKey, Vec<(&Observation, &SourceTier)>> = BTreeMap::new();

        for obs in observations {
            let key = obs.key();
            let Some(tier) = self.sources.lookup(&obs.source) else {
                warn!(field = %key, source = %obs.source, "observation from unregistered source");
                out.issues.push(ResolutionIssue::UnknownSource {
                    field: key,
                    origin: obs.source.clone(),
                    value: obs.value,
                });
                continue;
            };
            if !obs.value.is_finite() {
                debug!(field = %key, source = %obs.source, "dropping non-finite observation");
                continue;
            }
            if tier.is_stale(obs.observed_at, reference) {
                let age_secs = reference.signed_duration_since(obs.observed_at).num_seconds();
                debug!(field = %key, source = %obs.source, age_secs, "stale observation");
                out.issues.push(ResolutionIssue::StaleObservation {
                    field: key,
                    origin: obs.source.clone(),
                    age_secs,
                });
                continue;
            }
            groups.entry(key).or_default().push((obs, tier));
        }

        for (key, candidates) in groups {
            let Some((winner, tier)) = candidates.into_iter().max_by(|a, b| rank(*a, *b)) else {
                continue;
            };
            out.resolved.insert(
                key,
                ResolvedField {
                    field: key,
                    value: winner.value,
                    source_kind: Some(tier.kind),
                    provenance: Provenance::Observed,
                    confidence: tier.base_reliability,
                },
            );
        }
        out
    }
}

// Tier first, then recency. The value comparison only keeps the pick
// independent of arrival order when everything else is equal.
fn rank(a: (&Observation, &SourceTier), b: (&Observation, &SourceTier)) -> Ordering {
    a.1.base_reliability
        .total_cmp(&b.1.base_reliability)
        .then(a.0.observed_at.cmp(&b.0.observed_at))
        .then(a.0.value.total_cmp(&b.0.value))
}
