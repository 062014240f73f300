use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::field::{FieldKey, Side, Stat};
use crate::issue::ResolutionIssue;
use crate::snapshot::{FieldMap, Provenance, ResolvedField};
use crate::source::SourceKind;

pub const RULES_VERSION: u32 = 1;

/// Pure arithmetic over the input values, in declaration order. `None` means
/// the identity has no answer for these inputs (e.g. a zero denominator).
pub type RuleFn = fn(&[f64]) -> Option<f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideRef {
    Same,
    Opposite,
}

impl SideRef {
    fn apply(self, side: Side) -> Side {
        match self {
            SideRef::Same => side,
            SideRef::Opposite => side.opposite(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DerivationRule {
    pub name: &'static str,
    pub target: FieldKey,
    pub inputs: Vec<FieldKey>,
    eval: RuleFn,
}

impl DerivationRule {
    pub fn evaluate(&self, values: &[f64]) -> Option<f64> {
        (self.eval)(values).filter(|v| v.is_finite())
    }

    fn inputs_ready(&self, known: &FieldMap) -> Option<Vec<f64>> {
        self.inputs
            .iter()
            .map(|key| known.get(key).map(|f| f.value))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DerivationOutcome {
    pub derived: FieldMap,
    pub passes: usize,
    pub issues: Vec<ResolutionIssue>,
}

/// Versioned rule table with a precomputed evaluation order and a hard pass
/// ceiling. Built once and injected into the engine.
#[derive(Debug, Clone)]
pub struct DerivationRules {
    version: u32,
    rules: Vec<DerivationRule>,
    order: Vec<usize>,
    max_passes: usize,
}

#[derive(Debug, Default)]
pub struct DerivationRulesBuilder {
    version: u32,
    rules: Vec<DerivationRule>,
    max_passes: Option<usize>,
}

impl DerivationRulesBuilder {
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn rule(
        mut self,
        name: &'static str,
        target: FieldKey,
        inputs: &[FieldKey],
        eval: RuleFn,
    ) -> Self {
        self.rules.push(DerivationRule {
            name,
            target,
            inputs: inputs.to_vec(),
            eval,
        });
        self
    }

    /// Registers the rule once per side; inputs are given relative to the
    /// target's side.
    pub fn per_side(
        mut self,
        name: &'static str,
        target: Stat,
        inputs: &[(Stat, SideRef)],
        eval: RuleFn,
    ) -> Self {
        for side in Side::BOTH {
            let keys = inputs
                .iter()
                .map(|(stat, side_ref)| FieldKey::new(*stat, side_ref.apply(side)))
                .collect::<Vec<_>>();
            self = self.rule(name, FieldKey::new(target, side), &keys, eval);
        }
        self
    }

    pub fn max_passes(mut self, passes: usize) -> Self {
        self.max_passes = Some(passes.max(1));
        self
    }

    pub fn build(self) -> DerivationRules {
        let (order, depth) = evaluation_order(&self.rules);
        DerivationRules {
            version: self.version,
            max_passes: self.max_passes.unwrap_or(depth),
            order,
            rules: self.rules,
        }
    }
}

impl DerivationRules {
    pub fn builder() -> DerivationRulesBuilder {
        DerivationRulesBuilder::default()
    }

    pub fn empty() -> Self {
        Self::builder().build()
    }

    pub fn standard() -> Self {
        use SideRef::{Opposite, Same};
        use Stat::*;

        Self::builder()
            .version(RULES_VERSION)
            .per_side(
                "total_shots_from_box_split",
                TotalShots,
                &[(ShotsInsideBox, Same), (ShotsOutsideBox, Same)],
                sum,
            )
            .per_side(
                "total_shots_from_outcomes",
                TotalShots,
                &[(ShotsOnTarget, Same), (ShotsOffTarget, Same), (BlockedShots, Same)],
                sum,
            )
            .per_side(
                "shots_off_target",
                ShotsOffTarget,
                &[(TotalShots, Same), (ShotsOnTarget, Same), (BlockedShots, Same)],
                first_minus_rest,
            )
            .per_side(
                "shots_on_target",
                ShotsOnTarget,
                &[(TotalShots, Same), (ShotsOffTarget, Same), (BlockedShots, Same)],
                first_minus_rest,
            )
            .per_side(
                "blocked_shots",
                BlockedShots,
                &[(TotalShots, Same), (ShotsOnTarget, Same), (ShotsOffTarget, Same)],
                first_minus_rest,
            )
            .per_side(
                "shots_inside_box",
                ShotsInsideBox,
                &[(TotalShots, Same), (ShotsOutsideBox, Same)],
                first_minus_rest,
            )
            .per_side(
                "shots_outside_box",
                ShotsOutsideBox,
                &[(TotalShots, Same), (ShotsInsideBox, Same)],
                first_minus_rest,
            )
            .per_side(
                "pass_accuracy",
                PassAccuracy,
                &[(AccuratePasses, Same), (TotalPasses, Same)],
                pass_accuracy,
            )
            .per_side(
                "accurate_passes",
                AccuratePasses,
                &[(PassAccuracy, Same), (TotalPasses, Same)],
                accurate_passes,
            )
            .per_side(
                "total_passes",
                TotalPasses,
                &[(AccuratePasses, Same), (PassAccuracy, Same)],
                total_passes,
            )
            .per_side(
                "ball_possession_complement",
                BallPossession,
                &[(BallPossession, Opposite)],
                complement_of_100,
            )
            .build()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn rules(&self) -> &[DerivationRule] {
        &self.rules
    }

    pub fn max_passes(&self) -> usize {
        self.max_passes
    }

    pub fn targets(&self) -> BTreeSet<FieldKey> {
        self.rules.iter().map(|r| r.target).collect()
    }

    /// Fills what it can of `unresolved` from `resolved`. Fields already in
    /// `resolved` are never touched, so re-running on its own output is a no-op.
    pub fn derive(
        &self,
        resolved: &FieldMap,
        unresolved: &BTreeSet<FieldKey>,
        confidence: f64,
    ) -> DerivationOutcome {
        let mut known = resolved.clone();
        let mut out = DerivationOutcome::default();
        let mut last_pass_fired = false;

        while out.passes < self.max_passes {
            out.passes += 1;
            last_pass_fired = false;
            for idx in &self.order {
                let rule = &self.rules[*idx];
                if known.contains_key(&rule.target) || !unresolved.contains(&rule.target) {
                    continue;
                }
                let Some(values) = rule.inputs_ready(&known) else {
                    continue;
                };
                let Some(value) = rule.evaluate(&values) else {
                    continue;
                };
                debug!(rule = rule.name, field = %rule.target, value, "derived");
                let field = ResolvedField {
                    field: rule.target,
                    value,
                    source_kind: Some(SourceKind::Derivation),
                    provenance: Provenance::Derived,
                    confidence,
                };
                known.insert(rule.target, field.clone());
                out.derived.insert(rule.target, field);
                last_pass_fired = true;
            }
            if !last_pass_fired {
                break;
            }
        }

        if last_pass_fired && out.passes >= self.max_passes {
            let mut pending = BTreeSet::new();
            for rule in &self.rules {
                if known.contains_key(&rule.target) || !unresolved.contains(&rule.target) {
                    continue;
                }
                if rule.inputs_ready(&known).is_some() {
                    pending.insert(rule.target);
                }
            }
            for field in pending {
                out.issues.push(ResolutionIssue::DerivationCycle {
                    field,
                    passes: out.passes,
                });
            }
        }
        out
    }
}

/// Kahn layering over rules (rule A feeds rule B when A's target is one of
/// B's inputs). Rules stuck in cycles keep registration order after the
/// acyclic layers. Returns the order and the pass ceiling.
fn evaluation_order(rules: &[DerivationRule]) -> (Vec<usize>, usize) {
    let mut producers: HashMap<FieldKey, Vec<usize>> = HashMap::new();
    for (idx, rule) in rules.iter().enumerate() {
        producers.entry(rule.target).or_default().push(idx);
    }

    let mut indegree = vec![0usize; rules.len()];
    let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); rules.len()];
    for (idx, rule) in rules.iter().enumerate() {
        for input in &rule.inputs {
            if let Some(ps) = producers.get(input) {
                for p in ps {
                    indegree[idx] += 1;
                    consumers[*p].push(idx);
                }
            }
        }
    }

    let mut order = Vec::with_capacity(rules.len());
    let mut placed = vec![false; rules.len()];
    let mut layer = (0..rules.len())
        .filter(|i| indegree[*i] == 0)
        .collect::<Vec<_>>();
    let mut layers = 0usize;
    while !layer.is_empty() {
        layers += 1;
        let mut next = Vec::new();
        for idx in layer {
            placed[idx] = true;
            order.push(idx);
            for c in &consumers[idx] {
                indegree[*c] -= 1;
                if indegree[*c] == 0 {
                    next.push(*c);
                }
            }
        }
        next.sort_unstable();
        layer = next;
    }

    let cyclic = (0..rules.len()).filter(|i| !placed[*i]).collect::<Vec<_>>();
    // Each productive pass settles at least one target, so the number of
    // distinct cyclic targets bounds the passes the remainder can need.
    let cyclic_targets = cyclic
        .iter()
        .map(|i| rules[*i].target)
        .collect::<BTreeSet<_>>()
        .len();
    order.extend(cyclic);
    (order, (layers + cyclic_targets).max(1))
}

fn sum(v: &[f64]) -> Option<f64> {
    Some(v.iter().sum())
}

fn first_minus_rest(v: &[f64]) -> Option<f64> {
    let (first, rest) = v.split_first()?;
    Some(first - rest.iter().sum::<f64>())
}

fn pass_accuracy(v: &[f64]) -> Option<f64> {
    let [accurate, total] = v else {
        return None;
    };
    if *total <= 0.0 {
        return None;
    }
    Some(((accurate / total) * 1000.0).round() / 10.0)
}

fn accurate_passes(v: &[f64]) -> Option<f64> {
    let [pct, total] = v else {
        return None;
    };
    Some((pct * total / 100.0).round())
}

fn total_passes(v: &[f64]) -> Option<f64> {
    let [accurate, pct] = v else {
        return None;
    };
    if *pct <= 0.0 {
        return None;
    }
    Some((accurate * 100.0 / pct).round())
}

fn complement_of_100(v: &[f64]) -> Option<f64> {
    v.first().map(|x| 100.0 - x)
}
