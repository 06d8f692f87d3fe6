pub mod rayon_pool;
pub mod similarity;

use std::sync::Arc;

use crate::config::{CombinationRule, Direction, PredicateConfig, PredicateKind, SimilarityFunction};
use crate::models::{CandidatePair, MatchDecision, PredicateOutcome, Record, Value, Verdict};

/// A configured comparison, resolved once before the run and immutable during it.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub name: Arc<str>,
    pub field: String,
    pub other_field: Option<String>,
    pub kind: Comparison,
    pub required: bool,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Comparison {
    Equality,
    Similarity { function: SimilarityFunction, threshold: f64, direction: Direction },
}

impl From<&PredicateConfig> for Predicate {
    fn from(cfg: &PredicateConfig) -> Self {
        let kind = match cfg.kind {
            PredicateKind::Equality => Comparison::Equality,
            PredicateKind::Similarity { function, threshold, direction } => Comparison::Similarity {
                function,
                threshold,
                direction: direction.unwrap_or_else(|| function.natural_direction()),
            },
        };
        Self {
            name: Arc::from(cfg.name.as_str()),
            field: cfg.field.clone(),
            other_field: cfg.other_field.clone(),
            kind,
            required: cfg.required,
            weight: cfg.weight,
        }
    }
}

impl Predicate {
    fn values<'r>(&self, a: &'r Record, b: &'r Record) -> (Option<&'r Value>, Option<&'r Value>) {
        let fb = self.other_field.as_deref().unwrap_or(&self.field);
        (a.get(&self.field), b.get(fb))
    }

    pub fn evaluate(&self, a: &Record, b: &Record) -> PredicateOutcome {
        let (va, vb) = self.values(a, b);
        let (passed, score) = match (self.kind, va, vb) {
            (Comparison::Equality, Some(x), Some(y)) => (x == y, None),
            (Comparison::Similarity { function, threshold, direction }, Some(x), Some(y)) => {
                match similarity::score(function, x, y) {
                    Some(s) => {
                        let passed = match direction {
                            Direction::AtLeast => s >= threshold,
                            Direction::AtMost => s <= threshold,
                        };
                        (passed, Some(s))
                    }
                    None => (false, None),
                }
            }
            _ => (false, None),
        };
        PredicateOutcome { predicate: self.name.clone(), passed, score }
    }

    /// Contribution to a weighted aggregate: 1/0 for equality and distance
    /// outcomes, the clamped score for similarity-direction outcomes.
    fn contribution(&self, outcome: &PredicateOutcome) -> f64 {
        let raw = match (self.kind, outcome.score) {
            (Comparison::Similarity { direction: Direction::AtLeast, .. }, Some(s)) => s.clamp(0.0, 1.0),
            _ => if outcome.passed { 1.0 } else { 0.0 },
        };
        raw * self.weight
    }
}

/// Applies the predicate chain to candidate pairs. Never mutates records.
#[derive(Debug, Clone)]
pub struct Evaluator {
    predicates: Vec<Predicate>,
    rule: CombinationRule,
}

impl Evaluator {
    pub fn new(predicates: &[PredicateConfig], rule: CombinationRule) -> Self {
        Self { predicates: predicates.iter().map(Predicate::from).collect(), rule }
    }

    pub fn predicates(&self) -> &[Predicate] { &self.predicates }

    pub fn evaluate(&self, pair: &CandidatePair, a: &Record, b: &Record) -> MatchDecision {
        let mut outcomes = Vec::with_capacity(self.predicates.len());
        let (score, verdict) = match self.rule {
            CombinationRule::AllRequired => {
                let mut verdict = Verdict::Match;
                let mut passed = 0usize;
                for p in &self.predicates {
                    let o = p.evaluate(a, b);
                    let failed_required = p.required && !o.passed;
                    if o.passed { passed += 1; }
                    outcomes.push(o);
                    if failed_required {
                        verdict = Verdict::NonMatch;
                        break;
                    }
                }
                (passed as f64 / self.predicates.len().max(1) as f64, verdict)
            }
            CombinationRule::Weighted { threshold } => {
                let mut total = 0.0;
                for p in &self.predicates {
                    let o = p.evaluate(a, b);
                    total += p.contribution(&o);
                    outcomes.push(o);
                }
                let verdict = if total > threshold { Verdict::Match } else { Verdict::NonMatch };
                (total, verdict)
            }
        };
        MatchDecision { a: pair.a, b: pair.b, provenance: pair.provenance, outcomes, score, verdict }
    }
}
