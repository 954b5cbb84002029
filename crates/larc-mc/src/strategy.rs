//! Successor-selection strategies for trace simulation.
//!
//! After the checker picks the optimistically best edge at a node, the
//! strategy decides which outcome of that edge the trace follows next.

use crate::arg::EdgeId;
use ahash::AHashMap;
use rand::rngs::StdRng;
use rand::Rng;

/// Which weighting a [`SuccessorStrategy`] applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    /// Weight outcomes by their `U - L` gap: simulation effort goes where
    /// uncertainty is highest. The recommended default.
    #[default]
    DiffBased,
    /// Uniformly random over the support.
    Random,
    /// Weight outcomes by `probability * gap`.
    WeightedRandom,
    /// Deterministic cycling through the support, for reproducible tests.
    RoundRobin,
}

/// Strategy state: the round-robin cursor per edge.
#[derive(Debug, Default)]
pub struct SuccessorStrategy {
    kind: StrategyKind,
    cursors: AHashMap<EdgeId, usize>,
}

impl SuccessorStrategy {
    pub fn new(kind: StrategyKind) -> Self {
        SuccessorStrategy { kind, cursors: AHashMap::new() }
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    /// Pick the index of the outcome to extend the trace into.
    ///
    /// `outcomes` holds `(probability, gap)` per support element of the
    /// chosen edge. When every weight is zero the choice degenerates to
    /// uniform instead of dividing by zero.
    pub fn pick(&mut self, edge: EdgeId, outcomes: &[(f64, f64)], rng: &mut StdRng) -> usize {
        debug_assert!(!outcomes.is_empty());
        match self.kind {
            StrategyKind::RoundRobin => {
                let cursor = self.cursors.entry(edge).or_insert(0);
                let choice = *cursor % outcomes.len();
                *cursor += 1;
                choice
            }
            StrategyKind::Random => rng.gen_range(0..outcomes.len()),
            StrategyKind::DiffBased => {
                Self::weighted(outcomes.iter().map(|&(_, gap)| gap), outcomes.len(), rng)
            }
            StrategyKind::WeightedRandom => Self::weighted(
                outcomes.iter().map(|&(p, gap)| p * gap),
                outcomes.len(),
                rng,
            ),
        }
    }

    fn weighted(weights: impl Iterator<Item = f64> + Clone, len: usize, rng: &mut StdRng) -> usize {
        let total: f64 = weights.clone().sum();
        if total <= 0.0 {
            // all gaps zero: uniform fallback
            return rng.gen_range(0..len);
        }
        let mut u = rng.gen::<f64>() * total;
        let mut last = 0;
        for (i, w) in weights.enumerate() {
            u -= w;
            last = i;
            if u < 0.0 {
                return i;
            }
        }
        last
    }
}
