//! One-shot solvers for finite games, used by the fully-expanded mode.

use crate::bellman::{bellman_step, BellmanConfig};
use crate::bvi::{almost_sure_bounds, BviResult, BviSolver, SolveError};
use larc_model::{Goal, GoalMap, RewardFunction, StochasticGame, TargetReward};
use tracing::debug;

/// Plain value iteration to a change threshold.
///
/// Sound on its own only where the fixed point is unique (discounted games,
/// or iteration from below for reachability); reachability upper bounds need
/// [`MdpBviSolver`].
#[derive(Debug, Clone)]
pub struct ViSolver {
    pub threshold: f64,
    pub config: BellmanConfig,
}

impl ViSolver {
    pub fn new(threshold: f64) -> Self {
        ViSolver { threshold, config: BellmanConfig::default() }
    }

    /// Iterate from `initial_values` until the largest per-node change drops
    /// to the threshold. Returns the final values.
    pub fn solve<G, R>(
        &self,
        game: &G,
        reward: &R,
        goals: &GoalMap,
        initial_values: Vec<f64>,
        known: Option<&[bool]>,
    ) -> Vec<f64>
    where
        G: StochasticGame,
        R: RewardFunction,
    {
        let mut values = initial_values;
        let mut iterations = 0usize;
        loop {
            iterations += 1;
            let step = bellman_step(game, reward, goals, &values, known, &self.config);
            values = step.values;
            if step.max_change <= self.threshold {
                debug!(iterations, "value iteration converged");
                return values;
            }
        }
    }
}

/// Reachability solver for a finite MDP/SG: qualitative precomputation, then
/// bounded value iteration with deflation.
#[derive(Debug, Clone)]
pub struct MdpBviSolver {
    pub inner: BviSolver,
}

impl MdpBviSolver {
    pub fn new(threshold: f64) -> Self {
        MdpBviSolver { inner: BviSolver::new(threshold) }
    }

    /// Solve optimal reachability of `targets` under `goal` and return the
    /// converged bounds.
    pub fn solve<G: StochasticGame>(
        &self,
        game: &G,
        targets: &TargetReward,
        goal: Goal,
    ) -> Result<BviResult, SolveError> {
        let bounds = match goal {
            // The almost-sure sets are valid bounds only for the maximizer.
            Goal::Max => almost_sure_bounds(game, targets),
            Goal::Min => larc_model::Bounds::from_targets(game.num_nodes(), targets),
        };
        self.inner.solve(game, targets, &GoalMap::mdp(goal), bounds)
    }

    /// The value at the initial node, taken as the bound midpoint.
    pub fn value<G: StochasticGame>(
        &self,
        game: &G,
        targets: &TargetReward,
        goal: Goal,
    ) -> Result<f64, SolveError> {
        let result = self.solve(game, targets, goal)?;
        let init = game.initial_node().index();
        Ok((result.bounds.lower[init] + result.bounds.upper[init]) / 2.0)
    }
}
