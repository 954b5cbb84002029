//! Bounded value iteration: Bellman steps on both bounds interleaved with
//! end-component deflation of the upper bound.
//!
//! Plain value iteration from above does not converge in cyclic games: an end
//! component sustains `U = 1` forever because every member's optimum points
//! back inside. Deflation clamps each member's upper value to the best the
//! maximizer can get by actually leaving the component.

use crate::bellman::{action_value, bellman_step, BellmanConfig};
use ahash::AHashSet;
use larc_graph::{compute_mecs, AllowedActions};
use larc_model::{Bounds, Goal, GoalMap, NodeId, RewardFunction, StochasticGame, TargetReward};
use thiserror::Error;
use tracing::{debug, trace};

/// Value-iteration failure.
#[derive(Debug, Error)]
pub enum SolveError {
    /// An end component generates reward internally: the expected total
    /// reward is infinite, which is a modeling error.
    #[error("end component with nonzero internal reward (nodes {nodes:?}): expected reward diverges")]
    RewardCycle { nodes: Vec<NodeId> },
}

/// Result of a bounded value iteration run.
#[derive(Debug, Clone)]
pub struct BviResult {
    pub bounds: Bounds,
    pub iterations: usize,
}

/// Bounded value iteration with deflation.
#[derive(Debug, Clone)]
pub struct BviSolver {
    pub threshold: f64,
    /// Tolerance for "locally optimal" action selection during deflation.
    pub optimality_eps: f64,
    pub config: BellmanConfig,
}

impl BviSolver {
    pub fn new(threshold: f64) -> Self {
        BviSolver {
            threshold,
            optimality_eps: 1e-12,
            config: BellmanConfig::default(),
        }
    }

    /// Iterate `L` up and `U` down until the gap at the initial node is at
    /// most the threshold. Both bounds are updated monotonically, so the
    /// soundness invariant `L <= value <= U` holds throughout.
    pub fn solve<G, R>(
        &self,
        game: &G,
        reward: &R,
        goals: &GoalMap,
        mut bounds: Bounds,
    ) -> Result<BviResult, SolveError>
    where
        G: StochasticGame,
        R: RewardFunction,
    {
        let init = game.initial_node();
        let mut iterations = 0usize;
        loop {
            if bounds.gap(init) <= self.threshold {
                debug!(
                    iterations,
                    lower = bounds.lower[init.index()],
                    upper = bounds.upper[init.index()],
                    "BVI converged"
                );
                return Ok(BviResult { bounds, iterations });
            }
            iterations += 1;

            let step_l = bellman_step(game, reward, goals, &bounds.lower, Some(&bounds.known), &self.config);
            for (l, new) in bounds.lower.iter_mut().zip(&step_l.values) {
                *l = l.max(*new);
            }

            let step_u = bellman_step(game, reward, goals, &bounds.upper, Some(&bounds.known), &self.config);
            for (u, new) in bounds.upper.iter_mut().zip(&step_u.values) {
                *u = u.min(*new);
            }

            self.deflate(game, reward, goals, &mut bounds)?;

            if iterations % 1000 == 0 {
                debug!(
                    iterations,
                    gap = bounds.gap(init),
                    "BVI progress"
                );
            }
        }
    }

    /// One deflation pass: clamp the upper values of every end component that
    /// is closed under the minimizer's locally optimal actions down to its
    /// best exit value, floored at the component's known lower values.
    pub fn deflate<G, R>(
        &self,
        game: &G,
        reward: &R,
        goals: &GoalMap,
        bounds: &mut Bounds,
    ) -> Result<(), SolveError>
    where
        G: StochasticGame,
        R: RewardFunction,
    {
        // Minimizer nodes keep only actions within eps of their L-optimum;
        // maximizer nodes keep everything. Known nodes take no part.
        let mut allowed: AllowedActions = game
            .nodes()
            .map(|n| {
                if bounds.known[n.index()] {
                    return Vec::new();
                }
                let all: Vec<usize> = (0..game.num_actions(n)).collect();
                if goals.goal(game.player(n)) != Goal::Min || all.is_empty() {
                    return all;
                }
                let opt = all
                    .iter()
                    .map(|&a| action_value(game, reward, &bounds.lower, n, a))
                    .fold(f64::INFINITY, f64::min);
                all.into_iter()
                    .filter(|&a| {
                        action_value(game, reward, &bounds.lower, n, a) <= opt + self.optimality_eps
                    })
                    .collect()
            })
            .collect();

        let mecs = compute_mecs(game, &mut allowed);
        for mec in &mecs {
            if mec.nodes.iter().all(|n| bounds.known[n.index()]) {
                continue;
            }
            let members: AHashSet<NodeId> = mec.nodes.iter().copied().collect();

            // A reward-generating cycle means infinite expected reward.
            let internal_reward = mec.nodes.iter().any(|&n| {
                reward.state_reward(n) != 0.0
                    || allowed[n.index()].iter().any(|&a| {
                        game.result(n, a)
                            .support()
                            .any(|&m| reward.edge_reward(n, a, m) != 0.0)
                    })
            });
            if internal_reward {
                return Err(SolveError::RewardCycle { nodes: mec.nodes.clone() });
            }

            // Best value achievable by leaving the component right away.
            let mut best_exit = f64::NEG_INFINITY;
            for &n in &mec.nodes {
                if goals.goal(game.player(n)) != Goal::Max {
                    continue;
                }
                for a in 0..game.num_actions(n) {
                    let exits = game.result(n, a).support().any(|m| !members.contains(m));
                    if exits {
                        best_exit =
                            best_exit.max(action_value(game, reward, &bounds.upper, n, a));
                    }
                }
            }
            let floor = mec
                .nodes
                .iter()
                .map(|n| bounds.lower[n.index()])
                .fold(0.0f64, f64::max);
            let cap = best_exit.max(floor);
            trace!(size = mec.len(), cap, "deflating end component");

            for &n in &mec.nodes {
                let i = n.index();
                if bounds.known[i] {
                    continue;
                }
                bounds.upper[i] = bounds.upper[i].min(cap).max(bounds.lower[i]);
            }
        }
        Ok(())
    }
}

/// Almost-sure initializer for reachability bounds: `L = 1` on the nodes
/// that reach the target with probability 1, `U = 0` on the nodes that
/// cannot reach it at all; both sets are marked known.
pub fn almost_sure_bounds<G: StochasticGame>(game: &G, targets: &TargetReward) -> Bounds {
    let mut bounds = Bounds::trivial(game.num_nodes());
    let target_set: AHashSet<NodeId> = targets.targets().clone();

    for n in larc_graph::almost_sure_max(game, &target_set) {
        bounds.lower[n.index()] = 1.0;
        bounds.known[n.index()] = true;
    }
    for n in larc_graph::cannot_reach(game, &target_set) {
        bounds.upper[n.index()] = 0.0;
        bounds.known[n.index()] = true;
    }
    bounds
}
