//! Reward functions and lower/upper bound containers for value iteration.

use crate::game::NodeId;
use ahash::AHashSet;

/// Rewards driving a Bellman update.
pub trait RewardFunction {
    fn state_reward(&self, node: NodeId) -> f64;

    fn edge_reward(&self, source: NodeId, action: usize, target: NodeId) -> f64;
}

/// Reachability as reward: 1 on target nodes, 0 elsewhere, no edge rewards.
/// Target nodes are expected to be absorbing.
#[derive(Debug, Clone, Default)]
pub struct TargetReward {
    targets: AHashSet<NodeId>,
}

impl TargetReward {
    pub fn new(targets: impl IntoIterator<Item = NodeId>) -> Self {
        TargetReward { targets: targets.into_iter().collect() }
    }

    pub fn is_target(&self, node: NodeId) -> bool {
        self.targets.contains(&node)
    }

    pub fn targets(&self) -> &AHashSet<NodeId> {
        &self.targets
    }
}

impl RewardFunction for TargetReward {
    fn state_reward(&self, node: NodeId) -> f64 {
        if self.targets.contains(&node) {
            1.0
        } else {
            0.0
        }
    }

    fn edge_reward(&self, _source: NodeId, _action: usize, _target: NodeId) -> f64 {
        0.0
    }
}

/// Dense lower/upper value approximations, plus the set of nodes whose value
/// is already known exactly (left untouched by Bellman updates).
#[derive(Debug, Clone)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub known: Vec<bool>,
}

impl Bounds {
    /// The trivial `[0, 1]` bounds with nothing known.
    pub fn trivial(num_nodes: usize) -> Self {
        Bounds {
            lower: vec![0.0; num_nodes],
            upper: vec![1.0; num_nodes],
            known: vec![false; num_nodes],
        }
    }

    /// Target-set initializer: `L = 1` on targets (known), `U = 1` everywhere.
    pub fn from_targets(num_nodes: usize, targets: &TargetReward) -> Self {
        let mut bounds = Self::trivial(num_nodes);
        for i in 0..num_nodes {
            if targets.is_target(NodeId::from_index(i)) {
                bounds.lower[i] = 1.0;
                bounds.known[i] = true;
            }
        }
        bounds
    }

    pub fn gap(&self, node: NodeId) -> f64 {
        self.upper[node.index()] - self.lower[node.index()]
    }

    /// Check the soundness invariant `0 <= L <= U <= 1` on every node.
    pub fn is_sound(&self) -> bool {
        self.lower
            .iter()
            .zip(&self.upper)
            .all(|(&l, &u)| 0.0 <= l && l <= u && u <= 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_reward() {
        let r = TargetReward::new([NodeId(2)]);
        assert_eq!(r.state_reward(NodeId(2)), 1.0);
        assert_eq!(r.state_reward(NodeId(0)), 0.0);
        assert_eq!(r.edge_reward(NodeId(0), 0, NodeId(2)), 0.0);
    }

    #[test]
    fn test_bounds_init() {
        let targets = TargetReward::new([NodeId(1)]);
        let b = Bounds::from_targets(3, &targets);
        assert_eq!(b.lower, vec![0.0, 1.0, 0.0]);
        assert_eq!(b.upper, vec![1.0; 3]);
        assert!(b.known[1] && !b.known[0]);
        assert!(b.is_sound());
        assert_eq!(b.gap(NodeId(0)), 1.0);
        assert_eq!(b.gap(NodeId(1)), 0.0);
    }
}
