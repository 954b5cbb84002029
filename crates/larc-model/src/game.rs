//! Stochastic game views: the trait consumed by the graph and value-iteration
//! layers, plus an explicit adjacency-list implementation.

use crate::dist::Distribution;
use std::fmt;

/// Index of a node in a game. Ids are dense: `0..num_nodes()`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn from_index(i: usize) -> Self {
        NodeId(i as u32)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Player owning a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Player(pub u32);

/// Optimization direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Goal {
    Max,
    Min,
}

impl Goal {
    /// The optimum of two candidate values under this goal.
    #[inline]
    pub fn better(self, a: f64, b: f64) -> f64 {
        match self {
            Goal::Max => a.max(b),
            Goal::Min => a.min(b),
        }
    }

    /// The neutral element: the worst possible candidate.
    #[inline]
    pub fn worst(self) -> f64 {
        match self {
            Goal::Max => f64::NEG_INFINITY,
            Goal::Min => f64::INFINITY,
        }
    }

    /// True iff `a` improves on `b` under this goal.
    #[inline]
    pub fn improves(self, a: f64, b: f64) -> bool {
        match self {
            Goal::Max => a > b,
            Goal::Min => a < b,
        }
    }

    pub fn opposite(self) -> Goal {
        match self {
            Goal::Max => Goal::Min,
            Goal::Min => Goal::Max,
        }
    }
}

/// Per-player optimization goals.
#[derive(Debug, Clone)]
pub struct GoalMap {
    goals: Vec<Goal>,
}

impl GoalMap {
    pub fn new(goals: Vec<Goal>) -> Self {
        GoalMap { goals }
    }

    /// Single-player (MDP) goal map.
    pub fn mdp(goal: Goal) -> Self {
        GoalMap { goals: vec![goal] }
    }

    /// Two-player map: player 0 gets `first`, player 1 its opposite.
    pub fn zero_sum(first: Goal) -> Self {
        GoalMap { goals: vec![first, first.opposite()] }
    }

    #[inline]
    pub fn goal(&self, player: Player) -> Goal {
        self.goals[player.0 as usize]
    }
}

/// A stochastic game over dense node ids. Actions at a node are identified by
/// their local index `0..num_actions(node)`.
pub trait StochasticGame {
    fn initial_node(&self) -> NodeId;

    fn num_nodes(&self) -> usize;

    fn player(&self, node: NodeId) -> Player;

    fn num_actions(&self, node: NodeId) -> usize;

    /// Outcome distribution of the action with local index `action`.
    fn result(&self, node: NodeId, action: usize) -> &Distribution<NodeId>;

    fn nodes(&self) -> NodeIter {
        NodeIter { next: 0, end: self.num_nodes() as u32 }
    }
}

/// Iterator over the dense node ids of a game.
pub struct NodeIter {
    next: u32,
    end: u32,
}

impl Iterator for NodeIter {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.next < self.end {
            let id = NodeId(self.next);
            self.next += 1;
            Some(id)
        } else {
            None
        }
    }
}

/// Adjacency-list game used by tests and the fully-expanded mode.
#[derive(Debug, Clone)]
pub struct ExplicitGame {
    initial: NodeId,
    players: Vec<Player>,
    actions: Vec<Vec<Distribution<NodeId>>>,
}

impl StochasticGame for ExplicitGame {
    fn initial_node(&self) -> NodeId {
        self.initial
    }

    fn num_nodes(&self) -> usize {
        self.players.len()
    }

    fn player(&self, node: NodeId) -> Player {
        self.players[node.index()]
    }

    fn num_actions(&self, node: NodeId) -> usize {
        self.actions[node.index()].len()
    }

    fn result(&self, node: NodeId, action: usize) -> &Distribution<NodeId> {
        &self.actions[node.index()][action]
    }
}

/// Builder for [`ExplicitGame`].
#[derive(Debug, Default)]
pub struct ExplicitGameBuilder {
    players: Vec<Player>,
    actions: Vec<Vec<Distribution<NodeId>>>,
    initial: Option<NodeId>,
}

impl ExplicitGameBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, player: Player) -> NodeId {
        let id = NodeId::from_index(self.players.len());
        self.players.push(player);
        self.actions.push(Vec::new());
        id
    }

    /// Add `count` nodes owned by player 0, returning their ids.
    pub fn add_nodes(&mut self, count: usize) -> Vec<NodeId> {
        (0..count).map(|_| self.add_node(Player(0))).collect()
    }

    pub fn add_action(&mut self, node: NodeId, result: Distribution<NodeId>) -> usize {
        let actions = &mut self.actions[node.index()];
        actions.push(result);
        actions.len() - 1
    }

    /// Convenience: a deterministic action.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId) -> usize {
        self.add_action(from, Distribution::dirac(to))
    }

    pub fn set_initial(&mut self, node: NodeId) {
        self.initial = Some(node);
    }

    pub fn build(self) -> ExplicitGame {
        ExplicitGame {
            initial: self.initial.unwrap_or(NodeId(0)),
            players: self.players,
            actions: self.actions,
        }
    }
}
