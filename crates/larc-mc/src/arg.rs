//! The abstract reachability graph: an arena of nodes addressed by stable
//! ids, with edges, back-edges, and the covering relation stored as
//! index-based maps. Nodes are never physically removed; covering and error
//! marking retire them logically.

use ahash::{AHashMap, AHashSet};
use larc_model::{Action, Distribution, Expr, NodeId, Player, StochasticGame, Valuation};
use smallvec::SmallVec;
use std::fmt;

/// Index of an edge in the ARG.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(pub u32);

impl EdgeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// An ARG vertex: a concrete state paired with an abstract label.
#[derive(Debug, Clone)]
pub struct ArgNode<L> {
    pub concrete: Valuation,
    pub label: L,
    pub expanded: bool,
    pub error: bool,
    /// The node covering this one, if any. At most one outgoing cover.
    pub covering: Option<NodeId>,
    /// Nodes this one covers.
    pub covered: AHashSet<NodeId>,
    pub out_edges: SmallVec<[EdgeId; 2]>,
    pub in_edges: SmallVec<[EdgeId; 2]>,
}

/// An ARG edge: one enabled command at the source node, with its outcome
/// distribution over target nodes. The target distribution is immutable once
/// created; end-component merging is tracked out-of-band.
#[derive(Debug, Clone)]
pub struct ArgEdge {
    pub source: NodeId,
    pub command_id: usize,
    pub guard: Expr,
    /// Provably enabled on every state of the source label (as opposed to
    /// merely possibly enabled). Only the game-refinement variant reads this.
    pub surely_enabled: bool,
    /// Raw outcomes: probability, the command action, the target node.
    pub outcomes: Vec<(f64, Action, NodeId)>,
    /// The outcome distribution over targets (duplicate targets merged).
    pub result: Distribution<NodeId>,
}

/// The abstract reachability graph.
#[derive(Debug, Clone)]
pub struct Arg<L> {
    nodes: Vec<ArgNode<L>>,
    edges: Vec<ArgEdge>,
    /// Nodes by concrete state, for identical-state covering.
    by_concrete: AHashMap<Valuation, SmallVec<[NodeId; 1]>>,
}

impl<L> Arg<L> {
    pub fn new() -> Self {
        Arg {
            nodes: Vec::new(),
            edges: Vec::new(),
            by_concrete: AHashMap::new(),
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn node(&self, id: NodeId) -> &ArgNode<L> {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut ArgNode<L> {
        &mut self.nodes[id.index()]
    }

    pub fn edge(&self, id: EdgeId) -> &ArgEdge {
        &self.edges[id.index()]
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> &mut ArgEdge {
        &mut self.edges[id.index()]
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId::from_index)
    }

    pub fn add_node(&mut self, concrete: Valuation, label: L) -> NodeId {
        let id = NodeId::from_index(self.nodes.len());
        self.by_concrete.entry(concrete.clone()).or_default().push(id);
        self.nodes.push(ArgNode {
            concrete,
            label,
            expanded: false,
            error: false,
            covering: None,
            covered: AHashSet::new(),
            out_edges: SmallVec::new(),
            in_edges: SmallVec::new(),
        });
        id
    }

    pub fn add_edge(
        &mut self,
        source: NodeId,
        command_id: usize,
        guard: Expr,
        surely_enabled: bool,
        outcomes: Vec<(f64, Action, NodeId)>,
    ) -> EdgeId {
        let result = Distribution::new(outcomes.iter().map(|(p, _, n)| (*n, *p)))
            .expect("command outcome distribution is valid");
        let id = EdgeId(self.edges.len() as u32);
        for (_, _, target) in &outcomes {
            self.nodes[target.index()].in_edges.push(id);
        }
        self.nodes[source.index()].out_edges.push(id);
        self.edges.push(ArgEdge { source, command_id, guard, surely_enabled, outcomes, result });
        id
    }

    /// Another node (lowest id) with the same concrete state whose cover
    /// chain does not pass back through `id`, so covering by it cannot close
    /// a cover cycle. Sibling outcomes of one command can share a concrete
    /// state; without the chain check each would pick the other.
    pub fn find_same_concrete(&self, id: NodeId) -> Option<NodeId> {
        self.by_concrete
            .get(&self.nodes[id.index()].concrete)?
            .iter()
            .copied()
            .find(|&other| other != id && !self.cover_chain_contains(other, id))
    }

    /// True iff following cover links from `from` (inclusive) reaches `node`.
    pub fn cover_chain_contains(&self, mut from: NodeId, node: NodeId) -> bool {
        loop {
            if from == node {
                return true;
            }
            match self.nodes[from.index()].covering {
                Some(next) => from = next,
                None => return false,
            }
        }
    }

    /// Establish `coverer` covers `covered`.
    pub fn set_cover(&mut self, covered: NodeId, coverer: NodeId) {
        debug_assert_ne!(covered, coverer);
        debug_assert!(self.nodes[covered.index()].covering.is_none());
        self.nodes[covered.index()].covering = Some(coverer);
        self.nodes[coverer.index()].covered.insert(covered);
    }

    /// Remove the cover of `covered`, if any.
    pub fn remove_cover(&mut self, covered: NodeId) {
        if let Some(coverer) = self.nodes[covered.index()].covering.take() {
            self.nodes[coverer.index()].covered.remove(&covered);
        }
    }

    /// Follow the covering chain to its uncovered representative.
    pub fn resolve(&self, mut id: NodeId) -> NodeId {
        while let Some(coverer) = self.nodes[id.index()].covering {
            id = coverer;
        }
        id
    }

    /// Snapshot the currently known graph as a finite game: covered nodes
    /// get a single deterministic move to their coverer, error and
    /// unexpanded nodes are absorbing, everything else plays its edges.
    pub fn game_view(&self, initial: NodeId) -> ArgGame {
        let mut actions = Vec::with_capacity(self.nodes.len());
        let mut edge_ids = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let mut node_actions: Vec<Distribution<NodeId>> = Vec::new();
            let mut node_edges: Vec<Option<EdgeId>> = Vec::new();
            if let Some(coverer) = node.covering {
                node_actions.push(Distribution::dirac(coverer));
                node_edges.push(None);
            } else if !node.error {
                for &e in &node.out_edges {
                    node_actions.push(self.edges[e.index()].result.clone());
                    node_edges.push(Some(e));
                }
            }
            actions.push(node_actions);
            edge_ids.push(node_edges);
        }
        ArgGame { initial, actions, edge_ids }
    }
}

impl<L> Default for Arg<L> {
    fn default() -> Self {
        Self::new()
    }
}

/// A materialized finite-game snapshot of the ARG.
#[derive(Debug, Clone)]
pub struct ArgGame {
    initial: NodeId,
    actions: Vec<Vec<Distribution<NodeId>>>,
    edge_ids: Vec<Vec<Option<EdgeId>>>,
}

impl ArgGame {
    /// The ARG edge behind a local action, `None` for synthetic cover moves.
    pub fn edge_id(&self, node: NodeId, action: usize) -> Option<EdgeId> {
        self.edge_ids[node.index()][action]
    }
}

impl StochasticGame for ArgGame {
    fn initial_node(&self) -> NodeId {
        self.initial
    }

    fn num_nodes(&self) -> usize {
        self.actions.len()
    }

    fn player(&self, _node: NodeId) -> Player {
        Player(0)
    }

    fn num_actions(&self, node: NodeId) -> usize {
        self.actions[node.index()].len()
    }

    fn result(&self, node: NodeId, action: usize) -> &Distribution<NodeId> {
        &self.actions[node.index()][action]
    }
}
