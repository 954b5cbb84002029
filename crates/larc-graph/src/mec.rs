//! Maximal end component computation.
//!
//! An end component is a set of nodes in which every node can reach every
//! other using only actions whose entire outcome support stays inside the
//! set. Computation is the standard iterative fixed point: decompose into
//! SCCs, drop every action whose support leaves its node's SCC, repeat until
//! no action is dropped.

use crate::scc::compute_sccs;
use ahash::AHashMap;
use larc_model::{NodeId, StochasticGame};
use tracing::trace;

/// Allowed local action indices per node, dense by node id.
pub type AllowedActions = Vec<Vec<usize>>;

/// A maximal end component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mec {
    pub nodes: Vec<NodeId>,
}

impl Mec {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(&node)
    }
}

/// Every action of every node allowed.
pub fn all_allowed<G: StochasticGame>(game: &G) -> AllowedActions {
    game.nodes()
        .map(|n| (0..game.num_actions(n)).collect())
        .collect()
}

/// Compute the MECs of the whole game. `allowed` is narrowed in place to the
/// actions that stay inside their component.
pub fn compute_mecs<G: StochasticGame>(game: &G, allowed: &mut AllowedActions) -> Vec<Mec> {
    let candidate: Vec<usize> = (0..game.num_nodes()).collect();
    mec_fixpoint(game, allowed, candidate)
}

/// Compute the MECs of the subgraph reachable from `root` under `allowed`.
///
/// After a new cover is established, at most one new end component can have
/// appeared, and it must be reachable from the covered node; restricting the
/// fixed point to that subgraph keeps incremental recomputation cheap.
pub fn compute_mecs_from<G: StochasticGame>(
    game: &G,
    allowed: &mut AllowedActions,
    root: NodeId,
) -> Vec<Mec> {
    // Forward closure over allowed action supports.
    let mut seen = vec![false; game.num_nodes()];
    let mut stack = vec![root.index()];
    seen[root.index()] = true;
    let mut candidate = Vec::new();
    while let Some(v) = stack.pop() {
        candidate.push(v);
        for &a in &allowed[v] {
            for m in game.result(NodeId::from_index(v), a).support() {
                if !seen[m.index()] {
                    seen[m.index()] = true;
                    stack.push(m.index());
                }
            }
        }
    }
    mec_fixpoint(game, allowed, candidate)
}

fn mec_fixpoint<G: StochasticGame>(
    game: &G,
    allowed: &mut AllowedActions,
    candidate: Vec<usize>,
) -> Vec<Mec> {
    // Compact candidate ids so the SCC pass works on a dense graph.
    let mut compact: AHashMap<usize, usize> = AHashMap::with_capacity(candidate.len());
    for (i, &v) in candidate.iter().enumerate() {
        compact.insert(v, i);
    }

    let mut rounds = 0usize;
    let final_sccs = loop {
        rounds += 1;
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); candidate.len()];
        for (i, &v) in candidate.iter().enumerate() {
            for &a in &allowed[v] {
                for m in game.result(NodeId::from_index(v), a).support() {
                    if let Some(&j) = compact.get(&m.index()) {
                        if !adj[i].contains(&j) {
                            adj[i].push(j);
                        }
                    }
                }
            }
        }

        let sccs = compute_sccs(&adj);
        let mut comp = vec![usize::MAX; candidate.len()];
        for (c, scc) in sccs.iter().enumerate() {
            for &i in scc {
                comp[i] = c;
            }
        }

        // Drop every action whose support leaves its node's SCC. Targets
        // outside the candidate set count as leaving.
        let mut removed = 0usize;
        for (i, &v) in candidate.iter().enumerate() {
            allowed[v].retain(|&a| {
                let stays = game.result(NodeId::from_index(v), a).support().all(|m| {
                    compact.get(&m.index()).is_some_and(|&j| comp[j] == comp[i])
                });
                if !stays {
                    removed += 1;
                }
                stays
            });
        }

        if removed == 0 {
            break sccs;
        }
    };
    trace!(rounds, candidates = candidate.len(), "MEC fixpoint converged");

    let mut mecs = Vec::new();
    for scc in final_sccs {
        let is_mec = if scc.len() > 1 {
            true
        } else {
            let v = candidate[scc[0]];
            let node = NodeId::from_index(v);
            // A singleton is an end component only with a retained self-loop,
            // or if the node is absorbing in the underlying game.
            game.num_actions(node) == 0
                || allowed[v]
                    .iter()
                    .any(|&a| game.result(node, a).support().all(|m| m.index() == v))
        };
        if is_mec {
            mecs.push(Mec {
                nodes: scc.iter().map(|&i| NodeId::from_index(candidate[i])).collect(),
            });
        }
    }
    mecs
}
