//! Qualitative reachability: the probability-1 and probability-0 node sets.

use ahash::AHashSet;
use larc_model::{NodeId, StochasticGame};
use tracing::trace;

/// Nodes from which a maximizing controller reaches `targets` with
/// probability 1.
///
/// Classic two-level fixed point: shrink the candidate set `U` to the nodes
/// that can reach a target using only actions whose support stays inside `U`,
/// until `U` is stable.
pub fn almost_sure_max<G: StochasticGame>(
    game: &G,
    targets: &AHashSet<NodeId>,
) -> AHashSet<NodeId> {
    let mut u: AHashSet<NodeId> = game.nodes().collect();

    loop {
        // r = nodes that may reach a target through actions confined to u
        let mut r: AHashSet<NodeId> = targets.iter().copied().filter(|t| u.contains(t)).collect();
        loop {
            let mut grew = false;
            for n in game.nodes() {
                if r.contains(&n) || !u.contains(&n) {
                    continue;
                }
                let ok = (0..game.num_actions(n)).any(|a| {
                    let dist = game.result(n, a);
                    dist.support().all(|m| u.contains(m))
                        && dist.support().any(|m| r.contains(m))
                });
                if ok {
                    r.insert(n);
                    grew = true;
                }
            }
            if !grew {
                break;
            }
        }

        if r.len() == u.len() {
            trace!(size = u.len(), "almost-sure set converged");
            return u;
        }
        u = r;
    }
}

/// Nodes that cannot reach `targets` at all (value 0 under any resolution of
/// nondeterminism): the complement of backward reachability over supports.
pub fn cannot_reach<G: StochasticGame>(game: &G, targets: &AHashSet<NodeId>) -> AHashSet<NodeId> {
    let mut can: AHashSet<NodeId> = targets.clone();
    loop {
        let mut grew = false;
        for n in game.nodes() {
            if can.contains(&n) {
                continue;
            }
            let reaches = (0..game.num_actions(n))
                .any(|a| game.result(n, a).support().any(|m| can.contains(m)));
            if reaches {
                can.insert(n);
                grew = true;
            }
        }
        if !grew {
            break;
        }
    }
    game.nodes().filter(|n| !can.contains(n)).collect()
}
