//! One synchronous or Gauss-Seidel Bellman update.

use larc_model::{GoalMap, NodeId, RewardFunction, StochasticGame};

/// Parameters of a Bellman step.
#[derive(Debug, Clone)]
pub struct BellmanConfig {
    /// Read already-updated values within the same sweep.
    pub gauss_seidel: bool,
    /// Discount factor applied to the selected action value.
    pub discount: f64,
}

impl Default for BellmanConfig {
    fn default() -> Self {
        BellmanConfig { gauss_seidel: false, discount: 1.0 }
    }
}

/// Result of one Bellman step.
#[derive(Debug, Clone)]
pub struct BellmanResult {
    pub values: Vec<f64>,
    /// Maximum absolute change across updated nodes: the termination signal.
    pub max_change: f64,
    /// Argmax/argmin action per updated node; `None` for untouched or
    /// action-less nodes.
    pub strategy: Vec<Option<usize>>,
}

/// Perform one Bellman update of `values`.
///
/// Nodes marked in `known` (if given) are left untouched. A node with no
/// actions takes its state reward as value: it must represent an absorbing
/// condition with the reward baked in.
pub fn bellman_step<G, R>(
    game: &G,
    reward: &R,
    goals: &GoalMap,
    values: &[f64],
    known: Option<&[bool]>,
    config: &BellmanConfig,
) -> BellmanResult
where
    G: StochasticGame,
    R: RewardFunction,
{
    let mut new_values = values.to_vec();
    let mut strategy = vec![None; values.len()];
    let mut max_change = 0.0f64;

    for node in game.nodes() {
        let i = node.index();
        if known.is_some_and(|k| k[i]) {
            continue;
        }

        let num_actions = game.num_actions(node);
        if num_actions == 0 {
            let v = reward.state_reward(node);
            max_change = max_change.max((v - values[i]).abs());
            new_values[i] = v;
            continue;
        }

        let source = if config.gauss_seidel { &new_values } else { values };
        let goal = goals.goal(game.player(node));
        let mut best = goal.worst();
        let mut best_action = 0;
        for a in 0..num_actions {
            let v = game.result(node, a).expected_value(|&m| {
                reward.edge_reward(node, a, m) + source[m.index()]
            });
            if goal.improves(v, best) || a == 0 {
                best = v;
                best_action = a;
            }
        }

        let v = reward.state_reward(node) + config.discount * best;
        max_change = max_change.max((v - values[i]).abs());
        new_values[i] = v;
        strategy[i] = Some(best_action);
    }

    BellmanResult { values: new_values, max_change, strategy }
}

/// Expected value of an action under a value map.
pub fn action_value<G, R>(game: &G, reward: &R, values: &[f64], node: NodeId, action: usize) -> f64
where
    G: StochasticGame,
    R: RewardFunction,
{
    game.result(node, action)
        .expected_value(|&m| reward.edge_reward(node, action, m) + values[m.index()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use larc_model::{
        Distribution, ExplicitGameBuilder, Goal, Player, TargetReward,
    };

    /// s0 --{t: 0.3, s1: 0.7}--> ..., s1 --t--> , t absorbing target.
    #[test]
    fn test_single_step_propagates_one_level() {
        let mut b = ExplicitGameBuilder::new();
        let n = b.add_nodes(3); // s0 s1 t
        b.add_action(n[0], Distribution::new([(n[2], 0.3), (n[1], 0.7)]).unwrap());
        b.add_edge(n[1], n[2]);
        let game = b.build();
        let reward = TargetReward::new([n[2]]);

        let values = vec![0.0, 0.0, 1.0];
        let known = vec![false, false, true];
        let r = bellman_step(
            &game,
            &reward,
            &GoalMap::mdp(Goal::Max),
            &values,
            Some(&known),
            &BellmanConfig::default(),
        );
        assert!((r.values[0] - 0.3).abs() < 1e-12);
        assert!((r.values[1] - 1.0).abs() < 1e-12);
        assert_eq!(r.values[2], 1.0); // known, untouched
        assert!((r.max_change - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_gauss_seidel_reads_fresh_values() {
        // chain s0 -> s1 -> t; in node order a Gauss-Seidel sweep propagates
        // the target value two levels in one step.
        let mut b = ExplicitGameBuilder::new();
        let n = b.add_nodes(3);
        b.add_edge(n[1], n[0]);
        b.add_edge(n[0], n[2]);
        let game = b.build();
        let reward = TargetReward::new([n[2]]);
        let values = vec![0.0, 0.0, 1.0];
        let known = vec![false, false, true];

        let sync = bellman_step(
            &game,
            &reward,
            &GoalMap::mdp(Goal::Max),
            &values,
            Some(&known),
            &BellmanConfig::default(),
        );
        assert_eq!(sync.values[1], 0.0);

        let gs = bellman_step(
            &game,
            &reward,
            &GoalMap::mdp(Goal::Max),
            &values,
            Some(&known),
            &BellmanConfig { gauss_seidel: true, discount: 1.0 },
        );
        assert_eq!(gs.values[0], 1.0);
        assert_eq!(gs.values[1], 1.0);
    }

    #[test]
    fn test_min_player_picks_worse_action() {
        let mut b = ExplicitGameBuilder::new();
        let s = b.add_node(Player(0));
        let t = b.add_node(Player(0));
        let sink = b.add_node(Player(0));
        b.add_edge(s, t);
        b.add_edge(s, sink);
        let game = b.build();
        let reward = TargetReward::new([t]);
        let values = vec![0.0, 1.0, 0.0];
        let known = vec![false, true, true];

        let r = bellman_step(
            &game,
            &reward,
            &GoalMap::mdp(Goal::Min),
            &values,
            Some(&known),
            &BellmanConfig::default(),
        );
        assert_eq!(r.values[s.index()], 0.0);
        assert_eq!(r.strategy[s.index()], Some(1));
    }

    #[test]
    fn test_absorbing_node_takes_state_reward() {
        let mut b = ExplicitGameBuilder::new();
        let t = b.add_node(Player(0));
        let game = b.build();
        let reward = TargetReward::new([t]);
        let r = bellman_step(
            &game,
            &reward,
            &GoalMap::mdp(Goal::Max),
            &[0.0],
            None,
            &BellmanConfig::default(),
        );
        assert_eq!(r.values[0], 1.0);
        assert_eq!(r.strategy[0], None);
    }
}
