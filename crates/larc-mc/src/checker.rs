//! The probabilistic lazy checker: lazy ARG construction with covering,
//! incremental end-component detection, and BRTDP-style bound tightening.

use crate::arg::{Arg, EdgeId};
use crate::domain::{DomainError, LazyDomain, PathStep};
use crate::strategy::SuccessorStrategy;
use ahash::AHashSet;
use larc_graph::{all_allowed, compute_mecs_from};
use larc_model::{
    CommandProvider, EvalError, Expr, Goal, NodeId, TargetReward, Valuation,
};
use larc_vi::{MdpBviSolver, SolveError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Checking error.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error("solver error: {0}")]
    Solve(#[from] SolveError),

    #[error("unsupported configuration: {0}")]
    UnsupportedConfig(String),
}

pub type CheckResult<T> = Result<T, CheckError>;

/// Checker configuration.
#[derive(Debug, Clone)]
pub struct CheckConfig {
    /// Convergence threshold on `U - L` at the root.
    pub threshold: f64,
    pub goal: Goal,
    pub strategy: crate::strategy::StrategyKind,
    pub seed: u64,
    /// Make per-node bound monotonicity a hard invariant: `U` never
    /// increases and `L` never decreases across updates.
    pub monotone_bellman: bool,
    /// Reset an uncovered node's bounds to `[0, 1]` instead of keeping them.
    pub reset_on_uncover: bool,
    /// Use may-enabledness to sharpen spurious abstract guards.
    pub use_may: bool,
    /// Use must-enabledness when tagging surely enabled edges.
    pub use_must: bool,
    /// Promote one edge to surely-enabled every this many iterations in the
    /// game-refinement variant.
    pub refine_every: usize,
    /// Hard iteration cap; `None` runs until convergence (possibly forever).
    pub max_iterations: Option<usize>,
}

impl Default for CheckConfig {
    fn default() -> Self {
        CheckConfig {
            threshold: 1e-6,
            goal: Goal::Max,
            strategy: crate::strategy::StrategyKind::DiffBased,
            seed: 0,
            monotone_bellman: false,
            reset_on_uncover: true,
            use_may: true,
            use_must: false,
            refine_every: 16,
            max_iterations: None,
        }
    }
}

/// Result of a checking run.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub lower: f64,
    pub upper: f64,
    pub converged: bool,
    pub iterations: usize,
    pub nodes: usize,
    pub covers: usize,
}

impl CheckOutcome {
    /// The checker's estimate: the bound midpoint.
    pub fn value(&self) -> f64 {
        (self.lower + self.upper) / 2.0
    }
}

/// Nodes merged for value propagation: a detected end component and the
/// edges leaving it. Dissolved (not mutated) when a member is uncovered.
#[derive(Debug, Clone)]
struct MergeGroup {
    nodes: Vec<NodeId>,
    exit_edges: Vec<EdgeId>,
    alive: bool,
}

/// The lazy abstraction-refinement checker.
pub struct LazyChecker<D: LazyDomain, S, E> {
    domain: D,
    standard: S,
    errors: E,
    config: CheckConfig,
    arg: Arg<D::Label>,
    root: NodeId,
    lower: Vec<f64>,
    upper: Vec<f64>,
    /// Lower bounds of the trapped sub-game (surely-enabled edges only);
    /// read by the game-refinement variant.
    lower_trapped: Vec<f64>,
    group_of: Vec<Option<usize>>,
    groups: Vec<MergeGroup>,
    /// Cover events since the last end-component recomputation.
    new_covers: Vec<NodeId>,
    strategy: SuccessorStrategy,
    rng: StdRng,
    iterations: usize,
    covers: usize,
}

impl<D, S, E> LazyChecker<D, S, E>
where
    D: LazyDomain,
    S: CommandProvider,
    E: CommandProvider,
{
    pub fn new(
        domain: D,
        standard: S,
        errors: E,
        initial: Valuation,
        initial_label: D::Label,
        config: CheckConfig,
    ) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        let strategy = SuccessorStrategy::new(config.strategy);
        let mut checker = LazyChecker {
            domain,
            standard,
            errors,
            config,
            arg: Arg::new(),
            root: NodeId(0),
            lower: Vec::new(),
            upper: Vec::new(),
            lower_trapped: Vec::new(),
            group_of: Vec::new(),
            groups: Vec::new(),
            new_covers: Vec::new(),
            strategy,
            rng,
            iterations: 0,
            covers: 0,
        };
        checker.root = checker.make_node(initial, initial_label);
        checker
    }

    /// The ARG built so far, for visualization and debugging.
    pub fn arg(&self) -> &Arg<D::Label> {
        &self.arg
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn bounds(&self, node: NodeId) -> (f64, f64) {
        (self.lower[node.index()], self.upper[node.index()])
    }

    /// The soundness invariant `0 <= L <= U <= 1` over every node.
    pub fn bounds_sound(&self) -> bool {
        self.lower
            .iter()
            .zip(&self.upper)
            .all(|(&l, &u)| 0.0 <= l && l <= u && u <= 1.0)
    }

    fn root_bounds(&self) -> (f64, f64) {
        let r = self.arg.resolve(self.root);
        (self.lower[r.index()], self.upper[r.index()])
    }

    fn root_gap(&self) -> f64 {
        let (l, u) = self.root_bounds();
        u - l
    }

    fn outcome(&self, converged: bool) -> CheckOutcome {
        let (lower, upper) = self.root_bounds();
        CheckOutcome {
            lower,
            upper,
            converged,
            iterations: self.iterations,
            nodes: self.arg.num_nodes(),
            covers: self.covers,
        }
    }

    // ------------------------------------------------------------------
    // BRTDP

    /// Run simulated-trace value iteration until the root bound gap drops
    /// below the threshold (or the configured iteration cap is hit).
    pub fn brtdp(&mut self) -> CheckResult<CheckOutcome> {
        info!(
            goal = ?self.config.goal,
            threshold = self.config.threshold,
            strategy = ?self.strategy.kind(),
            "starting BRTDP"
        );
        loop {
            if self.root_gap() <= self.config.threshold {
                let outcome = self.outcome(true);
                info!(
                    iterations = outcome.iterations,
                    nodes = outcome.nodes,
                    covers = outcome.covers,
                    lower = outcome.lower,
                    upper = outcome.upper,
                    "BRTDP converged"
                );
                return Ok(outcome);
            }
            if self
                .config
                .max_iterations
                .is_some_and(|cap| self.iterations >= cap)
            {
                debug!(iterations = self.iterations, "iteration cap reached");
                return Ok(self.outcome(false));
            }
            self.step()?;
        }
    }

    /// One BRTDP iteration: simulate a trace, fold newly found covers into
    /// the end-component structure, then back up values along the trace.
    /// Returns true once converged.
    pub fn step(&mut self) -> CheckResult<bool> {
        let trace = self.simulate(false)?;
        self.update_end_components();

        let mut seen: AHashSet<NodeId> = AHashSet::with_capacity(trace.len());
        for &raw in trace.iter().rev() {
            let n = self.arg.resolve(raw);
            if seen.insert(n) {
                self.backup(n);
            }
        }

        self.iterations += 1;
        if self.iterations % 100 == 0 {
            let (l, u) = self.root_bounds();
            debug!(
                iterations = self.iterations,
                nodes = self.arg.num_nodes(),
                lower = l,
                upper = u,
                "BRTDP progress"
            );
        }
        Ok(self.root_gap() <= self.config.threshold)
    }

    /// Simulate one trace from the root, expanding fresh nodes on the way.
    /// With `trapped` the stop rule uses the trapped-game lower bound, so the
    /// game-refinement variant keeps visiting nodes whose full bounds have
    /// already met.
    fn simulate(&mut self, trapped: bool) -> CheckResult<Vec<NodeId>> {
        let mut trace = Vec::new();
        let mut current = self.root;
        // Heuristic guard against runaway traces inside large or infinite
        // components, fixed at trace start.
        let cap = (3 * self.arg.num_nodes()).max(3);

        loop {
            let n = self.arg.resolve(current);
            trace.push(n);
            if !self.arg.node(n).expanded {
                self.expand(n)?;
            }

            let node = self.arg.node(n);
            if node.error || node.out_edges.is_empty() {
                break; // absorbing
            }
            if let Some(g) = self.live_group(n) {
                if self.groups[g].exit_edges.is_empty() {
                    break; // end component that cannot be left
                }
            }
            let l = if trapped { self.lower_trapped[n.index()] } else { self.lower[n.index()] };
            if self.upper[n.index()] - l <= 0.0 {
                break; // nothing left to learn below this node
            }
            if trace.len() >= cap {
                trace!(len = trace.len(), "trace length cap hit");
                break;
            }

            let edge = self.pick_edge(n);
            let e = self.arg.edge(edge);
            let entries: Vec<(f64, f64)> = e
                .result
                .iter()
                .map(|(&t, p)| {
                    let r = self.arg.resolve(t);
                    (p, self.upper[r.index()] - self.lower[r.index()])
                })
                .collect();
            let choice = self.strategy.pick(edge, &entries, &mut self.rng);
            current = *e.result.support().nth(choice).expect("choice within support");
        }
        Ok(trace)
    }

    /// The edge optimizing the optimistic value map at `n` (upper bounds for
    /// a maximizer, lower for a minimizer).
    fn pick_edge(&self, n: NodeId) -> EdgeId {
        let goal = self.config.goal;
        let optimistic = match goal {
            Goal::Max => &self.upper,
            Goal::Min => &self.lower,
        };
        let node = self.arg.node(n);
        let mut best = node.out_edges[0];
        let mut best_value = goal.worst();
        for &e in &node.out_edges {
            let v = self.arg.edge(e).result.expected_value(|&t| {
                optimistic[self.arg.resolve(t).index()]
            });
            if goal.improves(v, best_value) {
                best_value = v;
                best = e;
            }
        }
        best
    }

    // ------------------------------------------------------------------
    // Expansion and covering

    fn make_node(&mut self, concrete: Valuation, label: D::Label) -> NodeId {
        let id = self.arg.add_node(concrete, label);
        self.lower.push(0.0);
        self.upper.push(1.0);
        self.lower_trapped.push(0.0);
        self.group_of.push(None);
        id
    }

    /// Expand a fresh node: error commands first (with priority), then one
    /// edge per concretely enabled standard command. A command that is
    /// abstractly but not concretely enabled sharpens the label on the spot.
    fn expand(&mut self, n: NodeId) -> CheckResult<()> {
        debug_assert!(!self.arg.node(n).expanded);
        let concrete = self.arg.node(n).concrete.clone();
        trace!(node = %n, state = ?concrete, "expanding");

        let error_cmds = self.errors.commands(&concrete).to_vec();
        for cmd in &error_cmds {
            if self.config.use_may
                && self.domain.may_be_enabled(&self.arg.node(n).label, &cmd.guard)
            {
                // Refine the whole creating path against the abstract error;
                // an infeasible block means the error is concretely reached.
                match self.block_along_path(n, &cmd.guard) {
                    Ok(()) => {}
                    Err(CheckError::Domain(DomainError::InfeasibleBlock)) => {
                        self.mark_error(n);
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            } else if cmd.guard.eval_bool(&concrete)? {
                self.mark_error(n);
                return Ok(());
            }
        }

        let cmds = self.standard.commands(&concrete).to_vec();
        for cmd in &cmds {
            if cmd.guard.eval_bool(&concrete)? {
                let mut outcomes = Vec::with_capacity(cmd.action.len());
                for (action, p) in cmd.action.iter() {
                    let succ = self.domain.concrete_trans(&concrete, action)?;
                    let label = self.domain.top_after(&self.arg.node(n).label, action)?;
                    let child = self.make_node(succ, label);
                    outcomes.push((p, action.clone(), child));
                }
                let surely = self.config.use_must
                    && self.domain.must_be_enabled(&self.arg.node(n).label, &cmd.guard);
                self.arg.add_edge(n, cmd.id, cmd.guard.clone(), surely, outcomes.clone());
                // Close after the edge exists so strengthening cascades can
                // reach this node through the new back edges.
                for (_, _, child) in outcomes {
                    self.close(child)?;
                }
            } else {
                self.sharpen_against(n, &cmd.guard, &concrete)?;
            }
        }

        let node = self.arg.node_mut(n);
        node.expanded = true;
        if node.out_edges.is_empty() {
            // deadlock: absorbing with no reward
            self.lower[n.index()] = 0.0;
            self.upper[n.index()] = 0.0;
        }
        Ok(())
    }

    fn mark_error(&mut self, n: NodeId) {
        let node = self.arg.node_mut(n);
        node.error = true;
        node.expanded = true;
        self.lower[n.index()] = 1.0;
        self.upper[n.index()] = 1.0;
        // Nodes covered on the strength of the old label may not share the
        // error condition; they must explore on their own.
        let covered: Vec<NodeId> = self.arg.node(n).covered.iter().copied().collect();
        for c in covered {
            if self.arg.node(c).concrete != self.arg.node(n).concrete {
                self.uncover(c);
            } else {
                self.lower[c.index()] = 1.0;
                self.upper[c.index()] = 1.0;
            }
        }
    }

    /// Sharpen the label of `n` against a guard that is abstractly but not
    /// concretely enabled there.
    fn sharpen_against(
        &mut self,
        n: NodeId,
        guard: &Expr,
        concrete: &Valuation,
    ) -> CheckResult<()> {
        if self.config.use_may && self.domain.may_be_enabled(&self.arg.node(n).label, guard) {
            let blocked = self.domain.block(&self.arg.node(n).label, guard, concrete)?;
            self.strengthen(n, blocked)?;
        }
        Ok(())
    }

    /// The creating path of `n`: root to `n` through each node's first
    /// in-edge, which is the edge that created it.
    fn creating_path(&self, n: NodeId) -> Vec<NodeId> {
        let mut path = vec![n];
        let mut v = n;
        while let Some(&e) = self.arg.node(v).in_edges.first() {
            let source = self.arg.edge(e).source;
            debug_assert_ne!(source, v);
            path.push(source);
            v = source;
        }
        path.reverse();
        path
    }

    /// Strengthen every label along the creating path of `n` so that an
    /// abstract replay of the path cannot satisfy `formula` at `n`.
    /// `DomainError::InfeasibleBlock` from the domain means the concrete path
    /// itself reaches the formula: a real counterexample, left to the caller.
    fn block_along_path(&mut self, n: NodeId, formula: &Expr) -> CheckResult<()> {
        let path = self.creating_path(n);
        let labels: Vec<D::Label> =
            path.iter().map(|&v| self.arg.node(v).label.clone()).collect();

        let mut steps = Vec::with_capacity(path.len());
        for (i, &v) in path.iter().enumerate() {
            let (guard, action) = if i + 1 < path.len() {
                let next = path[i + 1];
                let e = *self
                    .arg
                    .node(next)
                    .in_edges
                    .first()
                    .expect("non-root path node has a creating edge");
                let edge = self.arg.edge(e);
                let (_, action, _) = edge
                    .outcomes
                    .iter()
                    .find(|(_, _, t)| *t == next)
                    .expect("creating edge targets the node");
                (Some(&edge.guard), Some(action))
            } else {
                (None, None)
            };
            steps.push(PathStep { concrete: &self.arg.node(v).concrete, guard, action });
        }
        let new_labels = self.domain.block_seq(&labels, &steps, formula)?;
        drop(steps);

        for (&v, label) in path.iter().zip(new_labels) {
            self.strengthen(v, label)?;
        }
        Ok(())
    }

    /// Try to cover a freshly created node: an identical concrete state wins
    /// outright; otherwise any uncovered non-error node whose label contains
    /// the new node's concrete state.
    fn close(&mut self, child: NodeId) -> CheckResult<()> {
        if let Some(m) = self.arg.find_same_concrete(child) {
            self.cover(child, m)?;
            return Ok(());
        }
        let concrete = self.arg.node(child).concrete.clone();
        let candidate = self.arg.node_ids().find(|&m| {
            m != child
                && self.arg.node(m).covering.is_none()
                && !self.arg.node(m).error
                && self.domain.check_containment(&concrete, &self.arg.node(m).label)
        });
        if let Some(m) = candidate {
            self.cover(child, m)?;
        }
        Ok(())
    }

    fn cover(&mut self, c: NodeId, m: NodeId) -> CheckResult<()> {
        debug_assert!(
            !self.arg.cover_chain_contains(m, c),
            "cover {c} -> {m} would close a cycle"
        );
        trace!(covered = %c, coverer = %m, "covering");
        self.arg.set_cover(c, m);
        self.covers += 1;
        self.new_covers.push(c);

        // Cover soundness needs the covered label below the coverer's.
        let c_label = self.arg.node(c).label.clone();
        let m_label = self.arg.node(m).label.clone();
        if !self.domain.is_leq(&c_label, &m_label) {
            let formula = Expr::not(self.domain.label_formula(&m_label));
            let witness = self.arg.node(c).concrete.clone();
            let blocked = self.domain.block(&c_label, &formula, &witness)?;
            self.strengthen(c, blocked)?;
        }
        Ok(())
    }

    fn uncover(&mut self, c: NodeId) {
        trace!(node = %c, "cover invalidated");
        self.arg.remove_cover(c);
        if let Some(g) = self.live_group(c) {
            self.dissolve_group(g);
        }
        if self.config.reset_on_uncover && !self.arg.node(c).error {
            self.lower[c.index()] = 0.0;
            self.upper[c.index()] = 1.0;
            self.lower_trapped[c.index()] = 0.0;
        }
    }

    /// Strengthen a node's abstract label and run the resulting cascade to a
    /// fixed point: re-validate every node it covers, and keep parents'
    /// labels consistent with the tightened pre-image. A worklist bounds the
    /// depth on long ARG paths.
    fn strengthen(&mut self, n: NodeId, new_label: D::Label) -> CheckResult<()> {
        let mut queue: VecDeque<(NodeId, D::Label)> = VecDeque::new();
        queue.push_back((n, new_label));

        while let Some((v, lab)) = queue.pop_front() {
            let lab = self.domain.meet(&self.arg.node(v).label, &lab);
            if lab == self.arg.node(v).label {
                continue;
            }
            debug_assert!(self.domain.check_containment(&self.arg.node(v).concrete, &lab));
            trace!(node = %v, label = ?lab, "strengthening label");
            self.arg.node_mut(v).label = lab.clone();

            // Re-validate covers held by this node.
            let covered: Vec<NodeId> = self.arg.node(v).covered.iter().copied().collect();
            for c in covered {
                let c_concrete = self.arg.node(c).concrete.clone();
                if !self.domain.check_containment(&c_concrete, &lab) {
                    self.uncover(c);
                } else if !self.domain.is_leq(&self.arg.node(c).label, &lab) {
                    let formula = Expr::not(self.domain.label_formula(&lab));
                    let blocked = self.domain.block(&self.arg.node(c).label, &formula, &c_concrete)?;
                    queue.push_back((c, blocked));
                }
            }

            // Keep parents consistent: their labels must still map into the
            // strengthened label under the connecting action.
            let in_edges: Vec<EdgeId> = self.arg.node(v).in_edges.iter().copied().collect();
            for e in in_edges {
                let source = self.arg.edge(e).source;
                if source == v {
                    continue;
                }
                let actions: Vec<larc_model::Action> = self
                    .arg
                    .edge(e)
                    .outcomes
                    .iter()
                    .filter(|(_, _, t)| *t == v)
                    .map(|(_, a, _)| a.clone())
                    .collect();
                for action in actions {
                    let witness = self.arg.node(source).concrete.clone();
                    let pre = self.domain.pre_image(&lab, &action, &witness)?;
                    debug_assert!(self
                        .domain
                        .post_image(&pre, &action)
                        .map_or(true, |post| self.domain.is_leq(&post, &lab)));
                    queue.push_back((source, pre));
                }
            }
        }
        Ok(())
    }

    /// Re-check containment of every standing cover; stale ones are removed.
    /// Returns the number of covers dropped (zero when the graph is stable).
    pub fn revalidate_covers(&mut self) -> usize {
        let mut removed = 0;
        for n in self.arg.node_ids().collect::<Vec<_>>() {
            if let Some(m) = self.arg.node(n).covering {
                let contained = self
                    .domain
                    .check_containment(&self.arg.node(n).concrete, &self.arg.node(m).label);
                if !contained {
                    self.uncover(n);
                    removed += 1;
                }
            }
        }
        removed
    }

    // ------------------------------------------------------------------
    // End components

    fn live_group(&self, n: NodeId) -> Option<usize> {
        self.group_of[n.index()].filter(|&g| self.groups[g].alive)
    }

    /// Recompute end components reachable through the covers found since the
    /// last call. Each cover can create at most one new component, and it is
    /// reachable from the covered node, so the search is restricted there.
    fn update_end_components(&mut self) {
        let covers = std::mem::take(&mut self.new_covers);
        for c in covers {
            if self.arg.node(c).covering.is_none() {
                continue; // uncovered again in the meantime
            }
            let view = self.arg.game_view(self.root);
            let mut allowed = all_allowed(&view);
            let mecs = compute_mecs_from(&view, &mut allowed, c);
            for mec in mecs {
                // Absorbing singletons need no merge bookkeeping.
                if mec.len() >= 2 {
                    self.install_group(mec.nodes);
                }
            }
        }
    }

    fn install_group(&mut self, nodes: Vec<NodeId>) {
        for &n in &nodes {
            if let Some(g) = self.live_group(n) {
                self.dissolve_group(g);
            }
        }

        let members: AHashSet<NodeId> = nodes.iter().copied().collect();
        let mut exit_edges = Vec::new();
        for &n in &nodes {
            if self.arg.node(n).covering.is_some() {
                continue;
            }
            for &e in self.arg.node(n).out_edges.iter() {
                let leaves = self.arg.edge(e).result.support().any(|t| !members.contains(t));
                if leaves {
                    exit_edges.push(e);
                }
            }
        }

        debug!(size = nodes.len(), exits = exit_edges.len(), "merging end component");
        let no_exit = exit_edges.is_empty();
        let g = self.groups.len();
        for &n in &nodes {
            self.group_of[n.index()] = Some(g);
        }
        self.groups.push(MergeGroup { nodes: nodes.clone(), exit_edges, alive: true });

        // A target-free component the play cannot (or, minimizing, will not)
        // leave has value 0.
        if no_exit || self.config.goal == Goal::Min {
            for &n in &nodes {
                self.upper[n.index()] = 0.0;
            }
        }
    }

    /// Covers inside a group changed: the component may no longer exist.
    /// Drop the group and fall back to trivial bounds for its members.
    fn dissolve_group(&mut self, g: usize) {
        let nodes = std::mem::take(&mut self.groups[g].nodes);
        self.groups[g].alive = false;
        for n in nodes {
            self.group_of[n.index()] = None;
            let node = self.arg.node(n);
            let absorbing = node.error || (node.expanded && node.out_edges.is_empty());
            if !absorbing {
                self.lower[n.index()] = 0.0;
                self.upper[n.index()] = 1.0;
                self.lower_trapped[n.index()] = 0.0;
            }
        }
    }

    // ------------------------------------------------------------------
    // Value updates

    /// Bellman-style backup of one (resolved) node, propagating the value to
    /// every node sharing its merge group.
    fn backup(&mut self, n: NodeId) {
        let node = self.arg.node(n);
        if node.error {
            self.lower[n.index()] = 1.0;
            self.upper[n.index()] = 1.0;
            self.lower_trapped[n.index()] = 1.0;
            return;
        }
        if !node.expanded {
            return;
        }
        if node.out_edges.is_empty() {
            self.lower[n.index()] = 0.0;
            self.upper[n.index()] = 0.0;
            return;
        }

        if let Some(g) = self.live_group(n) {
            self.backup_group(g);
            return;
        }

        let goal = self.config.goal;
        let edges: Vec<EdgeId> = self.arg.node(n).out_edges.iter().copied().collect();
        let (l_new, u_new) = self.opt_over_edges(&edges, goal);
        self.set_bounds(n, l_new, u_new);
    }

    /// Optimal expected (lower, upper) over a set of edges.
    fn opt_over_edges(&self, edges: &[EdgeId], goal: Goal) -> (f64, f64) {
        let mut l_best = goal.worst();
        let mut u_best = goal.worst();
        for &e in edges {
            let result = &self.arg.edge(e).result;
            let u = result.expected_value(|&t| self.upper[self.arg.resolve(t).index()]);
            let l = result.expected_value(|&t| self.lower[self.arg.resolve(t).index()]);
            u_best = goal.better(u_best, u);
            l_best = goal.better(l_best, l);
        }
        (l_best, u_best)
    }

    /// Update a whole merge group: all members take the component value.
    /// A maximizer realizes the best exit; a target-free component under a
    /// minimizer is worth 0 outright.
    fn backup_group(&mut self, g: usize) {
        let group = &self.groups[g];
        if group.exit_edges.is_empty() || self.config.goal == Goal::Min {
            for &n in &self.groups[g].nodes.clone() {
                self.upper[n.index()] = 0.0;
            }
            return;
        }

        let exit_edges = group.exit_edges.clone();
        let (mut l_new, mut u_new) = self.opt_over_edges(&exit_edges, Goal::Max);
        if self.config.monotone_bellman {
            let nodes = &self.groups[g].nodes;
            let u_cur = nodes.iter().map(|n| self.upper[n.index()]).fold(f64::INFINITY, f64::min);
            let l_cur = nodes.iter().map(|n| self.lower[n.index()]).fold(0.0, f64::max);
            u_new = u_new.min(u_cur);
            l_new = l_new.max(l_cur);
        }
        for &n in &self.groups[g].nodes.clone() {
            self.lower[n.index()] = l_new;
            self.upper[n.index()] = u_new;
        }
    }

    fn set_bounds(&mut self, n: NodeId, l_new: f64, u_new: f64) {
        let i = n.index();
        if self.config.monotone_bellman {
            self.lower[i] = self.lower[i].max(l_new);
            self.upper[i] = self.upper[i].min(u_new);
        } else {
            self.lower[i] = l_new;
            self.upper[i] = u_new;
        }
    }

    // ------------------------------------------------------------------
    // Game-refinement variant

    /// BRTDP over the Full/Trapped game pair: the upper bound lives in the
    /// full game (every discovered edge admissible), the lower bound in the
    /// trapped game (surely-enabled edges only); the gap is closed both by
    /// simulation and by promoting edges to surely-enabled through guard
    /// strengthening. Preserves `L_trapped <= value <= U_full` throughout.
    pub fn brtdp_with_game_refinement(&mut self) -> CheckResult<CheckOutcome> {
        if self.config.use_must && !self.config.use_may {
            // The reference semantics of must-only refinement is unresolved.
            return Err(CheckError::UnsupportedConfig(
                "must-only abstraction with game refinement".into(),
            ));
        }
        if self.config.goal == Goal::Min {
            return Err(CheckError::UnsupportedConfig(
                "game refinement requires a MAX goal".into(),
            ));
        }

        info!(threshold = self.config.threshold, "starting BRTDP with game refinement");
        loop {
            let root = self.arg.resolve(self.root);
            let gap = self.upper[root.index()] - self.lower_trapped[root.index()];
            if gap <= self.config.threshold {
                let mut outcome = self.outcome(true);
                outcome.lower = self.lower_trapped[root.index()];
                info!(
                    iterations = outcome.iterations,
                    lower = outcome.lower,
                    upper = outcome.upper,
                    "game-refinement BRTDP converged"
                );
                return Ok(outcome);
            }
            if self
                .config
                .max_iterations
                .is_some_and(|cap| self.iterations >= cap)
            {
                let mut outcome = self.outcome(false);
                outcome.lower = self.lower_trapped[self.arg.resolve(self.root).index()];
                return Ok(outcome);
            }

            let trace = self.simulate(true)?;
            self.update_end_components();
            let mut seen: AHashSet<NodeId> = AHashSet::with_capacity(trace.len());
            for &raw in trace.iter().rev() {
                let n = self.arg.resolve(raw);
                if seen.insert(n) {
                    self.backup(n);
                    self.backup_trapped(n);
                }
            }

            self.iterations += 1;
            if self.iterations % self.config.refine_every == 0 {
                self.promote_one(&trace)?;
            }
        }
    }

    /// Trapped-game lower bound backup: only surely-enabled edges count.
    fn backup_trapped(&mut self, n: NodeId) {
        let node = self.arg.node(n);
        if node.error {
            self.lower_trapped[n.index()] = 1.0;
            return;
        }
        if !node.expanded || node.out_edges.is_empty() {
            return;
        }
        let edges: Vec<EdgeId> = node
            .out_edges
            .iter()
            .copied()
            .filter(|&e| self.arg.edge(e).surely_enabled)
            .collect();
        if edges.is_empty() {
            return; // trapped: nothing is guaranteed here yet
        }
        let mut best = 0.0f64;
        for &e in &edges {
            let v = self
                .arg
                .edge(e)
                .result
                .expected_value(|&t| self.lower_trapped[self.arg.resolve(t).index()]);
            best = best.max(v);
        }
        let i = n.index();
        self.lower_trapped[i] = self.lower_trapped[i].max(best);
    }

    /// Promote the edge with the largest Full/Trapped discrepancy along the
    /// trace: strengthen its source label against the negated guard, making
    /// the guard surely enabled there.
    fn promote_one(&mut self, trace: &[NodeId]) -> CheckResult<()> {
        let mut best: Option<(EdgeId, f64)> = None;
        for &raw in trace {
            let n = self.arg.resolve(raw);
            for &e in self.arg.node(n).out_edges.iter() {
                if self.arg.edge(e).surely_enabled {
                    continue;
                }
                let result = &self.arg.edge(e).result;
                let u = result.expected_value(|&t| self.upper[self.arg.resolve(t).index()]);
                let l = result
                    .expected_value(|&t| self.lower_trapped[self.arg.resolve(t).index()]);
                let score = u - l;
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((e, score));
                }
            }
        }
        let Some((e, score)) = best else {
            return Ok(());
        };

        let source = self.arg.edge(e).source;
        let guard = self.arg.edge(e).guard.clone();
        let witness = self.arg.node(source).concrete.clone();
        debug!(edge = ?e, score, "promoting edge to surely enabled");
        // The edge exists, so the guard holds concretely at the source: the
        // witness does not satisfy the negated guard.
        let blocked = self.domain.block(&self.arg.node(source).label, &Expr::not(guard.clone()), &witness)?;
        self.strengthen(source, blocked)?;
        let surely = self.domain.must_be_enabled(&self.arg.node(source).label, &guard);
        self.arg.edge_mut(e).surely_enabled = surely;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Fully expanded mode

    /// Exhaustive breadth-first expansion followed by a one-shot solve of the
    /// resulting finite game. Only terminates on finite state spaces; no end
    /// component tracking is needed because the solver handles it.
    pub fn fully_expanded(&mut self) -> CheckResult<CheckOutcome> {
        info!("fully expanding the reachable state space");
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        queue.push_back(self.root);
        while let Some(raw) = queue.pop_front() {
            let n = self.arg.resolve(raw);
            if self.arg.node(n).expanded {
                continue;
            }
            self.expand(n)?;
            for &e in self.arg.node(n).out_edges.clone().iter() {
                for (_, _, target) in &self.arg.edge(e).outcomes {
                    queue.push_back(*target);
                }
            }
        }
        info!(nodes = self.arg.num_nodes(), edges = self.arg.num_edges(), "expansion complete");

        let view = self.arg.game_view(self.arg.resolve(self.root));
        let targets = TargetReward::new(
            self.arg
                .node_ids()
                .filter(|&n| self.arg.node(n).error),
        );
        let solver = MdpBviSolver::new(self.config.threshold);
        let result = solver.solve(&view, &targets, self.config.goal)?;
        self.lower = result.bounds.lower;
        self.upper = result.bounds.upper;
        Ok(self.outcome(true))
    }
}
