//! End-to-end checks of the lazy BRTDP checker on small counter models.

use larc_mc::{CheckConfig, CheckError, ExplicitDomain, LazyChecker, LazyDomain, StrategyKind};
use larc_model::{
    Action, Distribution, Expr, Goal, ProbabilisticCommand, StaticCommands, Stmt, Valuation,
};

fn inc(id: usize) -> Action {
    Action::new(id, vec![Stmt::Assign(0, Expr::add(Expr::var(0), Expr::int(1)))])
}

/// One counter `A` starting at 0. While `A < 2`, increment with 0.8 or stay
/// with 0.2; the error condition is `A == 2`. The error is reached almost
/// surely: the value is 1.
fn counter_model() -> (StaticCommands, StaticCommands) {
    let step = ProbabilisticCommand::new(
        0,
        Expr::lt(Expr::var(0), Expr::int(2)),
        Distribution::new([(inc(0), 0.8), (Action::skip(1), 0.2)]).unwrap(),
    );
    let error = ProbabilisticCommand::new(
        0,
        Expr::eq(Expr::var(0), Expr::int(2)),
        Distribution::dirac(Action::skip(0)),
    );
    (
        StaticCommands::new(vec![step]),
        StaticCommands::new(vec![error]),
    )
}

fn counter_checker(
    config: CheckConfig,
) -> LazyChecker<ExplicitDomain, StaticCommands, StaticCommands> {
    let (standard, errors) = counter_model();
    let domain = ExplicitDomain::new(1);
    let label = domain.top();
    LazyChecker::new(domain, standard, errors, Valuation::zeroed(1), label, config)
}

#[test]
fn test_counter_reaches_error_almost_surely() {
    let mut checker = counter_checker(CheckConfig::default());
    let outcome = checker.brtdp().unwrap();
    assert!(outcome.converged);
    assert!((outcome.value() - 1.0).abs() < 1e-5, "value = {}", outcome.value());
    assert!(checker.bounds_sound());
    assert!(outcome.covers >= 1, "the skip loop must produce a cover");
}

#[test]
fn test_fully_expanded_agrees_with_brtdp() {
    let mut lazy = counter_checker(CheckConfig::default());
    let lazy_outcome = lazy.brtdp().unwrap();

    let mut full = counter_checker(CheckConfig::default());
    let full_outcome = full.fully_expanded().unwrap();
    assert!((full_outcome.value() - lazy_outcome.value()).abs() < 1e-4);
    assert!((full_outcome.value() - 1.0).abs() < 1e-5);
}

#[test]
fn test_strategies_agree() {
    for kind in [
        StrategyKind::DiffBased,
        StrategyKind::Random,
        StrategyKind::WeightedRandom,
        StrategyKind::RoundRobin,
    ] {
        let config = CheckConfig { strategy: kind, seed: 13, ..CheckConfig::default() };
        let outcome = counter_checker(config).brtdp().unwrap();
        assert!(outcome.converged, "{kind:?} did not converge");
        assert!((outcome.value() - 1.0).abs() < 1e-5, "{kind:?}: {}", outcome.value());
    }
}

#[test]
fn test_monotone_bellman_keeps_bounds_ordered() {
    let config = CheckConfig { monotone_bellman: true, ..CheckConfig::default() };
    let mut checker = counter_checker(config);
    let root = checker.root();
    let (mut last_l, mut last_u) = checker.bounds(root);
    for _ in 0..10_000 {
        let converged = checker.step().unwrap();
        let (l, u) = checker.bounds(root);
        assert!(l >= last_l, "lower bound regressed: {last_l} -> {l}");
        assert!(u <= last_u, "upper bound regressed: {last_u} -> {u}");
        assert!(checker.bounds_sound());
        last_l = l;
        last_u = u;
        if converged {
            return;
        }
    }
    panic!("did not converge in 10000 iterations");
}

#[test]
fn test_cover_revalidation_is_idempotent_after_convergence() {
    let mut checker = counter_checker(CheckConfig::default());
    checker.brtdp().unwrap();
    // converged graph: every standing cover still satisfies containment
    assert_eq!(checker.revalidate_covers(), 0);
    assert_eq!(checker.revalidate_covers(), 0);
}

/// Minimizing over `[A < 1] A := A + 1` versus `[A < 1] skip` with error at
/// `A == 1`: the minimizer loops on skip forever, so the value is 0. Only end
/// component detection can conclude this; plain value iteration from above
/// stays at 1.
#[test]
fn test_min_player_escapes_into_loop() {
    let step = ProbabilisticCommand::new(
        0,
        Expr::lt(Expr::var(0), Expr::int(1)),
        Distribution::dirac(inc(0)),
    );
    let stay = ProbabilisticCommand::new(
        1,
        Expr::lt(Expr::var(0), Expr::int(1)),
        Distribution::dirac(Action::skip(0)),
    );
    let error = ProbabilisticCommand::new(
        0,
        Expr::eq(Expr::var(0), Expr::int(1)),
        Distribution::dirac(Action::skip(0)),
    );
    let domain = ExplicitDomain::new(1);
    let label = domain.top();
    let config = CheckConfig { goal: Goal::Min, ..CheckConfig::default() };
    let mut checker = LazyChecker::new(
        domain,
        StaticCommands::new(vec![step, stay]),
        StaticCommands::new(vec![error]),
        Valuation::zeroed(1),
        label,
        config,
    );
    let outcome = checker.brtdp().unwrap();
    assert!(outcome.converged);
    assert_eq!(outcome.upper, 0.0);
    assert_eq!(outcome.value(), 0.0);
}

/// A single probabilistic command whose support leaves the loop is not an end
/// component: the 0.5 exit chance drives the value to 1.
#[test]
fn test_probabilistic_exit_breaks_the_loop() {
    let step = ProbabilisticCommand::new(
        0,
        Expr::lt(Expr::var(0), Expr::int(1)),
        Distribution::new([(inc(0), 0.5), (Action::skip(1), 0.5)]).unwrap(),
    );
    let error = ProbabilisticCommand::new(
        0,
        Expr::eq(Expr::var(0), Expr::int(1)),
        Distribution::dirac(Action::skip(0)),
    );
    let domain = ExplicitDomain::new(1);
    let label = domain.top();
    let mut checker = LazyChecker::new(
        domain,
        StaticCommands::new(vec![step]),
        StaticCommands::new(vec![error]),
        Valuation::zeroed(1),
        label,
        CheckConfig::default(),
    );
    let outcome = checker.brtdp().unwrap();
    assert!(outcome.converged);
    assert!((outcome.value() - 1.0).abs() < 1e-5, "value = {}", outcome.value());
}

/// An infinite chain that cannot converge; the iteration cap stops the run
/// with the trivial but sound bounds intact. The error guard `A == -1` is
/// unsatisfiable but keeps every label pinned to its exact counter value, so
/// no node ever covers another and the chain grows without bound. (Without
/// it the whole chain collapses into one covered end component of value 0.)
#[test]
fn test_iteration_cap_on_infinite_chain() {
    let step = ProbabilisticCommand::new(0, Expr::Bool(true), Distribution::dirac(inc(0)));
    let error = ProbabilisticCommand::new(
        0,
        Expr::eq(Expr::var(0), Expr::int(-1)),
        Distribution::dirac(Action::skip(0)),
    );
    let domain = ExplicitDomain::new(1);
    let label = domain.top();
    let config = CheckConfig { max_iterations: Some(20), ..CheckConfig::default() };
    let mut checker = LazyChecker::new(
        domain,
        StaticCommands::new(vec![step]),
        StaticCommands::new(vec![error]),
        Valuation::zeroed(1),
        label,
        config,
    );
    let outcome = checker.brtdp().unwrap();
    assert!(!outcome.converged);
    assert_eq!(outcome.iterations, 20);
    assert_eq!(outcome.lower, 0.0);
    assert_eq!(outcome.upper, 1.0);
    assert_eq!(outcome.covers, 0, "exact labels admit no covers");
    assert!(checker.bounds_sound());
}

/// Both outcomes of one command land in the same concrete state, so two
/// sibling nodes with identical states exist before either is closed. They
/// must not end up covering each other; the run has to terminate with the
/// loop recognized as a value-0 end component.
#[test]
fn test_duplicate_successor_states_terminate() {
    let step = ProbabilisticCommand::new(
        0,
        Expr::lt(Expr::var(0), Expr::int(1)),
        Distribution::new([(Action::new(0, vec![Stmt::Assign(0, Expr::int(1))]), 0.5), (inc(1), 0.5)])
            .unwrap(),
    );
    let domain = ExplicitDomain::new(1);
    let label = domain.top();
    let config = CheckConfig { max_iterations: Some(100), ..CheckConfig::default() };
    let mut checker = LazyChecker::new(
        domain,
        StaticCommands::new(vec![step]),
        StaticCommands::empty(),
        Valuation::zeroed(1),
        label,
        config,
    );
    let outcome = checker.brtdp().unwrap();
    assert!(outcome.converged);
    assert_eq!(outcome.value(), 0.0);
    assert!(checker.bounds_sound());
    // the resolve chain of every node terminates
    for n in checker.arg().node_ids() {
        checker.arg().resolve(n);
    }
}

/// Same duplicate-successor shape, but the shared state is the error state:
/// the concretely reached error must be reported through the covered sibling
/// as well, giving value 1.
#[test]
fn test_duplicate_successors_reaching_the_error() {
    let step = ProbabilisticCommand::new(
        0,
        Expr::lt(Expr::var(0), Expr::int(1)),
        Distribution::new([(Action::new(0, vec![Stmt::Assign(0, Expr::int(1))]), 0.5), (inc(1), 0.5)])
            .unwrap(),
    );
    let error = ProbabilisticCommand::new(
        0,
        Expr::eq(Expr::var(0), Expr::int(1)),
        Distribution::dirac(Action::skip(0)),
    );
    let domain = ExplicitDomain::new(1);
    let label = domain.top();
    let mut checker = LazyChecker::new(
        domain,
        StaticCommands::new(vec![step]),
        StaticCommands::new(vec![error]),
        Valuation::zeroed(1),
        label,
        CheckConfig::default(),
    );
    let outcome = checker.brtdp().unwrap();
    assert!(outcome.converged);
    assert!((outcome.value() - 1.0).abs() < 1e-5, "value = {}", outcome.value());
    assert!(checker.arg().node_ids().any(|n| checker.arg().node(n).error));
}

/// A spurious abstract error strengthens the labels of the whole creating
/// path, not just the node where it was noticed: after the run the root label
/// is pinned to the initial counter value.
#[test]
fn test_unreachable_error_guard_sharpens_the_path() {
    let step = ProbabilisticCommand::new(
        0,
        Expr::lt(Expr::var(0), Expr::int(3)),
        Distribution::dirac(inc(0)),
    );
    let error = ProbabilisticCommand::new(
        0,
        Expr::eq(Expr::var(0), Expr::int(5)),
        Distribution::dirac(Action::skip(0)),
    );
    let domain = ExplicitDomain::new(1);
    let label = domain.top();
    let mut checker = LazyChecker::new(
        domain,
        StaticCommands::new(vec![step]),
        StaticCommands::new(vec![error]),
        Valuation::zeroed(1),
        label,
        CheckConfig::default(),
    );
    let outcome = checker.brtdp().unwrap();
    assert!(outcome.converged);
    assert_eq!(outcome.value(), 0.0, "the guard cuts the chain before the error");
    assert!(checker.arg().node_ids().all(|n| !checker.arg().node(n).error));
    let root = checker.root();
    assert_eq!(checker.arg().node(root).label.get(0), Some(0));
}

#[test]
fn test_game_refinement_matches_plain_brtdp() {
    let config = CheckConfig { refine_every: 4, ..CheckConfig::default() };
    let mut checker = counter_checker(config);
    let outcome = checker.brtdp_with_game_refinement().unwrap();
    assert!(outcome.converged);
    assert!((outcome.value() - 1.0).abs() < 1e-5, "value = {}", outcome.value());
    assert!(outcome.lower <= outcome.upper);
}

#[test]
fn test_game_refinement_rejects_min_goal() {
    let config = CheckConfig { goal: Goal::Min, ..CheckConfig::default() };
    let mut checker = counter_checker(config);
    let err = checker.brtdp_with_game_refinement().unwrap_err();
    assert!(matches!(err, CheckError::UnsupportedConfig(_)));
}

#[test]
fn test_game_refinement_rejects_must_only_abstraction() {
    let config = CheckConfig { use_may: false, use_must: true, ..CheckConfig::default() };
    let mut checker = counter_checker(config);
    let err = checker.brtdp_with_game_refinement().unwrap_err();
    assert!(matches!(err, CheckError::UnsupportedConfig(_)));
}
