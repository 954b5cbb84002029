//! The lazy abstraction domain interface.

use larc_model::{Action, EvalError, Expr, Valuation};
use std::fmt;
use thiserror::Error;

/// Domain operation failure.
#[derive(Debug, Error)]
pub enum DomainError {
    /// `block` called with a witness outside the label or one that satisfies
    /// the formula to block. A programming error, never retried.
    #[error("block precondition violated: {reason}")]
    BlockPrecondition { reason: String },

    /// `block_seq` found the path concretely feasible to the blocked
    /// condition. Not a bug: this is a genuine counterexample, surfaced to
    /// the caller.
    #[error("path is concretely feasible to the blocked condition")]
    InfeasibleBlock,

    /// An action produced more than one concrete successor where determinism
    /// is required.
    #[error("action {action} has nondeterministic successors")]
    Nondeterministic { action: usize },

    #[error("evaluation failed: {0}")]
    Eval(#[from] EvalError),
}

/// One step of an ARG path handed to [`LazyDomain::block_seq`]: the concrete
/// state at the step and, except on the final step, the guard and action of
/// the edge taken.
#[derive(Debug, Clone, Copy)]
pub struct PathStep<'a> {
    pub concrete: &'a Valuation,
    pub guard: Option<&'a Expr>,
    pub action: Option<&'a Action>,
}

/// Abstraction strategy plugged into the lazy checker.
///
/// A label over-approximates a set of concrete states; the checker maintains
/// the invariant that every node's label contains its concrete state, and
/// strengthens labels through `block`/`block_seq` to rule out spurious
/// abstract behavior while keeping that invariant.
pub trait LazyDomain {
    type Label: Clone + PartialEq + fmt::Debug;

    /// The no-information label containing every state.
    fn top(&self) -> Self::Label;

    /// True iff `concrete` is represented by `label`.
    fn check_containment(&self, concrete: &Valuation, label: &Self::Label) -> bool;

    /// Partial order: `l1` is at least as precise as `l2` (every state of
    /// `l1` is a state of `l2`).
    fn is_leq(&self, l1: &Self::Label, l2: &Self::Label) -> bool;

    /// Over-approximate guard check: false means no state of the label
    /// satisfies the guard.
    fn may_be_enabled(&self, label: &Self::Label, guard: &Expr) -> bool;

    /// Under-approximate guard check: true means every state of the label
    /// satisfies the guard.
    fn must_be_enabled(&self, label: &Self::Label, guard: &Expr) -> bool;

    /// The unique concrete successor under `action`. Actions with more than
    /// one successor are unsupported and must fail with
    /// [`DomainError::Nondeterministic`].
    fn concrete_trans(
        &self,
        concrete: &Valuation,
        action: &Action,
    ) -> Result<Valuation, DomainError>;

    /// Strengthen `label` so it still contains `witness` but no longer
    /// intersects `formula`. Precondition: `witness` is contained in `label`
    /// and does not satisfy `formula`.
    fn block(
        &self,
        label: &Self::Label,
        formula: &Expr,
        witness: &Valuation,
    ) -> Result<Self::Label, DomainError>;

    /// Strengthen a whole path prefix at once so that replaying it under the
    /// new labels cannot reach a state satisfying `to_block`. Fails with
    /// [`DomainError::InfeasibleBlock`] when the concrete path actually
    /// reaches the blocked condition.
    fn block_seq(
        &self,
        labels: &[Self::Label],
        steps: &[PathStep<'_>],
        to_block: &Expr,
    ) -> Result<Vec<Self::Label>, DomainError>;

    /// Forward abstract transformer.
    fn post_image(&self, label: &Self::Label, action: &Action) -> Result<Self::Label, DomainError>;

    /// Backward transformer used by the strengthening cascade: a label that
    /// contains `witness` and whose post under `action` is at least as
    /// precise as `succ_label`. Precondition: the concrete successor of
    /// `witness` is contained in `succ_label`.
    fn pre_image(
        &self,
        succ_label: &Self::Label,
        action: &Action,
        witness: &Valuation,
    ) -> Result<Self::Label, DomainError>;

    /// The least precise label reachable after `action`, used when creating
    /// fresh successor nodes optimistically.
    fn top_after(&self, label: &Self::Label, action: &Action)
        -> Result<Self::Label, DomainError>;

    /// Greatest lower bound of two labels that share a concrete witness.
    fn meet(&self, l1: &Self::Label, l2: &Self::Label) -> Self::Label;

    /// A formula satisfied exactly by the states of `label`; blocking its
    /// negation forces another label below `label` in the cover order.
    fn label_formula(&self, label: &Self::Label) -> Expr;
}
