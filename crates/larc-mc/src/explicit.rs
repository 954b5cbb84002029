//! Explicit-value lazy domain: labels are partial valuations.
//!
//! A label tracks exact values for a subset of the variables and no
//! information about the rest. Strengthening assigns more variables from a
//! concrete witness; the read set of the formula being blocked determines
//! which ones, which keeps labels as coarse as soundness allows.

use crate::domain::{DomainError, LazyDomain, PathStep};
use larc_model::{Action, Expr, PartialValuation, Stmt, Valuation, Value, VarId};

/// The explicit-value domain over `num_vars` integer variables.
#[derive(Debug, Clone)]
pub struct ExplicitDomain {
    num_vars: usize,
}

impl ExplicitDomain {
    pub fn new(num_vars: usize) -> Self {
        ExplicitDomain { num_vars }
    }

    /// Propagate a needed-variable set backward through a statement list:
    /// after the call, determining `needed` before the statements determines
    /// the original `needed` after them.
    fn needed_before(stmts: &[Stmt], needed: &mut Vec<VarId>) {
        for stmt in stmts.iter().rev() {
            if let Stmt::Assign(x, e) = stmt {
                if let Some(pos) = needed.iter().position(|v| v == x) {
                    needed.swap_remove(pos);
                    for r in e.reads() {
                        if !needed.contains(&r) {
                            needed.push(r);
                        }
                    }
                }
            }
        }
    }

    fn assign_from(
        &self,
        label: &PartialValuation,
        vars: &[VarId],
        witness: &Valuation,
    ) -> PartialValuation {
        let mut out = label.clone();
        for &x in vars {
            if let Some(v) = witness.get(x) {
                out.assign(x, v);
            }
        }
        out
    }
}

impl LazyDomain for ExplicitDomain {
    type Label = PartialValuation;

    fn top(&self) -> PartialValuation {
        PartialValuation::top(self.num_vars)
    }

    fn check_containment(&self, concrete: &Valuation, label: &PartialValuation) -> bool {
        label.contains(concrete)
    }

    fn is_leq(&self, l1: &PartialValuation, l2: &PartialValuation) -> bool {
        l1.is_leq(l2)
    }

    fn may_be_enabled(&self, label: &PartialValuation, guard: &Expr) -> bool {
        // An evaluation error counts as unknown, hence possible.
        !matches!(guard.eval_partial(label), Ok(Some(Value::Bool(false))))
    }

    fn must_be_enabled(&self, label: &PartialValuation, guard: &Expr) -> bool {
        matches!(guard.eval_partial(label), Ok(Some(Value::Bool(true))))
    }

    fn concrete_trans(
        &self,
        concrete: &Valuation,
        action: &Action,
    ) -> Result<Valuation, DomainError> {
        let mut succ = concrete.clone();
        for stmt in &action.stmts {
            stmt.apply(&mut succ)?;
        }
        Ok(succ)
    }

    fn block(
        &self,
        label: &PartialValuation,
        formula: &Expr,
        witness: &Valuation,
    ) -> Result<PartialValuation, DomainError> {
        if !label.contains(witness) {
            return Err(DomainError::BlockPrecondition {
                reason: format!("witness {witness:?} not contained in label {label:?}"),
            });
        }
        if formula.eval_bool(witness)? {
            return Err(DomainError::BlockPrecondition {
                reason: format!("witness {witness:?} satisfies the formula to block"),
            });
        }
        // Assigning the formula's read set from the witness decides the
        // formula on the label, and it is false there because it is false on
        // the witness.
        Ok(self.assign_from(label, &formula.reads(), witness))
    }

    fn block_seq(
        &self,
        labels: &[PartialValuation],
        steps: &[PathStep<'_>],
        to_block: &Expr,
    ) -> Result<Vec<PartialValuation>, DomainError> {
        assert_eq!(labels.len(), steps.len(), "one label per path step");
        let last = steps.last().expect("non-empty path");
        if to_block.eval_bool(last.concrete)? {
            // The concrete path reaches the blocked condition: a real
            // counterexample, not a spurious abstract one.
            return Err(DomainError::InfeasibleBlock);
        }

        let mut new_labels = vec![PartialValuation::top(self.num_vars); labels.len()];
        let mut needed = to_block.reads();
        for i in (0..steps.len()).rev() {
            new_labels[i] = self.assign_from(&labels[i], &needed, steps[i].concrete);
            if i > 0 {
                if let Some(action) = steps[i - 1].action {
                    Self::needed_before(&action.stmts, &mut needed);
                }
                if let Some(guard) = steps[i - 1].guard {
                    for r in guard.reads() {
                        if !needed.contains(&r) {
                            needed.push(r);
                        }
                    }
                }
            }
        }
        Ok(new_labels)
    }

    fn post_image(
        &self,
        label: &PartialValuation,
        action: &Action,
    ) -> Result<PartialValuation, DomainError> {
        let mut out = label.clone();
        for stmt in &action.stmts {
            stmt.apply_partial(&mut out)?;
        }
        Ok(out)
    }

    fn pre_image(
        &self,
        succ_label: &PartialValuation,
        action: &Action,
        witness: &Valuation,
    ) -> Result<PartialValuation, DomainError> {
        let succ = self.concrete_trans(witness, action)?;
        if !succ_label.contains(&succ) {
            return Err(DomainError::BlockPrecondition {
                reason: format!(
                    "successor {succ:?} of pre-image witness not contained in {succ_label:?}"
                ),
            });
        }
        let mut needed: Vec<VarId> = succ_label.assigned().collect();
        Self::needed_before(&action.stmts, &mut needed);
        Ok(self.assign_from(&self.top(), &needed, witness))
    }

    fn top_after(
        &self,
        _label: &PartialValuation,
        _action: &Action,
    ) -> Result<PartialValuation, DomainError> {
        Ok(self.top())
    }

    fn meet(&self, l1: &PartialValuation, l2: &PartialValuation) -> PartialValuation {
        l1.meet(l2)
    }

    fn label_formula(&self, label: &PartialValuation) -> Expr {
        let mut formula: Option<Expr> = None;
        for x in label.assigned() {
            let Some(n) = label.get(x) else { continue };
            let atom = Expr::eq(Expr::var(x), Expr::int(n));
            formula = Some(match formula {
                Some(f) => Expr::and(f, atom),
                None => atom,
            });
        }
        formula.unwrap_or(Expr::Bool(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larc_model::Stmt;

    fn domain() -> ExplicitDomain {
        ExplicitDomain::new(2)
    }

    #[test]
    fn test_block_assigns_read_set() {
        let d = domain();
        let witness = Valuation::new(vec![0, 5]);
        let label = d.top();
        // block "v0 == 2": witness has v0 = 0, so blocking assigns v0
        let blocked = d
            .block(&label, &Expr::eq(Expr::var(0), Expr::int(2)), &witness)
            .unwrap();
        assert_eq!(blocked.get(0), Some(0));
        assert_eq!(blocked.get(1), None);
        assert!(!d.may_be_enabled(&blocked, &Expr::eq(Expr::var(0), Expr::int(2))));
    }

    #[test]
    fn test_block_precondition_witness_satisfies() {
        let d = domain();
        let witness = Valuation::new(vec![2, 0]);
        let err = d
            .block(&d.top(), &Expr::eq(Expr::var(0), Expr::int(2)), &witness)
            .unwrap_err();
        assert!(matches!(err, DomainError::BlockPrecondition { .. }));
    }

    #[test]
    fn test_block_precondition_witness_outside_label() {
        let d = domain();
        let mut label = d.top();
        label.assign(0, 7);
        let witness = Valuation::new(vec![0, 0]);
        let err = d
            .block(&label, &Expr::eq(Expr::var(0), Expr::int(2)), &witness)
            .unwrap_err();
        assert!(matches!(err, DomainError::BlockPrecondition { .. }));
    }

    #[test]
    fn test_block_seq_feasible_path_is_counterexample() {
        let d = domain();
        // path v0: 1 -> 2, blocking "v0 == 2" at the end is infeasible to
        // block: the path concretely reaches it
        let s0 = Valuation::new(vec![1, 0]);
        let s1 = Valuation::new(vec![2, 0]);
        let inc = Action::new(0, vec![Stmt::Assign(0, Expr::add(Expr::var(0), Expr::int(1)))]);
        let guard = Expr::lt(Expr::var(0), Expr::int(2));
        let labels = vec![d.top(), d.top()];
        let steps = [
            PathStep { concrete: &s0, guard: Some(&guard), action: Some(&inc) },
            PathStep { concrete: &s1, guard: None, action: None },
        ];
        let err = d
            .block_seq(&labels, &steps, &Expr::eq(Expr::var(0), Expr::int(2)))
            .unwrap_err();
        assert!(matches!(err, DomainError::InfeasibleBlock));
    }

    #[test]
    fn test_block_seq_strengthens_prefix() {
        let d = domain();
        // path v0: 0 -> 1, block "v0 == 2" at the end: the final label needs
        // v0, and v0 after the increment needs v0 before it
        let s0 = Valuation::new(vec![0, 0]);
        let s1 = Valuation::new(vec![1, 0]);
        let inc = Action::new(0, vec![Stmt::Assign(0, Expr::add(Expr::var(0), Expr::int(1)))]);
        let guard = Expr::lt(Expr::var(0), Expr::int(2));
        let labels = vec![d.top(), d.top()];
        let steps = [
            PathStep { concrete: &s0, guard: Some(&guard), action: Some(&inc) },
            PathStep { concrete: &s1, guard: None, action: None },
        ];
        let new_labels = d
            .block_seq(&labels, &steps, &Expr::eq(Expr::var(0), Expr::int(2)))
            .unwrap();
        assert_eq!(new_labels[1].get(0), Some(1));
        assert_eq!(new_labels[0].get(0), Some(0));
        // replaying the path abstractly can no longer satisfy the formula
        let post = d.post_image(&new_labels[0], &inc).unwrap();
        assert!(!d.may_be_enabled(&post, &Expr::eq(Expr::var(0), Expr::int(2))));
    }

    #[test]
    fn test_pre_image_determines_successor_label() {
        let d = domain();
        let witness = Valuation::new(vec![3, 9]);
        let action = Action::new(0, vec![Stmt::Assign(0, Expr::add(Expr::var(0), Expr::int(1)))]);
        let mut succ_label = d.top();
        succ_label.assign(0, 4);
        let pre = d.pre_image(&succ_label, &action, &witness).unwrap();
        assert_eq!(pre.get(0), Some(3));
        assert_eq!(pre.get(1), None);
        let post = d.post_image(&pre, &action).unwrap();
        assert!(d.is_leq(&post, &succ_label));
    }

    #[test]
    fn test_label_formula_round_trip() {
        let d = domain();
        let mut label = d.top();
        label.assign(1, 4);
        let formula = d.label_formula(&label);
        // a contained witness satisfies it
        assert!(formula.eval_bool(&Valuation::new(vec![0, 4])).unwrap());
        assert!(!formula.eval_bool(&Valuation::new(vec![0, 5])).unwrap());
        // top label yields the trivial formula
        assert_eq!(d.label_formula(&d.top()), Expr::Bool(true));
    }

    #[test]
    fn test_concrete_trans_applies_sequence() {
        let d = domain();
        let action = Action::new(
            0,
            vec![
                Stmt::Assign(0, Expr::int(1)),
                Stmt::Assign(1, Expr::add(Expr::var(0), Expr::int(1))),
            ],
        );
        let succ = d.concrete_trans(&Valuation::new(vec![0, 0]), &action).unwrap();
        assert_eq!(succ, Valuation::new(vec![1, 2]));
    }
}
