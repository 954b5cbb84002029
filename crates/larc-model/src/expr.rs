//! Guard and assignment mini-language over integer variables.
//!
//! Guards and update statements of probabilistic commands are expressed in
//! this language; the explicit lazy domain additionally evaluates guards
//! three-valued over partial valuations for may/must enabledness.

use std::fmt;
use thiserror::Error;

/// Index of a state variable.
pub type VarId = usize;

/// Evaluation error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("variable v{0} out of range")]
    UnknownVar(VarId),

    #[error("type error: expected {expected}")]
    Type { expected: &'static str },

    #[error("division by zero")]
    DivByZero,
}

/// A value: integer or boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    Int(i64),
    Bool(bool),
}

impl Value {
    fn as_int(self) -> Result<i64, EvalError> {
        match self {
            Value::Int(n) => Ok(n),
            Value::Bool(_) => Err(EvalError::Type { expected: "Int" }),
        }
    }

    fn as_bool(self) -> Result<bool, EvalError> {
        match self {
            Value::Bool(b) => Ok(b),
            Value::Int(_) => Err(EvalError::Type { expected: "Bool" }),
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
}

/// An expression over integer state variables.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Bool(bool),
    Var(VarId),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn var(v: VarId) -> Expr {
        Expr::Var(v)
    }

    pub fn int(n: i64) -> Expr {
        Expr::Int(n)
    }

    pub fn not(e: Expr) -> Expr {
        Expr::Unary(UnOp::Not, Box::new(e))
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn eq(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Eq, lhs, rhs)
    }

    pub fn lt(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Lt, lhs, rhs)
    }

    pub fn add(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::Add, lhs, rhs)
    }

    pub fn and(lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(BinOp::And, lhs, rhs)
    }

    /// Evaluate over a total valuation.
    pub fn eval(&self, v: &Valuation) -> Result<Value, EvalError> {
        match self {
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Var(x) => v.get(*x).map(Value::Int).ok_or(EvalError::UnknownVar(*x)),
            Expr::Unary(op, e) => {
                let val = e.eval(v)?;
                apply_unary(*op, val)
            }
            Expr::Binary(op, lhs, rhs) => {
                // Short-circuit the boolean connectives.
                match op {
                    BinOp::And => {
                        if !lhs.eval(v)?.as_bool()? {
                            return Ok(Value::Bool(false));
                        }
                        Ok(Value::Bool(rhs.eval(v)?.as_bool()?))
                    }
                    BinOp::Or => {
                        if lhs.eval(v)?.as_bool()? {
                            return Ok(Value::Bool(true));
                        }
                        Ok(Value::Bool(rhs.eval(v)?.as_bool()?))
                    }
                    _ => apply_binary(*op, lhs.eval(v)?, rhs.eval(v)?),
                }
            }
        }
    }

    /// Evaluate a boolean expression over a total valuation.
    pub fn eval_bool(&self, v: &Valuation) -> Result<bool, EvalError> {
        self.eval(v)?.as_bool()
    }

    /// Three-valued evaluation over a partial valuation: `None` means the
    /// value is not determined by the assigned variables.
    pub fn eval_partial(&self, v: &PartialValuation) -> Result<Option<Value>, EvalError> {
        match self {
            Expr::Int(n) => Ok(Some(Value::Int(*n))),
            Expr::Bool(b) => Ok(Some(Value::Bool(*b))),
            Expr::Var(x) => Ok(v.get(*x).map(Value::Int)),
            Expr::Unary(op, e) => match e.eval_partial(v)? {
                Some(val) => apply_unary(*op, val).map(Some),
                None => Ok(None),
            },
            Expr::Binary(op, lhs, rhs) => {
                let l = lhs.eval_partial(v)?;
                let r = rhs.eval_partial(v)?;
                match op {
                    // Kleene logic: a determined dominating operand decides.
                    BinOp::And => Ok(kleene_and(try_bool(l)?, try_bool(r)?).map(Value::Bool)),
                    BinOp::Or => Ok(kleene_and(
                        try_bool(l)?.map(|b| !b),
                        try_bool(r)?.map(|b| !b),
                    )
                    .map(|b| Value::Bool(!b))),
                    _ => match (l, r) {
                        (Some(l), Some(r)) => apply_binary(*op, l, r).map(Some),
                        _ => Ok(None),
                    },
                }
            }
        }
    }

    /// Collect the variables read by this expression into `out`.
    pub fn collect_reads(&self, out: &mut Vec<VarId>) {
        match self {
            Expr::Int(_) | Expr::Bool(_) => {}
            Expr::Var(x) => {
                if !out.contains(x) {
                    out.push(*x);
                }
            }
            Expr::Unary(_, e) => e.collect_reads(out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_reads(out);
                rhs.collect_reads(out);
            }
        }
    }

    /// The set of variables read by this expression.
    pub fn reads(&self) -> Vec<VarId> {
        let mut out = Vec::new();
        self.collect_reads(&mut out);
        out
    }
}

fn try_bool(v: Option<Value>) -> Result<Option<bool>, EvalError> {
    v.map(Value::as_bool).transpose()
}

fn kleene_and(l: Option<bool>, r: Option<bool>) -> Option<bool> {
    match (l, r) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn apply_unary(op: UnOp, val: Value) -> Result<Value, EvalError> {
    match op {
        UnOp::Not => Ok(Value::Bool(!val.as_bool()?)),
        UnOp::Neg => Ok(Value::Int(-val.as_int()?)),
    }
}

fn apply_binary(op: BinOp, l: Value, r: Value) -> Result<Value, EvalError> {
    let v = match op {
        BinOp::Add => Value::Int(l.as_int()?.wrapping_add(r.as_int()?)),
        BinOp::Sub => Value::Int(l.as_int()?.wrapping_sub(r.as_int()?)),
        BinOp::Mul => Value::Int(l.as_int()?.wrapping_mul(r.as_int()?)),
        BinOp::Div => {
            let d = r.as_int()?;
            if d == 0 {
                return Err(EvalError::DivByZero);
            }
            Value::Int(l.as_int()? / d)
        }
        BinOp::And => Value::Bool(l.as_bool()? && r.as_bool()?),
        BinOp::Or => Value::Bool(l.as_bool()? || r.as_bool()?),
        BinOp::Eq => Value::Bool(l == r),
        BinOp::Ne => Value::Bool(l != r),
        BinOp::Lt => Value::Bool(l.as_int()? < r.as_int()?),
        BinOp::Le => Value::Bool(l.as_int()? <= r.as_int()?),
        BinOp::Gt => Value::Bool(l.as_int()? > r.as_int()?),
        BinOp::Ge => Value::Bool(l.as_int()? >= r.as_int()?),
    };
    Ok(v)
}

/// An update statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign(VarId, Expr),
    Skip,
}

impl Stmt {
    /// Apply to a total valuation in place.
    pub fn apply(&self, v: &mut Valuation) -> Result<(), EvalError> {
        match self {
            Stmt::Assign(x, e) => {
                let val = e.eval(v)?.as_int()?;
                v.set(*x, val)
            }
            Stmt::Skip => Ok(()),
        }
    }

    /// Apply to a partial valuation in place; an assignment whose right-hand
    /// side is undetermined leaves the target variable unassigned.
    pub fn apply_partial(&self, v: &mut PartialValuation) -> Result<(), EvalError> {
        match self {
            Stmt::Assign(x, e) => {
                match e.eval_partial(v)? {
                    Some(Value::Int(n)) => v.assign(*x, n),
                    Some(Value::Bool(_)) => return Err(EvalError::Type { expected: "Int" }),
                    None => v.unassign(*x),
                }
                Ok(())
            }
            Stmt::Skip => Ok(()),
        }
    }

    /// The variable written, if any.
    pub fn writes(&self) -> Option<VarId> {
        match self {
            Stmt::Assign(x, _) => Some(*x),
            Stmt::Skip => None,
        }
    }
}

/// A total assignment of integer values to the state variables.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Valuation {
    vars: Vec<i64>,
}

impl Valuation {
    pub fn new(vars: Vec<i64>) -> Self {
        Valuation { vars }
    }

    pub fn zeroed(num_vars: usize) -> Self {
        Valuation { vars: vec![0; num_vars] }
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn get(&self, x: VarId) -> Option<i64> {
        self.vars.get(x).copied()
    }

    pub fn set(&mut self, x: VarId, val: i64) -> Result<(), EvalError> {
        match self.vars.get_mut(x) {
            Some(slot) => {
                *slot = val;
                Ok(())
            }
            None => Err(EvalError::UnknownVar(x)),
        }
    }
}

impl fmt::Debug for Valuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.vars.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "v{i}={v}")?;
        }
        write!(f, "]")
    }
}

/// A partial assignment: the abstract label of the explicit lazy domain.
/// Fewer assigned variables means a less precise label.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PartialValuation {
    vars: Vec<Option<i64>>,
}

impl PartialValuation {
    /// The no-information label.
    pub fn top(num_vars: usize) -> Self {
        PartialValuation { vars: vec![None; num_vars] }
    }

    /// A fully precise label equal to the given valuation.
    pub fn exact(v: &Valuation) -> Self {
        PartialValuation {
            vars: (0..v.num_vars()).map(|x| v.get(x)).collect(),
        }
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    pub fn get(&self, x: VarId) -> Option<i64> {
        self.vars.get(x).copied().flatten()
    }

    pub fn assign(&mut self, x: VarId, val: i64) {
        if x < self.vars.len() {
            self.vars[x] = Some(val);
        }
    }

    pub fn unassign(&mut self, x: VarId) {
        if x < self.vars.len() {
            self.vars[x] = None;
        }
    }

    /// Variables this label constrains.
    pub fn assigned(&self) -> impl Iterator<Item = VarId> + '_ {
        self.vars
            .iter()
            .enumerate()
            .filter_map(|(x, v)| v.map(|_| x))
    }

    /// True iff `concrete` agrees with every assigned variable.
    pub fn contains(&self, concrete: &Valuation) -> bool {
        self.vars
            .iter()
            .enumerate()
            .all(|(x, v)| v.map_or(true, |n| concrete.get(x) == Some(n)))
    }

    /// Partial-order check: `self` is at least as precise as `other` iff it
    /// assigns every variable `other` assigns, with the same value.
    pub fn is_leq(&self, other: &PartialValuation) -> bool {
        other
            .vars
            .iter()
            .enumerate()
            .all(|(x, v)| v.map_or(true, |n| self.get(x) == Some(n)))
    }

    /// Greatest lower bound by union of assignments. The caller guarantees
    /// the two labels agree on shared variables (both contain a common
    /// concrete witness).
    pub fn meet(&self, other: &PartialValuation) -> PartialValuation {
        let mut out = self.clone();
        for (x, v) in other.vars.iter().enumerate() {
            if let Some(n) = v {
                out.assign(x, *n);
            }
        }
        out
    }
}

impl fmt::Debug for PartialValuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        let mut first = true;
        for (x, v) in self.vars.iter().enumerate() {
            if let Some(n) = v {
                if !first {
                    write!(f, " ")?;
                }
                write!(f, "v{x}={n}")?;
                first = false;
            }
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_arith_and_compare() {
        let v = Valuation::new(vec![3, 4]);
        let e = Expr::lt(Expr::add(Expr::var(0), Expr::int(1)), Expr::var(1));
        assert_eq!(e.eval(&v), Ok(Value::Bool(false)));
        let e = Expr::lt(Expr::var(0), Expr::var(1));
        assert_eq!(e.eval_bool(&v), Ok(true));
    }

    #[test]
    fn test_eval_unknown_var() {
        let v = Valuation::new(vec![0]);
        assert_eq!(Expr::var(3).eval(&v), Err(EvalError::UnknownVar(3)));
    }

    #[test]
    fn test_partial_three_valued() {
        let mut p = PartialValuation::top(2);
        let guard = Expr::lt(Expr::var(0), Expr::int(2));
        assert_eq!(guard.eval_partial(&p), Ok(None));
        p.assign(0, 1);
        assert_eq!(guard.eval_partial(&p), Ok(Some(Value::Bool(true))));
        p.assign(0, 5);
        assert_eq!(guard.eval_partial(&p), Ok(Some(Value::Bool(false))));
    }

    #[test]
    fn test_kleene_short_circuit() {
        // false AND unknown is false even though the right side is unknown
        let p = PartialValuation::top(1);
        let e = Expr::and(Expr::Bool(false), Expr::lt(Expr::var(0), Expr::int(1)));
        assert_eq!(e.eval_partial(&p), Ok(Some(Value::Bool(false))));
        // true OR unknown is true
        let e = Expr::binary(
            BinOp::Or,
            Expr::Bool(true),
            Expr::lt(Expr::var(0), Expr::int(1)),
        );
        assert_eq!(e.eval_partial(&p), Ok(Some(Value::Bool(true))));
    }

    #[test]
    fn test_stmt_apply() {
        let mut v = Valuation::new(vec![1, 0]);
        Stmt::Assign(1, Expr::add(Expr::var(0), Expr::int(41)))
            .apply(&mut v)
            .unwrap();
        assert_eq!(v.get(1), Some(42));
        Stmt::Skip.apply(&mut v).unwrap();
        assert_eq!(v.get(0), Some(1));
    }

    #[test]
    fn test_partial_apply_loses_unknown_rhs() {
        let mut p = PartialValuation::top(2);
        p.assign(1, 9);
        // v1 := v0 + 1 with v0 unknown unassigns v1
        Stmt::Assign(1, Expr::add(Expr::var(0), Expr::int(1)))
            .apply_partial(&mut p)
            .unwrap();
        assert_eq!(p.get(1), None);
    }

    #[test]
    fn test_containment_and_order() {
        let c = Valuation::new(vec![1, 2]);
        let mut l1 = PartialValuation::top(2);
        assert!(l1.contains(&c));
        l1.assign(0, 1);
        assert!(l1.contains(&c));
        let l2 = PartialValuation::exact(&c);
        assert!(l2.is_leq(&l1));
        assert!(!l1.is_leq(&l2));
        assert!(l2.contains(&c));
        let mut l3 = PartialValuation::top(2);
        l3.assign(0, 5);
        assert!(!l3.contains(&c));
    }

    #[test]
    fn test_meet_unions_assignments() {
        let mut a = PartialValuation::top(3);
        a.assign(0, 1);
        let mut b = PartialValuation::top(3);
        b.assign(2, 3);
        let m = a.meet(&b);
        assert_eq!(m.get(0), Some(1));
        assert_eq!(m.get(2), Some(3));
        assert_eq!(m.get(1), None);
    }

    #[test]
    fn test_reads() {
        let e = Expr::and(
            Expr::lt(Expr::var(2), Expr::int(1)),
            Expr::eq(Expr::var(0), Expr::var(2)),
        );
        let mut reads = e.reads();
        reads.sort_unstable();
        assert_eq!(reads, vec![0, 2]);
    }
}
