//! Guarded probabilistic commands and command providers.

use crate::dist::Distribution;
use crate::expr::{Expr, Stmt, Valuation};

/// A deterministic update: a statement sequence applied atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    /// Stable identity within the owning command.
    pub id: usize,
    pub stmts: Vec<Stmt>,
}

impl Action {
    pub fn new(id: usize, stmts: Vec<Stmt>) -> Self {
        Action { id, stmts }
    }

    pub fn skip(id: usize) -> Self {
        Action { id, stmts: vec![Stmt::Skip] }
    }

    /// Variables written by the statement sequence.
    pub fn writes(&self) -> Vec<usize> {
        let mut out = Vec::new();
        for stmt in &self.stmts {
            if let Some(x) = stmt.writes() {
                if !out.contains(&x) {
                    out.push(x);
                }
            }
        }
        out
    }
}

/// A guard plus a finite distribution over update actions: one atomic
/// nondeterministic-then-probabilistic transition of the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilisticCommand {
    /// Stable identity within the provider.
    pub id: usize,
    pub guard: Expr,
    pub action: Distribution<Action>,
}

impl ProbabilisticCommand {
    pub fn new(id: usize, guard: Expr, action: Distribution<Action>) -> Self {
        ProbabilisticCommand { id, guard, action }
    }
}

/// Supplies the commands applicable at a concrete state. Guard evaluation is
/// the checker's job; providers may over-approximate.
pub trait CommandProvider {
    fn commands(&self, state: &Valuation) -> &[ProbabilisticCommand];
}

/// A fixed command list, returned for every state.
#[derive(Debug, Clone, Default)]
pub struct StaticCommands {
    commands: Vec<ProbabilisticCommand>,
}

impl StaticCommands {
    pub fn new(commands: Vec<ProbabilisticCommand>) -> Self {
        StaticCommands { commands }
    }

    /// A provider with no commands (e.g. no error condition).
    pub fn empty() -> Self {
        StaticCommands { commands: Vec::new() }
    }
}

impl CommandProvider for StaticCommands {
    fn commands(&self, _state: &Valuation) -> &[ProbabilisticCommand] {
        &self.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_writes() {
        let a = Action::new(
            0,
            vec![
                Stmt::Assign(1, Expr::int(0)),
                Stmt::Skip,
                Stmt::Assign(1, Expr::int(2)),
                Stmt::Assign(0, Expr::var(1)),
            ],
        );
        assert_eq!(a.writes(), vec![1, 0]);
    }

    #[test]
    fn test_static_provider() {
        let cmd = ProbabilisticCommand::new(
            0,
            Expr::Bool(true),
            Distribution::dirac(Action::skip(0)),
        );
        let provider = StaticCommands::new(vec![cmd]);
        let state = Valuation::zeroed(1);
        assert_eq!(provider.commands(&state).len(), 1);
        assert!(StaticCommands::empty().commands(&state).is_empty());
    }
}
