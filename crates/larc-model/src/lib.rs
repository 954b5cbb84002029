//! Model primitives for LARC: probability distributions, the guard/statement
//! mini-language, guarded probabilistic commands, stochastic game views, and
//! reward functions with bound initializers.

pub mod command;
pub mod dist;
pub mod expr;
pub mod game;
pub mod reward;

pub use command::{Action, CommandProvider, ProbabilisticCommand, StaticCommands};
pub use dist::{DistError, Distribution};
pub use expr::{BinOp, EvalError, Expr, PartialValuation, Stmt, UnOp, Valuation, Value, VarId};
pub use game::{ExplicitGame, ExplicitGameBuilder, Goal, GoalMap, NodeId, Player, StochasticGame};
pub use reward::{Bounds, RewardFunction, TargetReward};
