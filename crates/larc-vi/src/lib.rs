//! Value iteration for LARC: the single-step Bellman update, bounded value
//! iteration with end-component deflation, and the one-shot solvers used by
//! the fully-expanded checking mode.

pub mod bellman;
pub mod bvi;
pub mod solver;

pub use bellman::{bellman_step, BellmanConfig, BellmanResult};
pub use bvi::{almost_sure_bounds, BviResult, BviSolver, SolveError};
pub use solver::{MdpBviSolver, ViSolver};
