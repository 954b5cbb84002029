//! Graph analysis for LARC: strongly connected components, maximal end
//! components under dynamic action restriction, and qualitative (probability
//! 0/1) reachability sets.

pub mod mec;
pub mod reach;
pub mod scc;

pub use mec::{all_allowed, compute_mecs, compute_mecs_from, AllowedActions, Mec};
pub use reach::{almost_sure_max, cannot_reach};
pub use scc::compute_sccs;
