//! Lazy abstraction-refinement probabilistic model checker.
//!
//! The checker builds an abstract reachability graph (ARG) node by node:
//! each node pairs a concrete model state with an abstract label drawn from a
//! pluggable [`LazyDomain`]. New nodes are covered by existing ones where the
//! abstraction allows it, covers trigger label strengthening cascades, end
//! components are detected incrementally as covers close cycles, and a
//! BRTDP loop drives upper/lower reachability bounds together at the root.

pub mod arg;
pub mod checker;
pub mod domain;
pub mod explicit;
pub mod strategy;

pub use arg::{Arg, ArgEdge, ArgGame, ArgNode, EdgeId};
pub use checker::{CheckConfig, CheckError, CheckOutcome, CheckResult, LazyChecker};
pub use domain::{DomainError, LazyDomain, PathStep};
pub use explicit::ExplicitDomain;
pub use strategy::{StrategyKind, SuccessorStrategy};
