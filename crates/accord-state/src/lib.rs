//! Accord State Engine - Transactional section store
//!
//! This crate implements the section store:
//! - Dependency graph and topological commit order
//! - Section registry (adapter-backed and derived sections)
//! - Transactions with atomic, dependency-ordered commits
//! - Memoized derived recomputation
//! - Coalesced notifications under pluggable schedulers
//! - Debounced persistence
//! - Bounded re-entrant effects
//! - Bindings and diagnostics snapshots

pub mod binding;
pub mod conductor;
pub mod effect;
pub mod graph;
pub mod history;
pub mod persist;
pub mod scheduler;
pub mod section;

pub use binding::*;
pub use conductor::*;
pub use effect::*;
pub use graph::*;
pub use history::*;
pub use persist::*;
pub use scheduler::*;
pub use section::*;
