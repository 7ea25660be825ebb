//! Accord Orchestra - Multi-source reconciliation
//!
//! An orchestrated adapter wraps several instruments (independent backing
//! sources of the same logical value) and exposes one resolved value:
//! - Instruments carry priority, freshness window and role
//! - A pure reconcile policy picks the authoritative instrument
//! - Optional optimistic instrument for unconfirmed local writes
//! - Write forwarding to one designated instrument

pub mod instrument;
pub mod orchestrator;
pub mod reconcile;

pub use instrument::*;
pub use orchestrator::*;
pub use reconcile::*;
