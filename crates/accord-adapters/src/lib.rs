//! Accord Adapters - Concrete backing stores
//!
//! - Atom: in-memory value cell
//! - External store: closures over any get/set/subscribe store
//! - Memory storage: shared key-value persistence backend

pub mod atom;
pub mod external;
pub mod storage;

pub use atom::*;
pub use external::*;
pub use storage::*;
