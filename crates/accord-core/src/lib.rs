//! Accord Core - Fundamental types and primitives
//!
//! This crate defines the types shared by the section store and the
//! orchestrator:
//! - The error type and result alias
//! - Timestamps and injectable clocks
//! - The source adapter contract and subscription handles
//! - The explicit shallow-merge capability
//! - The persistence storage contract

pub mod adapter;
pub mod error;
pub mod merge;
pub mod storage;
pub mod time;

pub use adapter::*;
pub use error::*;
pub use merge::*;
pub use storage::*;
pub use time::*;

/// Dynamic section value
pub use serde_json::Value;
