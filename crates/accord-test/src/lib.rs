//! Accord Test Harness - Scenario driving and randomized validation
//!
//! This crate provides:
//! - Tracing bootstrap for tests and benches
//! - Scenario harness over a conductor with a manual clock
//! - Seeded commit fuzzer checked against a shadow model
//! - Seeded reconcile fuzzer checked against a reference policy

pub mod commit_fuzzer;
pub mod harness;
pub mod reconcile_fuzzer;
pub mod trace;

pub use commit_fuzzer::*;
pub use harness::*;
pub use reconcile_fuzzer::*;
pub use trace::*;
