//! Deterministic, pure logic for checkout reconciliation.
//!
//! Core modules must be free of I/O side effects. They operate on request
//! and plan values and return deterministic outputs suitable for tests.

pub mod alias;
pub mod classifier;
pub mod resolver;
pub mod retry;
pub mod types;
