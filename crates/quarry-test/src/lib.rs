//! # quarry-test
//!
//! Integration tests for the Quarry execution core.
//!
//! The tests under `tests/` exercise several crates together:
//! - Equivalence of the join strategies on random inputs
//! - Job lifecycle through the registry and the context preparer
//! - Fan-in of partial results from several nodes
//! - Backpressure between producers and paged result receivers

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Test utilities and helpers
pub mod utils;
