//! Quarry Performance Benchmarks
//!
//! This crate contains benchmarks for the execution core:
//! - Join strategies (nested loop, block nested loop, hash, sorted merge)
//!
//! Run benchmarks with:
//! ```bash
//! cargo bench -p quarry-bench
//! ```

pub mod utils;
