//! Type definitions for Quarry.
//!
//! Identifiers shared by the execution crates.

mod ids;

pub use ids::{ContextId, JobId, NodeId, ShardId};
