//! # quarry-common
//!
//! Common types, errors, and configuration for the Quarry execution core.
//!
//! This crate provides the foundational pieces shared by every Quarry crate:
//!
//! - **Types**: identifiers for jobs, nodes, shards and sub-contexts
//! - **Errors**: unified error handling with `QuarryError`
//! - **Config**: execution configuration (join strategy, breaker, jobs, paging)
//! - **Constants**: defaults and limits
//!
//! ## Example
//!
//! ```rust
//! use quarry_common::types::{JobId, ShardId};
//! use quarry_common::error::{QuarryError, QuarryResult};
//!
//! fn lookup(job_id: JobId, shard: ShardId) -> QuarryResult<()> {
//!     Err(QuarryError::JobContextMissing { job_id })
//! }
//!
//! assert!(lookup(JobId::new_random(), ShardId::new("orders", 0)).is_err());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use config::ExecutionConfig;
pub use error::{ErrorCode, QuarryError, QuarryResult};
pub use types::{ContextId, JobId, NodeId, ShardId};
