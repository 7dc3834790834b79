//! Execution contexts and the job registry.
//!
//! - [`ExecutionSubContext`]: lifecycle of one execution fragment, with the
//!   resource-specific parts supplied through [`SubContextHooks`]
//! - [`JobExecutionContext`]: the sub-contexts of one job on this node
//! - [`JobContextService`]: every running job, keyed by [`JobId`]
//! - [`BulkShardProcessorHooks`]: sub-context hooks for bulk processors
//!
//! [`JobId`]: quarry_common::JobId

mod bulk;
mod job;
mod service;
mod sub_context;

pub use bulk::{BulkShardProcessor, BulkShardProcessorHooks};
pub use job::{JobExecutionContext, JobExecutionContextBuilder};
pub use service::{JobContextService, JobServiceStats};
pub use sub_context::{CompletionState, ExecutionSubContext, SubContextHooks, SubContextState};
