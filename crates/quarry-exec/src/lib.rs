//! # quarry-exec
//!
//! Execution runtime for Quarry: turns phases of a physical plan into
//! streaming, resumable and cancellable data flow.
//!
//! - **Receivers**: the push-based [`RowReceiver`](receiver::RowReceiver)
//!   protocol with pause/resume/stop backpressure, result receivers and the
//!   driver bridging [`BatchIterator`](quarry_data::BatchIterator)s into it
//! - **Contexts**: the [`ExecutionSubContext`](context::ExecutionSubContext)
//!   lifecycle, per-job [`JobExecutionContext`](context::JobExecutionContext)
//!   and the process-wide [`JobContextService`](context::JobContextService)
//! - **Shards**: [`SharedShardContexts`](shard::SharedShardContexts), one
//!   reader per shard per job
//! - **Fan-in**: combinators collapsing N partial results into one
//! - **Phases**: collect, merge and join phases and the
//!   [`ContextPreparer`](phase::ContextPreparer) wiring them together
//!
//! ## Lifecycle
//!
//! ```text
//! ContextPreparer::prepare ──▶ JobExecutionContext ──▶ JobContextService
//!                                  │ prepare / start
//!                                  ▼
//!                        ExecutionSubContext (one per phase)
//!                                  │ drive()
//!                                  ▼
//!                     BatchIterator ──▶ RowReceiver ──▶ ResultReceiver
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod completion;
pub mod context;
pub mod fanin;
pub mod phase;
pub mod receiver;
pub mod shard;

pub use completion::Completion;
pub use context::{ExecutionSubContext, JobContextService, JobExecutionContext};
pub use receiver::{ReceiverResult, RowReceiver};
pub use shard::SharedShardContexts;
