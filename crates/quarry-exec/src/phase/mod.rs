//! Execution phases and their wiring into sub-contexts.
//!
//! A physical plan reaches a node as a list of [`NodeOperation`]s: one phase
//! plus where its rows go. The [`ContextPreparer`] turns them into the
//! sub-contexts of one [`JobExecutionContext`](crate::JobExecutionContext):
//!
//! ```text
//!   Collect(shard 0, shard 1)     Collect(shard 2)
//!            │ BucketingRowReceiver      │
//!            ▼ Left                      ▼ Right
//!        ┌─────────────────────────────────┐
//!        │ Join (BucketBatchIterator x 2)  │
//!        └─────────────────────────────────┘
//!                        │ RowReceiverToResultReceiver
//!                        ▼
//!                  ResultReceiver
//! ```

mod hooks;
mod preparer;

pub use hooks::PhaseHooks;
pub use preparer::ContextPreparer;

use std::fmt;
use std::sync::Arc;

use quarry_common::{ContextId, ShardId};
use quarry_data::join::{JoinPredicate, JoinStrategy};
use quarry_data::RowPredicate;

use crate::receiver::{RowReceiver, RowReceiverToResultReceiver};

/// Work of one phase on one node.
#[derive(Clone)]
pub enum ExecutionPhase {
    /// Reads shards of this node.
    Collect {
        /// Shards read, concatenated in order.
        shards: Vec<ShardId>,
        /// Rows not matching are dropped.
        filter: Option<RowPredicate>,
        /// Columns kept, applied after the filter.
        projection: Option<Vec<usize>>,
        /// Maximum number of rows emitted.
        limit: Option<usize>,
    },
    /// Concatenates the rows of upstream phases in arrival order.
    Merge {
        /// Number of upstream phases feeding the merge.
        num_upstreams: usize,
    },
    /// Joins the rows of two groups of upstream phases.
    Join {
        /// Upstream phases feeding the outer side.
        left_upstreams: usize,
        /// Upstream phases feeding the inner side.
        right_upstreams: usize,
        /// Join condition.
        predicate: JoinPredicate,
        /// Algorithm; the configured default if `None`.
        strategy: Option<JoinStrategy>,
    },
}

impl ExecutionPhase {
    /// Short name of the phase kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionPhase::Collect { .. } => "collect",
            ExecutionPhase::Merge { .. } => "merge",
            ExecutionPhase::Join { .. } => "join",
        }
    }
}

impl fmt::Debug for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionPhase::Collect {
                shards,
                filter,
                projection,
                limit,
            } => f
                .debug_struct("Collect")
                .field("shards", shards)
                .field("filter", &filter.is_some())
                .field("projection", projection)
                .field("limit", limit)
                .finish(),
            ExecutionPhase::Merge { num_upstreams } => f
                .debug_struct("Merge")
                .field("num_upstreams", num_upstreams)
                .finish(),
            ExecutionPhase::Join {
                left_upstreams,
                right_upstreams,
                predicate,
                strategy,
            } => f
                .debug_struct("Join")
                .field("left_upstreams", left_upstreams)
                .field("right_upstreams", right_upstreams)
                .field("predicate", predicate)
                .field("strategy", strategy)
                .finish(),
        }
    }
}

/// Input of a downstream phase an upstream phase feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseInput {
    /// The only input of a merge.
    Single,
    /// Outer side of a join.
    Left,
    /// Inner side of a join.
    Right,
}

impl fmt::Display for PhaseInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseInput::Single => write!(f, "single"),
            PhaseInput::Left => write!(f, "left"),
            PhaseInput::Right => write!(f, "right"),
        }
    }
}

/// Where a phase sends its rows.
#[derive(Clone)]
pub enum Downstream {
    /// The job's final consumer. The caller keeps the adapter to request
    /// further pages; see [`ContextPreparer::result_receiver`].
    Result(Arc<RowReceiverToResultReceiver>),
    /// Any row receiver.
    Receiver(Arc<dyn RowReceiver>),
    /// An input of another phase of the same job on this node.
    Phase {
        /// Id of the downstream phase.
        id: ContextId,
        /// Input of the downstream phase.
        input: PhaseInput,
    },
}

impl fmt::Debug for Downstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Downstream::Result(_) => f.write_str("Result"),
            Downstream::Receiver(_) => f.write_str("Receiver"),
            Downstream::Phase { id, input } => write!(f, "Phase({}, {})", id, input),
        }
    }
}

/// One phase of a job on this node together with its downstream.
#[derive(Debug, Clone)]
pub struct NodeOperation {
    /// Id of the phase, unique within the job; becomes the sub-context id.
    pub id: ContextId,
    /// The phase.
    pub phase: ExecutionPhase,
    /// Where its rows go.
    pub downstream: Downstream,
}

impl NodeOperation {
    /// Creates an operation.
    pub fn new(id: ContextId, phase: ExecutionPhase, downstream: Downstream) -> Self {
        Self {
            id,
            phase,
            downstream,
        }
    }

    /// Operation sending its rows to the result adapter `receiver`.
    pub fn to_result(
        id: ContextId,
        phase: ExecutionPhase,
        receiver: Arc<RowReceiverToResultReceiver>,
    ) -> Self {
        Self::new(id, phase, Downstream::Result(receiver))
    }

    /// Operation feeding `input` of phase `downstream_id`.
    pub fn to_phase(
        id: ContextId,
        phase: ExecutionPhase,
        downstream_id: ContextId,
        input: PhaseInput,
    ) -> Self {
        Self::new(
            id,
            phase,
            Downstream::Phase {
                id: downstream_id,
                input,
            },
        )
    }
}
