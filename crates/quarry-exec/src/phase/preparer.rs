//! Creates the sub-contexts of one job on this node.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use quarry_common::config::ExecutionConfig;
use quarry_common::{ContextId, JobId, QuarryError, QuarryResult};
use quarry_data::batch::{
    BucketBatchIterator, BucketFeeder, CompositeBatchIterator, FilteringBatchIterator,
    LimitingBatchIterator, ProjectingBatchIterator,
};
use quarry_data::breaker::{BreakingRowAccounting, CircuitBreaker};
use quarry_data::join::{join, JoinStrategy};
use quarry_data::BoxedBatchIterator;

use super::hooks::PhaseHooks;
use super::{Downstream, ExecutionPhase, NodeOperation, PhaseInput};
use crate::context::{ExecutionSubContext, JobExecutionContextBuilder};
use crate::receiver::{
    BucketingRowReceiver, ResultReceiver, RowReceiver, RowReceiverToResultReceiver,
};
use crate::shard::{ShardReaderProvider, SharedShardContexts};

/// An input of a merge or join phase and how many upstreams feed it.
struct InputSlot {
    feeder: BucketFeeder,
    expected: usize,
    connected: usize,
}

/// Iterators of a merge or join phase, created before their upstreams are
/// wired to them.
enum PhaseIterators {
    Merge(BucketBatchIterator),
    Join {
        left: BucketBatchIterator,
        right: BucketBatchIterator,
    },
}

/// Turns the [`NodeOperation`]s of a job into a
/// [`JobExecutionContextBuilder`].
///
/// Every job gets its own [`SharedShardContexts`] and its own circuit
/// breaker shared by all of its join phases. Sub-contexts are registered
/// upstream first, so the job starts the phases consuming rows before the
/// phases producing them.
pub struct ContextPreparer {
    config: ExecutionConfig,
    provider: Arc<dyn ShardReaderProvider>,
}

impl ContextPreparer {
    /// Creates a preparer reading shards through `provider`.
    pub fn new(config: ExecutionConfig, provider: Arc<dyn ShardReaderProvider>) -> Self {
        Self { config, provider }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Wraps `result` into an adapter pausing after every configured page.
    pub fn result_receiver(
        &self,
        result: Arc<dyn ResultReceiver>,
    ) -> Arc<RowReceiverToResultReceiver> {
        Arc::new(RowReceiverToResultReceiver::new(
            result,
            self.config.receiver.page_size,
        ))
    }

    /// Creates one sub-context per operation.
    ///
    /// Fails on duplicate phase ids, on a downstream naming an unknown phase
    /// or input, on upstream counts not matching what a merge or join
    /// expects, and on cycles.
    pub fn prepare(
        &self,
        job_id: JobId,
        operations: Vec<NodeOperation>,
    ) -> QuarryResult<JobExecutionContextBuilder> {
        let mut ids = HashSet::new();
        for op in &operations {
            if !ids.insert(op.id) {
                return Err(QuarryError::DuplicateSubContext {
                    job_id,
                    context_id: op.id,
                });
            }
        }
        let depths = depths(&operations)?;

        let mut slots: HashMap<(ContextId, PhaseInput), InputSlot> = HashMap::new();
        let mut iterators: HashMap<ContextId, PhaseIterators> = HashMap::new();
        for op in &operations {
            match &op.phase {
                ExecutionPhase::Collect { .. } => {}
                ExecutionPhase::Merge { num_upstreams } => {
                    let (iterator, feeder) = BucketBatchIterator::new(*num_upstreams);
                    slots.insert((op.id, PhaseInput::Single), slot(feeder, *num_upstreams));
                    iterators.insert(op.id, PhaseIterators::Merge(iterator));
                }
                ExecutionPhase::Join {
                    left_upstreams,
                    right_upstreams,
                    ..
                } => {
                    let (left, left_feeder) = BucketBatchIterator::new(*left_upstreams);
                    let (right, right_feeder) = BucketBatchIterator::new(*right_upstreams);
                    slots.insert((op.id, PhaseInput::Left), slot(left_feeder, *left_upstreams));
                    slots.insert(
                        (op.id, PhaseInput::Right),
                        slot(right_feeder, *right_upstreams),
                    );
                    iterators.insert(op.id, PhaseIterators::Join { left, right });
                }
            }
        }

        let mut receivers = Vec::with_capacity(operations.len());
        for op in &operations {
            let receiver: Arc<dyn RowReceiver> = match &op.downstream {
                Downstream::Result(adapter) => Arc::clone(adapter) as Arc<dyn RowReceiver>,
                Downstream::Receiver(receiver) => Arc::clone(receiver),
                Downstream::Phase { id, input } => {
                    let slot = slots.get_mut(&(*id, *input)).ok_or_else(|| {
                        QuarryError::invalid_argument(format!(
                            "phase {} feeds unknown input {} of phase {}",
                            op.id, input, id
                        ))
                    })?;
                    slot.connected += 1;
                    Arc::new(BucketingRowReceiver::new(
                        slot.feeder.clone(),
                        self.config.receiver.bucket_size,
                    ))
                }
            };
            receivers.push(receiver);
        }
        for ((id, input), slot) in &slots {
            if slot.connected != slot.expected {
                return Err(QuarryError::invalid_argument(format!(
                    "input {} of phase {} expects {} upstreams, got {}",
                    input, id, slot.expected, slot.connected
                )));
            }
        }

        let shard_contexts = Arc::new(SharedShardContexts::new(Arc::clone(&self.provider)));
        let breaker = Arc::new(CircuitBreaker::from_config(&self.config.breaker));
        let mut contexts = Vec::with_capacity(operations.len());
        for ((op, receiver), depth) in operations.into_iter().zip(receivers).zip(depths) {
            let name = op.phase.kind();
            let hooks = match op.phase {
                ExecutionPhase::Collect {
                    shards,
                    filter,
                    projection,
                    limit,
                } => {
                    let shard_contexts = Arc::clone(&shard_contexts);
                    PhaseHooks::new(
                        name,
                        move || {
                            let sources = shards
                                .iter()
                                .map(|shard| shard_contexts.get_or_create_context(shard).scan())
                                .collect::<QuarryResult<Vec<_>>>()?;
                            let mut iterator: BoxedBatchIterator =
                                Box::new(CompositeBatchIterator::new(sources));
                            if let Some(filter) = filter {
                                iterator = Box::new(FilteringBatchIterator::new(iterator, filter));
                            }
                            if let Some(columns) = projection {
                                iterator = Box::new(ProjectingBatchIterator::new(iterator, columns));
                            }
                            if let Some(limit) = limit {
                                iterator = Box::new(LimitingBatchIterator::new(iterator, limit));
                            }
                            Ok(iterator)
                        },
                        receiver,
                    )
                }
                ExecutionPhase::Merge { .. } => match iterators.remove(&op.id) {
                    Some(PhaseIterators::Merge(iterator)) => PhaseHooks::new(
                        name,
                        move || Ok(Box::new(iterator) as BoxedBatchIterator),
                        receiver,
                    ),
                    _ => return Err(missing_iterators(op.id)),
                },
                ExecutionPhase::Join {
                    predicate,
                    strategy,
                    ..
                } => match iterators.remove(&op.id) {
                    Some(PhaseIterators::Join { left, right }) => {
                        let strategy =
                            strategy.unwrap_or_else(|| JoinStrategy::from_config(&self.config.join));
                        let accounting =
                            BreakingRowAccounting::new(Arc::clone(&breaker), format!("join-{}", op.id));
                        tracing::debug!("job {} joins in phase {} with {:?}", job_id, op.id, strategy);
                        PhaseHooks::new(
                            name,
                            move || {
                                Ok(join(
                                    Box::new(left),
                                    Box::new(right),
                                    predicate,
                                    strategy,
                                    Box::new(accounting),
                                ))
                            },
                            receiver,
                        )
                        .with_breaker(Arc::clone(&breaker))
                    }
                    _ => return Err(missing_iterators(op.id)),
                },
            };
            contexts.push((depth, ExecutionSubContext::new(op.id, Box::new(hooks))));
        }

        // upstream phases first; stable, so ties keep the caller's order
        contexts.sort_by(|a, b| b.0.cmp(&a.0));
        let builder = contexts.into_iter().fold(
            JobExecutionContextBuilder::new(job_id, self.config.node_id),
            |builder, (_, context)| builder.add_sub_context(context),
        );
        tracing::debug!(
            "prepared {} sub-contexts for job {}",
            builder.num_sub_contexts(),
            job_id
        );
        Ok(builder)
    }
}

impl fmt::Debug for ContextPreparer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextPreparer")
            .field("node_id", &self.config.node_id)
            .finish()
    }
}

fn slot(feeder: BucketFeeder, expected: usize) -> InputSlot {
    InputSlot {
        feeder,
        expected,
        connected: 0,
    }
}

fn missing_iterators(id: ContextId) -> QuarryError {
    QuarryError::internal(format!("no input iterators created for phase {}", id))
}

/// Number of phases between each operation and the result receiver.
fn depths(operations: &[NodeOperation]) -> QuarryResult<Vec<usize>> {
    let downstream_of: HashMap<ContextId, &Downstream> = operations
        .iter()
        .map(|op| (op.id, &op.downstream))
        .collect();
    operations
        .iter()
        .map(|op| {
            let mut depth = 0;
            let mut downstream = &op.downstream;
            while let Downstream::Phase { id, .. } = downstream {
                depth += 1;
                if depth > operations.len() {
                    return Err(QuarryError::invalid_argument(format!(
                        "phase {} is part of a cycle",
                        op.id
                    )));
                }
                match downstream_of.get(id) {
                    Some(next) => downstream = next,
                    // unknown ids are rejected while wiring inputs
                    None => break,
                }
            }
            Ok(depth)
        })
        .collect()
}
