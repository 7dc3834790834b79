//! One job spread over several nodes, partial results fanned in.

use std::sync::Arc;

use parking_lot::Mutex;

use quarry_common::config::ExecutionConfig;
use quarry_common::{JobId, NodeId, QuarryError, ShardId};
use quarry_data::testing::sorted;
use quarry_data::Value;
use quarry_exec::completion::Completion;
use quarry_exec::fanin::{all_as_list, ActionListener, MultiActionListener, MultiBiConsumer};
use quarry_exec::phase::{ContextPreparer, NodeOperation};
use quarry_exec::receiver::{CollectingResultReceiver, ResultReceiver};
use quarry_exec::JobContextService;
use quarry_test::utils::{collect_phase, init_tracing, InMemoryShardProvider};

/// A node with its own registry, holding shards `("t", n)` for `n` in
/// `shards`, each with rows `[n * 100 + i]` for `i` in `0..5`.
struct Node {
    service: JobContextService,
    preparer: ContextPreparer,
}

impl Node {
    fn new(id: u32, shards: &[u32]) -> Self {
        let mut config = ExecutionConfig::for_testing();
        config.node_id = NodeId::new(id);
        config.receiver.page_size = 0;
        let provider = InMemoryShardProvider::new().with_batch_size(2);
        for &shard in shards {
            let rows = (0..5)
                .map(|i| vec![Value::BigInt(i64::from(shard) * 100 + i)])
                .collect();
            provider.add_shard(ShardId::new("t", shard), rows);
        }
        Self {
            service: JobContextService::new(&config.jobs),
            preparer: ContextPreparer::new(config, Arc::new(provider)),
        }
    }

    /// Starts a collect of `shards` for `job_id` and returns its receiver.
    fn collect(&self, job_id: JobId, shards: &[u32]) -> Arc<CollectingResultReceiver> {
        let result = Arc::new(CollectingResultReceiver::new());
        let ops = vec![NodeOperation::to_result(
            1,
            collect_phase("t", shards),
            self.preparer.result_receiver(result.clone()),
        )];
        let started = self
            .preparer
            .prepare(job_id, ops)
            .and_then(|builder| self.service.create_context(builder))
            .and_then(|job| {
                job.prepare()?;
                job.start()
            });
        if let Err(e) = started {
            tracing::debug!("collect on node failed to start: {}", e);
        }
        result
    }
}

#[tokio::test]
async fn test_fan_in_of_node_results() {
    init_tracing();
    let nodes = [Node::new(1, &[0, 1]), Node::new(2, &[2]), Node::new(3, &[3])];
    let job_id = JobId::new_random();
    let receivers = vec![
        nodes[0].collect(job_id, &[0, 1]),
        nodes[1].collect(job_id, &[2]),
        nodes[2].collect(job_id, &[3]),
    ];

    let partials = all_as_list(receivers.iter().map(|r| r.result()).collect())
        .await
        .unwrap();
    assert_eq!(partials.len(), 3);
    assert_eq!(partials[0].len(), 10);

    let merged: Vec<Vec<Value>> = partials.into_iter().flatten().collect();
    let expected: Vec<Vec<Value>> = [0i64, 1, 2, 3]
        .iter()
        .flat_map(|shard| (0..5).map(move |i| vec![Value::BigInt(shard * 100 + i)]))
        .collect();
    assert_eq!(sorted(merged), expected);
    for node in &nodes {
        assert_eq!(node.service.num_active_jobs(), 0);
    }
}

#[tokio::test]
async fn test_node_failure_reported_after_all_nodes() {
    let nodes = [Node::new(1, &[0]), Node::new(2, &[]), Node::new(3, &[3])];
    let job_id = JobId::new_random();
    let receivers = vec![
        nodes[0].collect(job_id, &[0]),
        // shard 1 lives nowhere
        nodes[1].collect(job_id, &[1]),
        nodes[2].collect(job_id, &[3]),
    ];

    let err = all_as_list(receivers.iter().map(|r| r.result()).collect())
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::ExecutionFailed { .. }));
    // the healthy nodes still ran to completion
    assert_eq!(receivers[0].result().await.unwrap().len(), 5);
    assert_eq!(receivers[2].result().await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_row_counts_folded_by_listener() {
    let nodes = [Node::new(1, &[0]), Node::new(2, &[1, 2])];
    let job_id = JobId::new_random();
    let total = Completion::<u64>::new();
    let listener = Arc::new(MultiActionListener::new(
        nodes.len(),
        0u64,
        |sum: &mut u64, rows: u64| *sum += rows,
        |sum| sum,
        ActionListener::from_completion(total.clone()),
    ));

    let receivers = vec![
        nodes[0].collect(job_id, &[0]),
        nodes[1].collect(job_id, &[1, 2]),
    ];
    for receiver in receivers {
        let listener = Arc::clone(&listener);
        receiver.completion().on_complete(move |result| match result {
            Ok(()) => listener.on_response(receiver.rows().len() as u64),
            Err(e) => listener.on_failure(e.clone()),
        });
    }

    assert_eq!(total.wait().await, Ok(15));
}

#[tokio::test]
async fn test_bi_consumer_keeps_successes_and_last_failure() {
    let nodes = [Node::new(1, &[0]), Node::new(2, &[]), Node::new(3, &[])];
    let job_id = JobId::new_random();
    let outcome = Completion::<(usize, Option<QuarryError>)>::new();
    let done = outcome.clone();
    let consumer = Arc::new(MultiBiConsumer::new(3, move |rows: Vec<usize>, failure| {
        done.succeed((rows.iter().sum(), failure));
    }));
    let seen = Arc::new(Mutex::new(Vec::new()));

    for (node, shard) in nodes.iter().zip([0u32, 7, 8]) {
        let receiver = node.collect(job_id, &[shard]);
        let consumer = Arc::clone(&consumer);
        let seen = Arc::clone(&seen);
        receiver.completion().on_complete(move |result| {
            seen.lock().push(shard);
            consumer.accept(result.clone().map(|()| receiver.rows().len()));
        });
    }

    let (rows, failure) = outcome.wait().await.unwrap();
    assert_eq!(rows, 5);
    assert!(matches!(failure, Some(QuarryError::ExecutionFailed { .. })));
    assert_eq!(seen.lock().len(), 3);
    assert_eq!(consumer.remaining(), 0);
}
