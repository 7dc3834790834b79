//! Pause, resume and stop between producers and receivers.

use std::sync::Arc;
use std::time::Duration;

use quarry_common::QuarryError;
use quarry_data::batch::BucketBatchIterator;
use quarry_data::{KillSwitch, OwnedRow, Value};
use quarry_exec::receiver::{
    drive, CollectingResultReceiver, CollectingRowReceiver, DriveOutcome, IterableRowEmitter,
    RowReceiver, RowReceiverToResultReceiver,
};
use quarry_test::utils::init_tracing;

fn owned(range: std::ops::Range<i64>) -> Vec<OwnedRow> {
    range.map(|v| OwnedRow::new(vec![Value::BigInt(v)])).collect()
}

fn values(range: std::ops::Range<i64>) -> Vec<Vec<Value>> {
    range.map(|v| vec![Value::BigInt(v)]).collect()
}

#[tokio::test]
async fn test_slow_consumer_over_async_producer() {
    init_tracing();
    let (mut iterator, feeder) = BucketBatchIterator::new(1);
    let producer = tokio::spawn(async move {
        for chunk in 0..5i64 {
            feeder.set_bucket(owned(chunk * 4..chunk * 4 + 4), chunk == 4);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    });

    let receiver = Arc::new(CollectingRowReceiver::with_pause_every(3));
    let consumer = {
        let receiver = Arc::clone(&receiver);
        tokio::spawn(async move {
            while !receiver.completion().is_done() {
                if !receiver.resume(false) {
                    tokio::task::yield_now().await;
                }
            }
        })
    };

    let outcome = drive(&mut iterator, receiver.as_ref(), &KillSwitch::new())
        .await
        .unwrap();
    producer.await.unwrap();
    consumer.await.unwrap();

    assert_eq!(outcome, DriveOutcome::Finished);
    assert_eq!(receiver.rows(), values(0..20));
    assert!(receiver.batches_finished() >= 1);
    assert_eq!(receiver.duplicate_terminal_signals(), 0);
}

#[test]
fn test_emitter_pages_through_result_receiver() {
    let result = Arc::new(CollectingResultReceiver::new());
    let adapter = Arc::new(RowReceiverToResultReceiver::new(result.clone(), 4));
    IterableRowEmitter::new(owned(0..10), adapter.clone()).run();

    assert_eq!(result.rows(), values(0..4));
    assert!(adapter.is_paused());
    while adapter.resume_if_paused() {}

    assert_eq!(result.rows(), values(0..10));
    assert_eq!(result.pages(), 2);
    assert_eq!(result.interrupted(), Some(false));
    assert_eq!(adapter.completion().try_get(), Some(Ok(())));
}

#[test]
fn test_interrupt_stops_paused_emitter() {
    let result = Arc::new(CollectingResultReceiver::new());
    let adapter = Arc::new(RowReceiverToResultReceiver::new(result.clone(), 4));
    IterableRowEmitter::new(owned(0..10), adapter.clone()).run();

    assert!(adapter.interrupt_if_resumable());
    assert!(!adapter.interrupt_if_resumable());
    assert_eq!(result.rows(), values(0..4));
    assert_eq!(result.interrupted(), Some(true));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_resume_on_runtime() {
    let receiver = Arc::new(CollectingRowReceiver::with_pause_every(10));
    let emitter_receiver: Arc<dyn RowReceiver> = receiver.clone();
    IterableRowEmitter::new(owned(0..100), emitter_receiver).run();

    while !receiver.completion().is_done() {
        if !receiver.resume(true) {
            tokio::task::yield_now().await;
        }
    }
    assert_eq!(receiver.result().await.unwrap(), values(0..100));
    assert_eq!(receiver.duplicate_terminal_signals(), 0);
}

#[tokio::test]
async fn test_kill_fails_pending_load() {
    let (mut iterator, _feeder) = BucketBatchIterator::new(1);
    let receiver = CollectingRowReceiver::new();
    let kill_switch = KillSwitch::new();
    let killer = {
        let kill_switch = kill_switch.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            kill_switch.kill(QuarryError::JobKilled);
        })
    };

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        drive(&mut iterator, &receiver, &kill_switch),
    )
    .await
    .expect("kill must end the pending load");
    killer.await.unwrap();

    assert_eq!(outcome, Err(QuarryError::JobKilled));
    assert_eq!(receiver.completion().try_get(), Some(Err(QuarryError::JobKilled)));
    assert!(receiver.rows().is_empty());
}
