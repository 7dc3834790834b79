//! Drives a batch iterator into a row receiver.

use tokio::sync::oneshot;

use quarry_common::{QuarryError, QuarryResult};
use quarry_data::{BatchIterator, KillSwitch};

use super::{ReceiverResult, ResumeHandle, RowReceiver};

/// How a [`drive`] call ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    /// Every row was delivered.
    Finished,
    /// The receiver answered [`ReceiverResult::Stop`], or dropped the resume
    /// handle of a pause.
    Stopped,
}

/// Pulls every row out of `iterator` and pushes it into `receiver`.
///
/// - A pause suspends the task until the receiver resumes it.
/// - `batch_finished` is signalled before every batch load.
/// - A kill through `kill_switch` fails an outstanding load or pause right
///   away and is checked before every row.
///
/// The iterator is closed on success and killed on failure; the receiver
/// gets exactly one terminal signal either way.
pub async fn drive<B>(
    iterator: &mut B,
    receiver: &dyn RowReceiver,
    kill_switch: &KillSwitch,
) -> QuarryResult<DriveOutcome>
where
    B: BatchIterator + ?Sized,
{
    match pump(iterator, receiver, kill_switch).await {
        Ok(outcome) => {
            iterator.close();
            receiver.all_finished(outcome == DriveOutcome::Stopped);
            Ok(outcome)
        }
        Err(Failure::Killed(cause)) => {
            tracing::debug!("drive killed: {}", cause);
            iterator.kill(cause.clone());
            receiver.kill(cause.clone());
            Err(cause)
        }
        Err(Failure::Failed(cause)) => {
            tracing::debug!("drive failed: {}", cause);
            iterator.kill(cause.clone());
            receiver.fail(cause.clone());
            Err(cause)
        }
    }
}

enum Failure {
    Killed(QuarryError),
    Failed(QuarryError),
}

async fn pump<B>(
    iterator: &mut B,
    receiver: &dyn RowReceiver,
    kill_switch: &KillSwitch,
) -> Result<DriveOutcome, Failure>
where
    B: BatchIterator + ?Sized,
{
    loop {
        if let Some(cause) = kill_switch.cause() {
            return Err(Failure::Killed(cause));
        }
        if !iterator.move_next().map_err(Failure::Failed)? {
            if iterator.all_loaded() {
                return Ok(DriveOutcome::Finished);
            }
            receiver.batch_finished();
            let load = iterator.load_next_batch();
            tokio::select! {
                loaded = load => loaded.map_err(Failure::Failed)?,
                cause = kill_switch.killed() => return Err(Failure::Killed(cause)),
            }
            continue;
        }

        let signal = {
            let row = iterator.current_element().map_err(Failure::Failed)?;
            receiver.set_next_row(row)
        };
        match signal {
            ReceiverResult::Continue => {}
            ReceiverResult::Stop => return Ok(DriveOutcome::Stopped),
            ReceiverResult::Pause => {
                let (tx, rx) = oneshot::channel();
                receiver.pause_processed(ResumeHandle::new(move |_| {
                    let _ = tx.send(());
                }));
                tokio::select! {
                    resumed = rx => {
                        if resumed.is_err() {
                            tracing::debug!("resume handle dropped, stopping");
                            return Ok(DriveOutcome::Stopped);
                        }
                    }
                    cause = kill_switch.killed() => return Err(Failure::Killed(cause)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::CollectingRowReceiver;
    use quarry_data::batch::BucketBatchIterator;
    use quarry_data::testing::{range, rows_of, BatchSimulatingIterator};
    use quarry_data::OwnedRow;
    use quarry_data::Value;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_drive_delivers_all_rows_across_batches() {
        let mut it = BatchSimulatingIterator::new(range(0, 5), 2);
        let receiver = CollectingRowReceiver::new();
        let outcome = drive(&mut it, &receiver, &KillSwitch::new()).await.unwrap();

        assert_eq!(outcome, DriveOutcome::Finished);
        assert_eq!(receiver.rows(), rows_of(&[&[0], &[1], &[2], &[3], &[4]]));
        assert_eq!(receiver.batches_finished(), 2);
        assert_eq!(receiver.completion().try_get(), Some(Ok(())));
    }

    #[tokio::test]
    async fn test_pause_suspends_until_resumed() {
        let receiver = Arc::new(CollectingRowReceiver::with_pause_every(2));
        let task = {
            let receiver = Arc::clone(&receiver);
            tokio::spawn(async move {
                let mut it = range(0, 5);
                drive(&mut it, receiver.as_ref(), &KillSwitch::new()).await
            })
        };

        let mut expected_rows = 2;
        while !task.is_finished() {
            if receiver.is_paused() {
                assert_eq!(receiver.num_rows(), expected_rows);
                expected_rows += 2;
                receiver.resume(true);
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(task.await.unwrap().unwrap(), DriveOutcome::Finished);
        assert_eq!(receiver.rows(), rows_of(&[&[0], &[1], &[2], &[3], &[4]]));
    }

    #[tokio::test]
    async fn test_stop_closes_and_finishes_interrupted() {
        let mut it = range(0, 5);
        let receiver = CollectingRowReceiver::new();
        receiver.stop();
        let outcome = drive(&mut it, &receiver, &KillSwitch::new()).await.unwrap();
        assert_eq!(outcome, DriveOutcome::Stopped);
        assert_eq!(receiver.num_rows(), 0);
        assert!(it.move_next().is_err(), "iterator must be closed");
    }

    #[tokio::test]
    async fn test_kill_fails_pending_load() {
        let (mut it, feeder) = BucketBatchIterator::new(1);
        feeder.set_bucket(vec![OwnedRow::new(vec![Value::Int(1)])], false);
        let receiver = CollectingRowReceiver::new();
        let kill_switch = KillSwitch::new();

        let killer = kill_switch.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            killer.kill(QuarryError::JobKilled);
        });

        let err = drive(&mut it, &receiver, &kill_switch).await.unwrap_err();
        assert_eq!(err, QuarryError::JobKilled);
        assert_eq!(receiver.num_rows(), 1);
        assert_eq!(
            receiver.completion().try_get(),
            Some(Err(QuarryError::JobKilled))
        );
        assert_eq!(feeder.remaining_upstreams(), 1);
    }

    #[tokio::test]
    async fn test_iterator_failure_reaches_receiver() {
        let (mut it, feeder) = BucketBatchIterator::new(1);
        feeder.fail(QuarryError::internal("disk"));
        let receiver = CollectingRowReceiver::new();
        let err = drive(&mut it, &receiver, &KillSwitch::new()).await.unwrap_err();
        assert_eq!(err, QuarryError::internal("disk"));
        assert_eq!(receiver.completion().try_get(), Some(Err(err)));
    }
}
