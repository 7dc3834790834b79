//! Receiver that materializes every row.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use quarry_common::{QuarryError, QuarryResult};
use quarry_data::{Row, Value};

use super::{complete_once, ReceiverResult, ResumeHandle, RowReceiver};
use crate::completion::Completion;

#[derive(Debug, Default)]
struct Collected {
    rows: Vec<Vec<Value>>,
    since_pause: usize,
    paused: Option<ResumeHandle>,
    batches: usize,
}

/// Collects rows in memory, optionally pausing the producer after every
/// `k` rows.
///
/// Terminal signals after the first are counted so tests can assert that a
/// producer never finishes twice.
#[derive(Debug)]
pub struct CollectingRowReceiver {
    collected: Mutex<Collected>,
    pause_every: Option<usize>,
    stopped: AtomicBool,
    duplicate_terminals: AtomicUsize,
    completion: Completion<()>,
}

impl CollectingRowReceiver {
    /// Creates a receiver that never pauses.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a receiver answering [`ReceiverResult::Pause`] on every
    /// `k`-th row. `k == 0` never pauses.
    pub fn with_pause_every(k: usize) -> Self {
        Self::build((k > 0).then_some(k))
    }

    fn build(pause_every: Option<usize>) -> Self {
        Self {
            collected: Mutex::new(Collected::default()),
            pause_every,
            stopped: AtomicBool::new(false),
            duplicate_terminals: AtomicUsize::new(0),
            completion: Completion::new(),
        }
    }

    /// Rows received so far.
    pub fn rows(&self) -> Vec<Vec<Value>> {
        self.collected.lock().rows.clone()
    }

    /// Number of rows received so far.
    pub fn num_rows(&self) -> usize {
        self.collected.lock().rows.len()
    }

    /// Number of batch boundaries signalled.
    pub fn batches_finished(&self) -> usize {
        self.collected.lock().batches
    }

    /// Returns true while a paused producer waits to be resumed.
    pub fn is_paused(&self) -> bool {
        self.collected.lock().paused.is_some()
    }

    /// Resumes a paused producer. Returns false if none was paused.
    pub fn resume(&self, is_async: bool) -> bool {
        let handle = self.collected.lock().paused.take();
        match handle {
            Some(handle) => {
                handle.resume(is_async);
                true
            }
            None => false,
        }
    }

    /// Makes every further row answer [`ReceiverResult::Stop`].
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Terminal signals received after the first one.
    pub fn duplicate_terminal_signals(&self) -> usize {
        self.duplicate_terminals.load(Ordering::Acquire)
    }

    /// Waits for the producer to finish and returns the rows.
    pub async fn result(&self) -> QuarryResult<Vec<Vec<Value>>> {
        self.completion.wait().await?;
        Ok(self.rows())
    }

    fn terminal(&self, result: QuarryResult<()>) {
        if !complete_once(&self.completion, result, "CollectingRowReceiver") {
            self.duplicate_terminals.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl Default for CollectingRowReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl RowReceiver for CollectingRowReceiver {
    fn set_next_row(&self, row: &dyn Row) -> ReceiverResult {
        if self.stopped.load(Ordering::Acquire) {
            return ReceiverResult::Stop;
        }
        let mut collected = self.collected.lock();
        collected.rows.push(row.materialize());
        collected.since_pause += 1;
        match self.pause_every {
            Some(k) if collected.since_pause >= k => {
                collected.since_pause = 0;
                ReceiverResult::Pause
            }
            _ => ReceiverResult::Continue,
        }
    }

    fn pause_processed(&self, handle: ResumeHandle) {
        self.collected.lock().paused = Some(handle);
    }

    fn batch_finished(&self) {
        self.collected.lock().batches += 1;
    }

    fn all_finished(&self, _interrupted: bool) {
        self.terminal(Ok(()));
    }

    fn fail(&self, cause: QuarryError) {
        self.terminal(Err(cause));
    }

    fn kill(&self, cause: QuarryError) {
        self.stop();
        self.terminal(Err(cause));
    }

    fn completion(&self) -> Completion<()> {
        self.completion.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_data::OwnedRow;

    fn row(v: i64) -> OwnedRow {
        OwnedRow::new(vec![Value::BigInt(v)])
    }

    #[test]
    fn test_pause_every_k_rows() {
        let receiver = CollectingRowReceiver::with_pause_every(2);
        assert_eq!(receiver.set_next_row(&row(1)), ReceiverResult::Continue);
        assert_eq!(receiver.set_next_row(&row(2)), ReceiverResult::Pause);
        assert_eq!(receiver.set_next_row(&row(3)), ReceiverResult::Continue);
        assert_eq!(receiver.set_next_row(&row(4)), ReceiverResult::Pause);
        assert_eq!(receiver.num_rows(), 4);
    }

    #[test]
    fn test_stop_and_kill() {
        let receiver = CollectingRowReceiver::new();
        receiver.kill(QuarryError::JobKilled);
        assert_eq!(receiver.set_next_row(&row(1)), ReceiverResult::Stop);
        assert_eq!(
            receiver.completion().try_get(),
            Some(Err(QuarryError::JobKilled))
        );
    }

    #[test]
    fn test_duplicate_terminal_signals_counted() {
        let receiver = CollectingRowReceiver::new();
        receiver.all_finished(false);
        receiver.fail(QuarryError::internal("late"));
        receiver.all_finished(false);
        assert_eq!(receiver.duplicate_terminal_signals(), 2);
        assert_eq!(receiver.completion().try_get(), Some(Ok(())));
    }

    #[test]
    fn test_resume_without_pause_is_noop() {
        let receiver = CollectingRowReceiver::new();
        assert!(!receiver.is_paused());
        assert!(!receiver.resume(false));
    }
}
