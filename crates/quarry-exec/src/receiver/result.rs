//! Result receivers: the output contract towards the client-facing layer.

use std::sync::Arc;

use parking_lot::Mutex;

use quarry_common::{QuarryError, QuarryResult};
use quarry_data::{Row, Value};

use super::{complete_once, ReceiverResult, ResumeHandle, RowReceiver};
use crate::completion::Completion;

/// Final consumer of a query's rows.
pub trait ResultReceiver: Send + Sync {
    /// Receives one row.
    fn set_next_row(&self, row: &dyn Row);

    /// A page of rows is complete; the producer is paused until resumed.
    fn batch_finished(&self);

    /// All rows were delivered, or delivery was interrupted.
    fn all_finished(&self, interrupted: bool);

    /// The query failed.
    fn fail(&self, cause: QuarryError);

    /// Resolves once `all_finished` or `fail` was called.
    fn completion(&self) -> Completion<()>;
}

/// Result receiver that only tracks completion, for callers that just wait
/// for a statement to finish.
#[derive(Debug, Default)]
pub struct BaseResultReceiver {
    completion: Completion<()>,
}

impl BaseResultReceiver {
    /// Creates a pending receiver.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultReceiver for BaseResultReceiver {
    fn set_next_row(&self, _row: &dyn Row) {}

    fn batch_finished(&self) {}

    fn all_finished(&self, _interrupted: bool) {
        complete_once(&self.completion, Ok(()), "BaseResultReceiver");
    }

    fn fail(&self, cause: QuarryError) {
        complete_once(&self.completion, Err(cause), "BaseResultReceiver");
    }

    fn completion(&self) -> Completion<()> {
        self.completion.clone()
    }
}

/// Result receiver keeping every row and page boundary.
#[derive(Debug, Default)]
pub struct CollectingResultReceiver {
    rows: Mutex<Vec<Vec<Value>>>,
    pages: Mutex<usize>,
    interrupted: Mutex<Option<bool>>,
    completion: Completion<()>,
}

impl CollectingResultReceiver {
    /// Creates an empty receiver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows received so far.
    pub fn rows(&self) -> Vec<Vec<Value>> {
        self.rows.lock().clone()
    }

    /// Number of completed pages.
    pub fn pages(&self) -> usize {
        *self.pages.lock()
    }

    /// `Some(interrupted)` once finished successfully.
    pub fn interrupted(&self) -> Option<bool> {
        *self.interrupted.lock()
    }

    /// Waits for completion and returns the rows.
    pub async fn result(&self) -> QuarryResult<Vec<Vec<Value>>> {
        self.completion.wait().await?;
        Ok(self.rows())
    }
}

impl ResultReceiver for CollectingResultReceiver {
    fn set_next_row(&self, row: &dyn Row) {
        self.rows.lock().push(row.materialize());
    }

    fn batch_finished(&self) {
        *self.pages.lock() += 1;
    }

    fn all_finished(&self, interrupted: bool) {
        if complete_once(&self.completion, Ok(()), "CollectingResultReceiver") {
            *self.interrupted.lock() = Some(interrupted);
        }
    }

    fn fail(&self, cause: QuarryError) {
        complete_once(&self.completion, Err(cause), "CollectingResultReceiver");
    }

    fn completion(&self) -> Completion<()> {
        self.completion.clone()
    }
}

#[derive(Debug, Default)]
struct Paging {
    rows_in_page: usize,
    /// `Pause` was answered but the producer has not handed over its
    /// resume handle yet.
    pause_pending: bool,
    /// A resume requested while the pause was pending.
    resume_requested: bool,
    paused: Option<ResumeHandle>,
    /// Set by an interrupt or a kill; the producer is stopped at its next row.
    interrupted: bool,
}

/// Adapts a [`ResultReceiver`] to the [`RowReceiver`] protocol, pausing the
/// producer after every `page_size` rows until the client asks for more.
pub struct RowReceiverToResultReceiver {
    result: Arc<dyn ResultReceiver>,
    page_size: usize,
    paging: Mutex<Paging>,
    completion: Completion<()>,
}

impl RowReceiverToResultReceiver {
    /// Wraps `result`. A `page_size` of 0 never pauses.
    pub fn new(result: Arc<dyn ResultReceiver>, page_size: usize) -> Self {
        Self {
            result,
            page_size,
            paging: Mutex::new(Paging::default()),
            completion: Completion::new(),
        }
    }

    /// Returns true while the producer waits for the next page request.
    pub fn is_paused(&self) -> bool {
        let paging = self.paging.lock();
        paging.paused.is_some() || (paging.pause_pending && !paging.resume_requested)
    }

    /// Requests the next page. Returns false if the producer was not
    /// paused.
    ///
    /// A pause whose handle has not arrived yet counts as paused; the
    /// producer is then resumed as soon as it hands the handle over.
    pub fn resume_if_paused(&self) -> bool {
        let handle = {
            let mut paging = self.paging.lock();
            match paging.paused.take() {
                Some(handle) => handle,
                None if paging.pause_pending && !paging.resume_requested => {
                    paging.resume_requested = true;
                    return true;
                }
                None => return false,
            }
        };
        handle.resume(false);
        true
    }

    /// Stops a paused producer: it is resumed and its next row is answered
    /// with [`ReceiverResult::Stop`]. Does nothing if not paused.
    pub fn interrupt_if_resumable(&self) -> bool {
        let handle = {
            let mut paging = self.paging.lock();
            if paging.interrupted {
                return false;
            }
            match paging.paused.take() {
                Some(handle) => {
                    paging.interrupted = true;
                    handle
                }
                None if paging.pause_pending => {
                    paging.interrupted = true;
                    tracing::debug!("interrupting producer before its pause was processed");
                    return true;
                }
                None => return false,
            }
        };
        tracing::debug!("interrupting paused producer");
        handle.resume(false);
        true
    }
}

impl RowReceiver for RowReceiverToResultReceiver {
    fn set_next_row(&self, row: &dyn Row) -> ReceiverResult {
        let page_done = {
            let mut paging = self.paging.lock();
            if paging.interrupted {
                return ReceiverResult::Stop;
            }
            paging.rows_in_page += 1;
            if self.page_size > 0 && paging.rows_in_page >= self.page_size {
                paging.rows_in_page = 0;
                paging.pause_pending = true;
                true
            } else {
                false
            }
        };
        self.result.set_next_row(row);
        if page_done {
            self.result.batch_finished();
            ReceiverResult::Pause
        } else {
            ReceiverResult::Continue
        }
    }

    fn pause_processed(&self, handle: ResumeHandle) {
        let resume_now = {
            let mut paging = self.paging.lock();
            paging.pause_pending = false;
            let resume_requested = std::mem::take(&mut paging.resume_requested);
            if paging.interrupted || resume_requested {
                Some(handle)
            } else {
                paging.paused = Some(handle);
                None
            }
        };
        // interrupted, killed or resumed while the pause was in flight
        if let Some(handle) = resume_now {
            handle.resume(false);
        }
    }

    fn all_finished(&self, interrupted: bool) {
        if complete_once(&self.completion, Ok(()), "RowReceiverToResultReceiver") {
            self.result.all_finished(interrupted);
        }
    }

    fn fail(&self, cause: QuarryError) {
        if complete_once(
            &self.completion,
            Err(cause.clone()),
            "RowReceiverToResultReceiver",
        ) {
            self.result.fail(cause);
        }
    }

    fn kill(&self, cause: QuarryError) {
        let handle = {
            let mut paging = self.paging.lock();
            paging.interrupted = true;
            paging.resume_requested = false;
            paging.paused.take()
        };
        self.fail(cause);
        // a paused producer must observe the stop and finish
        if let Some(handle) = handle {
            handle.resume(false);
        }
    }

    fn completion(&self) -> Completion<()> {
        self.completion.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::IterableRowEmitter;
    use quarry_data::OwnedRow;

    fn rows(n: i64) -> Vec<OwnedRow> {
        (0..n).map(|v| OwnedRow::new(vec![Value::BigInt(v)])).collect()
    }

    fn values(range: std::ops::Range<i64>) -> Vec<Vec<Value>> {
        range.map(|v| vec![Value::BigInt(v)]).collect()
    }

    #[test]
    fn test_pages_pause_producer() {
        let result = Arc::new(CollectingResultReceiver::new());
        let receiver = Arc::new(RowReceiverToResultReceiver::new(result.clone(), 2));
        IterableRowEmitter::new(rows(5), receiver.clone()).run();

        assert!(receiver.is_paused());
        assert_eq!(result.rows(), values(0..2));
        assert_eq!(result.pages(), 1);

        assert!(receiver.resume_if_paused());
        assert_eq!(result.rows(), values(0..4));

        assert!(receiver.resume_if_paused());
        assert_eq!(result.rows(), values(0..5));
        assert_eq!(result.interrupted(), Some(false));
        assert!(!receiver.resume_if_paused());
    }

    #[test]
    fn test_interrupt_while_paused_stops_producer() {
        let result = Arc::new(CollectingResultReceiver::new());
        let receiver = Arc::new(RowReceiverToResultReceiver::new(result.clone(), 2));
        IterableRowEmitter::new(rows(5), receiver.clone()).run();

        assert!(receiver.interrupt_if_resumable());
        assert_eq!(result.rows(), values(0..2));
        assert_eq!(result.interrupted(), Some(true));
        assert!(!receiver.interrupt_if_resumable());
    }

    #[test]
    fn test_interrupt_without_pause_is_noop() {
        let result = Arc::new(CollectingResultReceiver::new());
        let receiver = RowReceiverToResultReceiver::new(result.clone(), 2);
        assert!(!receiver.interrupt_if_resumable());
        assert_eq!(
            receiver.set_next_row(&OwnedRow::new(vec![Value::Int(1)])),
            ReceiverResult::Continue
        );
    }

    #[test]
    fn test_kill_fails_result_once() {
        let result = Arc::new(CollectingResultReceiver::new());
        let receiver = Arc::new(RowReceiverToResultReceiver::new(result.clone(), 2));
        IterableRowEmitter::new(rows(5), receiver.clone()).run();

        receiver.kill(QuarryError::JobKilled);
        assert_eq!(
            result.completion().try_get(),
            Some(Err(QuarryError::JobKilled))
        );
        // resumed producer stopped and its all_finished was ignored
        assert_eq!(result.rows(), values(0..2));
        assert_eq!(
            receiver.completion().try_get(),
            Some(Err(QuarryError::JobKilled))
        );
    }

    fn flag_handle() -> (ResumeHandle, Arc<std::sync::atomic::AtomicBool>) {
        let resumed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&resumed);
        let handle = ResumeHandle::new(move |_| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        (handle, resumed)
    }

    fn one_row_page() -> (Arc<CollectingResultReceiver>, RowReceiverToResultReceiver) {
        let result = Arc::new(CollectingResultReceiver::new());
        let receiver = RowReceiverToResultReceiver::new(result.clone(), 1);
        (result, receiver)
    }

    #[test]
    fn test_kill_before_pause_processed_resumes_producer() {
        let (result, receiver) = one_row_page();
        let row = OwnedRow::new(vec![Value::Int(1)]);
        assert_eq!(receiver.set_next_row(&row), ReceiverResult::Pause);

        receiver.kill(QuarryError::JobKilled);
        let (handle, resumed) = flag_handle();
        receiver.pause_processed(handle);

        assert!(resumed.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!receiver.is_paused());
        assert_eq!(receiver.set_next_row(&row), ReceiverResult::Stop);
        assert_eq!(
            result.completion().try_get(),
            Some(Err(QuarryError::JobKilled))
        );
    }

    #[test]
    fn test_interrupt_before_pause_processed_stops_producer() {
        let (result, receiver) = one_row_page();
        let row = OwnedRow::new(vec![Value::Int(1)]);
        assert_eq!(receiver.set_next_row(&row), ReceiverResult::Pause);
        assert!(receiver.is_paused());

        assert!(receiver.interrupt_if_resumable());
        assert!(!receiver.interrupt_if_resumable());
        let (handle, resumed) = flag_handle();
        receiver.pause_processed(handle);

        assert!(resumed.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!receiver.is_paused());
        assert_eq!(receiver.set_next_row(&row), ReceiverResult::Stop);
        receiver.all_finished(true);
        assert_eq!(result.rows(), vec![vec![Value::Int(1)]]);
        assert_eq!(result.interrupted(), Some(true));
    }

    #[test]
    fn test_resume_before_pause_processed_is_not_lost() {
        let (_result, receiver) = one_row_page();
        assert_eq!(
            receiver.set_next_row(&OwnedRow::new(vec![Value::Int(1)])),
            ReceiverResult::Pause
        );

        assert!(receiver.resume_if_paused());
        assert!(!receiver.resume_if_paused());
        let (handle, resumed) = flag_handle();
        receiver.pause_processed(handle);

        assert!(resumed.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!receiver.is_paused());
        assert!(!receiver.resume_if_paused());
    }

    #[test]
    fn test_base_result_receiver_completes_once() {
        let receiver = BaseResultReceiver::new();
        receiver.fail(QuarryError::JobKilled);
        receiver.all_finished(false);
        assert_eq!(
            receiver.completion().try_get(),
            Some(Err(QuarryError::JobKilled))
        );
    }
}
