//! Push-based row consumption with backpressure.
//!
//! A producer hands rows one at a time to a [`RowReceiver`] and obeys the
//! returned [`ReceiverResult`]:
//!
//! ```text
//!   set_next_row(row)
//!        │
//!        ├── Continue ──▶ emit the next row
//!        ├── Pause ─────▶ pause_processed(handle); suspend until
//!        │                handle.resume(is_async)
//!        └── Stop ──────▶ emit nothing more; all_finished(true)
//!
//!   end of data ──▶ all_finished(false)      error ──▶ fail(cause)
//! ```
//!
//! `all_finished` and `fail` are terminal; the first one completes the
//! receiver's [`Completion`] and any later terminal signal is ignored and
//! logged. A receiver may answer `Stop` to a producer it paused earlier; the
//! producer then finishes without emitting again.

mod bucketing;
mod collecting;
mod driver;
mod emitter;
mod result;

pub use bucketing::BucketingRowReceiver;
pub use collecting::CollectingRowReceiver;
pub use driver::{drive, DriveOutcome};
pub use emitter::IterableRowEmitter;
pub use result::{
    BaseResultReceiver, CollectingResultReceiver, ResultReceiver, RowReceiverToResultReceiver,
};

use std::fmt;

use quarry_common::QuarryError;
use quarry_data::Row;

use crate::completion::Completion;

/// Answer of a receiver to one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReceiverResult {
    /// Keep emitting.
    Continue,
    /// Suspend and hand over a [`ResumeHandle`] via
    /// [`RowReceiver::pause_processed`].
    Pause,
    /// Emit nothing more.
    Stop,
}

/// Resumes a paused producer. Consumed on use, so a producer is resumed at
/// most once per pause.
pub struct ResumeHandle {
    resume: Box<dyn FnOnce(bool) + Send>,
}

impl ResumeHandle {
    /// Wraps the producer's continuation.
    pub fn new<F>(resume: F) -> Self
    where
        F: FnOnce(bool) + Send + 'static,
    {
        Self {
            resume: Box::new(resume),
        }
    }

    /// Resumes the producer. `is_async` tells it that the call comes from a
    /// different thread than the one that paused, so it should continue on
    /// its own task instead of growing this call stack.
    pub fn resume(self, is_async: bool) {
        (self.resume)(is_async)
    }
}

impl fmt::Debug for ResumeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResumeHandle")
    }
}

/// Push-based consumer of rows.
///
/// Rows are views valid only for the duration of `set_next_row`; receivers
/// that keep them must copy. Methods take `&self` so that the receiver can
/// be shared with whoever kills or resumes it.
pub trait RowReceiver: Send + Sync {
    /// Receives one row.
    fn set_next_row(&self, row: &dyn Row) -> ReceiverResult;

    /// Called by the producer after it got [`ReceiverResult::Pause`].
    fn pause_processed(&self, handle: ResumeHandle);

    /// The producer reached a batch boundary; more rows may follow.
    fn batch_finished(&self) {}

    /// The producer is done. `interrupted` is true if it stopped early on a
    /// [`ReceiverResult::Stop`].
    fn all_finished(&self, interrupted: bool);

    /// The producer failed.
    fn fail(&self, cause: QuarryError);

    /// Kills the receiver from any thread; later rows are answered with
    /// [`ReceiverResult::Stop`].
    fn kill(&self, cause: QuarryError);

    /// Resolves once a terminal signal arrived.
    fn completion(&self) -> Completion<()>;
}

/// Records a terminal signal on `completion`; repeats are logged and
/// ignored. Returns true for the first signal.
pub(crate) fn complete_once(
    completion: &Completion<()>,
    result: Result<(), QuarryError>,
    receiver: &str,
) -> bool {
    if completion.complete(result) {
        return true;
    }
    tracing::warn!(
        "{} received a terminal signal after it already finished",
        receiver
    );
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_resume_handle_passes_async_flag() {
        let seen = Arc::new(AtomicBool::new(false));
        let s = Arc::clone(&seen);
        let handle = ResumeHandle::new(move |is_async| s.store(is_async, Ordering::SeqCst));
        handle.resume(true);
        assert!(seen.load(Ordering::SeqCst));
    }

    #[test]
    fn test_complete_once() {
        let completion = Completion::new();
        assert!(complete_once(&completion, Ok(()), "test"));
        assert!(!complete_once(
            &completion,
            Err(QuarryError::JobKilled),
            "test"
        ));
        assert_eq!(completion.try_get(), Some(Ok(())));
    }
}
