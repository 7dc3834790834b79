//! Emits an in-memory row list into a receiver.

use std::sync::Arc;

use quarry_data::OwnedRow;

use super::{ReceiverResult, ResumeHandle, RowReceiver};

/// Pushes a list of rows into a [`RowReceiver`], honouring pause and stop.
///
/// On pause the emitter moves itself into the [`ResumeHandle`]. Resuming
/// with `is_async = false` continues on the caller's stack; with
/// `is_async = true` it continues on a tokio task when a runtime is
/// available.
pub struct IterableRowEmitter {
    rows: Vec<OwnedRow>,
    position: usize,
    receiver: Arc<dyn RowReceiver>,
}

impl IterableRowEmitter {
    /// Creates an emitter for `rows`.
    pub fn new(rows: Vec<OwnedRow>, receiver: Arc<dyn RowReceiver>) -> Self {
        Self {
            rows,
            position: 0,
            receiver,
        }
    }

    /// Emits rows until the list ends or the receiver pauses or stops.
    pub fn run(mut self) {
        while self.position < self.rows.len() {
            let result = self.receiver.set_next_row(&self.rows[self.position]);
            self.position += 1;
            match result {
                ReceiverResult::Continue => {}
                ReceiverResult::Pause => {
                    let receiver = Arc::clone(&self.receiver);
                    receiver.pause_processed(ResumeHandle::new(move |is_async| {
                        self.resume(is_async)
                    }));
                    return;
                }
                ReceiverResult::Stop => {
                    self.receiver.all_finished(true);
                    return;
                }
            }
        }
        self.receiver.all_finished(false);
    }

    fn resume(self, is_async: bool) {
        if is_async {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move { self.run() });
                return;
            }
        }
        self.run();
    }
}
