//! Receiver feeding a downstream bucket iterator.

use parking_lot::Mutex;

use quarry_common::{QuarryError, QuarryResult};
use quarry_data::batch::BucketFeeder;
use quarry_data::{OwnedRow, Row};

use super::{complete_once, ReceiverResult, ResumeHandle, RowReceiver};
use crate::completion::Completion;

#[derive(Debug, Default)]
struct Page {
    rows: Vec<OwnedRow>,
    /// Set by the first terminal signal; nothing reaches the feeder after it.
    terminated: bool,
}

/// Forwards rows in pages of `bucket_size` into a [`BucketFeeder`], which
/// connects an upstream phase to the merge or join phase consuming it.
///
/// Finishing sends the remaining rows as the upstream's last bucket; a
/// failure or kill fails the downstream iterator. Only the first terminal
/// signal is forwarded.
#[derive(Debug)]
pub struct BucketingRowReceiver {
    feeder: BucketFeeder,
    bucket_size: usize,
    page: Mutex<Page>,
    completion: Completion<()>,
}

impl BucketingRowReceiver {
    /// Creates a receiver for one upstream of `feeder`. `bucket_size` is
    /// raised to at least 1.
    pub fn new(feeder: BucketFeeder, bucket_size: usize) -> Self {
        Self {
            feeder,
            bucket_size: bucket_size.max(1),
            page: Mutex::new(Page::default()),
            completion: Completion::new(),
        }
    }

    /// Marks the receiver terminated and returns the unsent rows, or `None`
    /// if an earlier terminal signal won.
    fn claim_terminal(&self) -> Option<Vec<OwnedRow>> {
        let mut page = self.page.lock();
        if page.terminated {
            return None;
        }
        page.terminated = true;
        Some(std::mem::take(&mut page.rows))
    }

    fn terminal(&self, result: QuarryResult<()>) {
        match self.claim_terminal() {
            Some(rows) => {
                match &result {
                    Ok(()) => self.feeder.set_bucket(rows, true),
                    Err(cause) => self.feeder.fail(cause.clone()),
                }
                complete_once(&self.completion, result, "BucketingRowReceiver");
            }
            None => tracing::warn!(
                "BucketingRowReceiver received a terminal signal after it already finished"
            ),
        }
    }
}

impl RowReceiver for BucketingRowReceiver {
    fn set_next_row(&self, row: &dyn Row) -> ReceiverResult {
        let full = {
            let mut page = self.page.lock();
            if page.terminated {
                return ReceiverResult::Stop;
            }
            page.rows.push(row.to_owned_row());
            if page.rows.len() >= self.bucket_size {
                Some(std::mem::take(&mut page.rows))
            } else {
                None
            }
        };
        if let Some(rows) = full {
            self.feeder.set_bucket(rows, false);
        }
        ReceiverResult::Continue
    }

    fn pause_processed(&self, handle: ResumeHandle) {
        // never pauses; resume right away
        handle.resume(false);
    }

    fn all_finished(&self, _interrupted: bool) {
        self.terminal(Ok(()));
    }

    fn fail(&self, cause: QuarryError) {
        self.terminal(Err(cause));
    }

    fn kill(&self, cause: QuarryError) {
        self.terminal(Err(cause));
    }

    fn completion(&self) -> Completion<()> {
        self.completion.clone()
    }
}
