//! Iterator fed asynchronously by upstream producers.
//!
//! A merge or join phase receives its input from N upstream phases, each of
//! which pushes pages ("buckets") of rows through a [`BucketFeeder`]. The
//! [`BucketBatchIterator`] consumes them in arrival order. Rows are retained
//! after they are read so that `move_to_start` replays them without asking
//! the upstreams again.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

use quarry_common::{QuarryError, QuarryResult};

use super::{
    all_loaded_error, load_failed, not_positioned_error, BatchIterator, IteratorState, LoadFuture,
};
use crate::row::{OwnedRow, Row};

#[derive(Debug)]
struct BucketState {
    pending: VecDeque<Vec<OwnedRow>>,
    remaining_upstreams: usize,
    failure: Option<QuarryError>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<BucketState>,
    notify: Notify,
}

/// Producer side of a [`BucketBatchIterator`]. Cheap to clone; one clone per
/// upstream.
#[derive(Debug, Clone)]
pub struct BucketFeeder {
    shared: Arc<Shared>,
}

impl BucketFeeder {
    /// Hands a bucket to the iterator. `is_last` marks the final bucket of
    /// one upstream. Buckets arriving after a failure are dropped.
    pub fn set_bucket(&self, rows: Vec<OwnedRow>, is_last: bool) {
        {
            let mut state = self.shared.state.lock();
            if state.failure.is_some() {
                return;
            }
            if !rows.is_empty() {
                state.pending.push_back(rows);
            }
            if is_last {
                if state.remaining_upstreams == 0 {
                    tracing::warn!("bucket marked last after all upstreams finished");
                }
                state.remaining_upstreams = state.remaining_upstreams.saturating_sub(1);
            }
        }
        self.shared.notify.notify_waiters();
    }

    /// Fails the iterator; a pending load resolves with `cause`.
    pub fn fail(&self, cause: QuarryError) {
        {
            let mut state = self.shared.state.lock();
            if state.failure.is_none() {
                state.failure = Some(cause);
            }
        }
        self.shared.notify.notify_waiters();
    }

    /// Number of upstreams that have not delivered their last bucket.
    pub fn remaining_upstreams(&self) -> usize {
        self.shared.state.lock().remaining_upstreams
    }
}

/// Consumer side: rows from all upstream buckets in arrival order.
#[derive(Debug)]
pub struct BucketBatchIterator {
    shared: Arc<Shared>,
    rows: Vec<OwnedRow>,
    /// Index of the current row plus one; 0 before the first row.
    position: usize,
    positioned: bool,
    state: IteratorState,
}

impl BucketBatchIterator {
    /// Creates an iterator expecting buckets from `num_upstreams` producers,
    /// together with its feeder.
    pub fn new(num_upstreams: usize) -> (Self, BucketFeeder) {
        let shared = Arc::new(Shared {
            state: Mutex::new(BucketState {
                pending: VecDeque::new(),
                remaining_upstreams: num_upstreams,
                failure: None,
            }),
            notify: Notify::new(),
        });
        let iterator = Self {
            shared: Arc::clone(&shared),
            rows: Vec::new(),
            position: 0,
            positioned: false,
            state: IteratorState::new(),
        };
        (iterator, BucketFeeder { shared })
    }

    /// Moves buckets that arrived since the last call into the local buffer.
    fn drain_pending(&mut self) -> QuarryResult<()> {
        let mut state = self.shared.state.lock();
        if let Some(failure) = &state.failure {
            return Err(failure.clone());
        }
        while let Some(bucket) = state.pending.pop_front() {
            self.rows.extend(bucket);
        }
        Ok(())
    }
}

impl BatchIterator for BucketBatchIterator {
    fn move_next(&mut self) -> QuarryResult<bool> {
        self.state.ensure_open()?;
        if self.position >= self.rows.len() {
            self.drain_pending()?;
        }
        if self.position < self.rows.len() {
            self.position += 1;
            self.positioned = true;
        } else {
            self.positioned = false;
        }
        Ok(self.positioned)
    }

    fn current_element(&self) -> QuarryResult<&dyn Row> {
        if !self.positioned {
            return Err(not_positioned_error());
        }
        self.rows
            .get(self.position - 1)
            .map(|row| row as &dyn Row)
            .ok_or_else(not_positioned_error)
    }

    fn move_to_start(&mut self) -> QuarryResult<()> {
        self.state.ensure_open()?;
        self.position = 0;
        self.positioned = false;
        Ok(())
    }

    fn all_loaded(&self) -> bool {
        let state = self.shared.state.lock();
        state.remaining_upstreams == 0 && state.pending.is_empty()
    }

    fn load_next_batch(&mut self) -> LoadFuture {
        if let Err(e) = self.state.ensure_open() {
            return load_failed(e);
        }
        if self.all_loaded() {
            return load_failed(all_loaded_error());
        }
        let shared = Arc::clone(&self.shared);
        Box::pin(async move {
            loop {
                let notified = shared.notify.notified();
                {
                    let state = shared.state.lock();
                    if let Some(failure) = &state.failure {
                        return Err(failure.clone());
                    }
                    if !state.pending.is_empty() || state.remaining_upstreams == 0 {
                        return Ok(());
                    }
                }
                notified.await;
            }
        })
    }

    fn close(&mut self) {
        if self.state.close() {
            self.positioned = false;
            self.rows = Vec::new();
            // late buckets are dropped
            self.shared
                .state
                .lock()
                .failure
                .get_or_insert_with(|| QuarryError::illegal_state("iterator is closed"));
            self.shared.notify.notify_waiters();
        }
    }

    fn kill(&mut self, cause: QuarryError) {
        if self.state.kill(cause.clone()) {
            self.positioned = false;
            self.rows = Vec::new();
            {
                let mut state = self.shared.state.lock();
                state.pending.clear();
                if state.failure.is_none() {
                    state.failure = Some(cause);
                }
            }
            self.shared.notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::collect_all;
    use crate::testing::rows_of;
    use std::time::Duration;

    fn bucket(values: &[&[i64]]) -> Vec<OwnedRow> {
        rows_of(values).into_iter().map(OwnedRow::new).collect()
    }

    #[tokio::test]
    async fn test_rows_from_all_upstreams() {
        let (mut it, feeder) = BucketBatchIterator::new(2);
        let upstream = feeder.clone();
        tokio::spawn(async move {
            upstream.set_bucket(bucket(&[&[1], &[2]]), false);
            tokio::time::sleep(Duration::from_millis(5)).await;
            upstream.set_bucket(bucket(&[&[3]]), true);
        });
        feeder.set_bucket(bucket(&[&[4]]), true);

        let mut rows = collect_all(&mut it).await.unwrap();
        rows.sort();
        assert_eq!(rows, rows_of(&[&[1], &[2], &[3], &[4]]));
        assert!(it.all_loaded());
        assert_eq!(feeder.remaining_upstreams(), 0);
    }

    #[tokio::test]
    async fn test_move_to_start_replays_retained_rows() {
        let (mut it, feeder) = BucketBatchIterator::new(1);
        feeder.set_bucket(bucket(&[&[1], &[2]]), true);

        let first = collect_all(&mut it).await.unwrap();
        it.move_to_start().unwrap();
        let second = collect_all(&mut it).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, rows_of(&[&[1], &[2]]));
    }

    #[tokio::test]
    async fn test_pending_load_fails_on_kill() {
        let (mut it, _feeder) = BucketBatchIterator::new(1);
        assert!(!it.move_next().unwrap());
        assert!(!it.all_loaded());

        let load = it.load_next_batch();
        it.kill(QuarryError::JobKilled);
        assert_eq!(load.await.unwrap_err(), QuarryError::JobKilled);
        assert_eq!(
            it.load_next_batch().await.unwrap_err(),
            QuarryError::JobKilled
        );
    }

    #[tokio::test]
    async fn test_upstream_failure_fails_load() {
        let (mut it, feeder) = BucketBatchIterator::new(1);
        let load = it.load_next_batch();
        feeder.fail(QuarryError::execution_failed("upstream"));
        assert_eq!(
            load.await.unwrap_err(),
            QuarryError::execution_failed("upstream")
        );
        assert!(it.move_next().is_err());
    }

    #[test]
    fn test_empty_buckets_and_no_upstreams() {
        let (mut it, _feeder) = BucketBatchIterator::new(0);
        assert!(it.all_loaded());
        assert!(!it.move_next().unwrap());

        let (mut it, feeder) = BucketBatchIterator::new(1);
        feeder.set_bucket(Vec::new(), true);
        assert!(!it.move_next().unwrap());
        assert!(it.all_loaded());
        assert!(it.current_element().is_err());
    }
}
