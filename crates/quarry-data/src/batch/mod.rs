//! The batch iterator protocol.
//!
//! A [`BatchIterator`] is a pull-based cursor over rows whose source may not
//! be fully available yet. Consumers drive it like this:
//!
//! ```text
//!            move_next() == true
//!          +---------------------+
//!          |                     |
//!          v                     |
//!   [not started] ----> [positioned] ----> [exhausted]
//!          ^                                 |    |
//!          |   move_to_start()               |    | !all_loaded()
//!          +---------------------------------+    v
//!                                        load_next_batch().await
//!                                                 |
//!                                                 +--> move_next() again
//! ```
//!
//! Calls into one iterator are never concurrent. Kills from other threads go
//! through a [`KillSwitch`] observed by whoever drives the iterator.

mod bucket;
mod composite;
mod consumer;
mod filter;
mod in_memory;
mod kill;
mod limit;
mod projection;

pub use bucket::{BucketBatchIterator, BucketFeeder};
pub use composite::CompositeBatchIterator;
pub use consumer::collect_all;
pub use filter::FilteringBatchIterator;
pub use in_memory::InMemoryBatchIterator;
pub use kill::KillSwitch;
pub use limit::LimitingBatchIterator;
pub use projection::ProjectingBatchIterator;

use futures::future::{self, BoxFuture};
use quarry_common::{QuarryError, QuarryResult};

use crate::row::Row;

/// Future returned by [`BatchIterator::load_next_batch`].
pub type LoadFuture = BoxFuture<'static, QuarryResult<()>>;

/// A boxed batch iterator.
pub type BoxedBatchIterator = Box<dyn BatchIterator>;

/// Pull-based cursor over rows that may arrive in batches.
pub trait BatchIterator: Send {
    /// Advances to the next row. Returns `false` when no row is available
    /// right now; check [`all_loaded`](Self::all_loaded) to tell the end of
    /// the data from a batch boundary.
    fn move_next(&mut self) -> QuarryResult<bool>;

    /// Returns the current row. Only valid directly after `move_next`
    /// returned `true`; fails with an illegal state error otherwise.
    fn current_element(&self) -> QuarryResult<&dyn Row>;

    /// Rewinds to before the first row.
    fn move_to_start(&mut self) -> QuarryResult<()>;

    /// Returns true if the source is fully available.
    fn all_loaded(&self) -> bool;

    /// Loads more data. Fails if everything is already loaded, or with the
    /// kill cause once the iterator is killed.
    fn load_next_batch(&mut self) -> LoadFuture;

    /// Releases resources. Idempotent.
    fn close(&mut self);

    /// Releases resources and fails any pending load with `cause`.
    /// Idempotent; the first terminal call wins.
    fn kill(&mut self, cause: QuarryError);

    /// Exact number of rows, if known without consuming the iterator.
    fn size_hint(&self) -> Option<usize> {
        None
    }
}

impl<B: BatchIterator + ?Sized> BatchIterator for Box<B> {
    fn move_next(&mut self) -> QuarryResult<bool> {
        (**self).move_next()
    }

    fn current_element(&self) -> QuarryResult<&dyn Row> {
        (**self).current_element()
    }

    fn move_to_start(&mut self) -> QuarryResult<()> {
        (**self).move_to_start()
    }

    fn all_loaded(&self) -> bool {
        (**self).all_loaded()
    }

    fn load_next_batch(&mut self) -> LoadFuture {
        (**self).load_next_batch()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn kill(&mut self, cause: QuarryError) {
        (**self).kill(cause)
    }

    fn size_hint(&self) -> Option<usize> {
        (**self).size_hint()
    }
}

/// Terminal-state bookkeeping shared by iterator implementations.
#[derive(Debug, Default)]
pub struct IteratorState {
    terminated: Option<Terminated>,
}

#[derive(Debug)]
enum Terminated {
    Closed,
    Killed(QuarryError),
}

impl IteratorState {
    /// Creates an open state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails if the iterator was closed or killed.
    #[inline]
    pub fn ensure_open(&self) -> QuarryResult<()> {
        match &self.terminated {
            None => Ok(()),
            Some(Terminated::Closed) => Err(QuarryError::illegal_state("iterator is closed")),
            Some(Terminated::Killed(cause)) => Err(cause.clone()),
        }
    }

    /// Marks the iterator closed. Returns false if it was already terminated.
    pub fn close(&mut self) -> bool {
        if self.terminated.is_some() {
            return false;
        }
        self.terminated = Some(Terminated::Closed);
        true
    }

    /// Marks the iterator killed. Returns false if it was already terminated.
    pub fn kill(&mut self, cause: QuarryError) -> bool {
        if self.terminated.is_some() {
            return false;
        }
        self.terminated = Some(Terminated::Killed(cause));
        true
    }

    /// Returns the kill cause, if killed.
    pub fn kill_cause(&self) -> Option<&QuarryError> {
        match &self.terminated {
            Some(Terminated::Killed(cause)) => Some(cause),
            _ => None,
        }
    }

    /// Returns true once closed or killed.
    pub fn is_terminated(&self) -> bool {
        self.terminated.is_some()
    }
}

/// A load future that resolves immediately.
pub fn loaded() -> LoadFuture {
    Box::pin(future::ready(Ok(())))
}

/// A load future that fails immediately.
pub fn load_failed(err: QuarryError) -> LoadFuture {
    Box::pin(future::ready(Err(err)))
}

/// The failure returned when loading a fully loaded iterator.
pub fn all_loaded_error() -> QuarryError {
    QuarryError::illegal_state("all batches already loaded")
}

/// The failure returned when reading an iterator that is not positioned.
pub fn not_positioned_error() -> QuarryError {
    QuarryError::illegal_state("iterator is not positioned on a row")
}
