//! Row filtering.

use quarry_common::{QuarryError, QuarryResult};

use super::{load_failed, not_positioned_error, BatchIterator, IteratorState, LoadFuture};
use crate::row::{Row, RowPredicate};

/// Skips source rows for which the predicate does not hold.
pub struct FilteringBatchIterator<B> {
    source: B,
    predicate: RowPredicate,
    positioned: bool,
    state: IteratorState,
}

impl<B: BatchIterator> FilteringBatchIterator<B> {
    /// Wraps `source`.
    pub fn new(source: B, predicate: RowPredicate) -> Self {
        Self {
            source,
            predicate,
            positioned: false,
            state: IteratorState::new(),
        }
    }
}

impl<B: BatchIterator> BatchIterator for FilteringBatchIterator<B> {
    fn move_next(&mut self) -> QuarryResult<bool> {
        self.state.ensure_open()?;
        self.positioned = false;
        while self.source.move_next()? {
            if (self.predicate)(self.source.current_element()?)? {
                self.positioned = true;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn current_element(&self) -> QuarryResult<&dyn Row> {
        if !self.positioned {
            return Err(not_positioned_error());
        }
        self.source.current_element()
    }

    fn move_to_start(&mut self) -> QuarryResult<()> {
        self.state.ensure_open()?;
        self.positioned = false;
        self.source.move_to_start()
    }

    fn all_loaded(&self) -> bool {
        self.source.all_loaded()
    }

    fn load_next_batch(&mut self) -> LoadFuture {
        match self.state.ensure_open() {
            Ok(()) => self.source.load_next_batch(),
            Err(e) => load_failed(e),
        }
    }

    fn close(&mut self) {
        if self.state.close() {
            self.source.close();
        }
    }

    fn kill(&mut self, cause: QuarryError) {
        if self.state.kill(cause.clone()) {
            self.source.kill(cause);
        }
    }
}
