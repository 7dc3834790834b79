//! Row limit.

use quarry_common::{QuarryError, QuarryResult};

use super::{
    all_loaded_error, load_failed, not_positioned_error, BatchIterator, IteratorState, LoadFuture,
};
use crate::row::Row;

/// Emits at most `limit` source rows. Once the limit is reached the
/// iterator reports itself fully loaded so consumers stop fetching.
pub struct LimitingBatchIterator<B> {
    source: B,
    limit: usize,
    emitted: usize,
    positioned: bool,
    state: IteratorState,
}

impl<B: BatchIterator> LimitingBatchIterator<B> {
    /// Wraps `source`.
    pub fn new(source: B, limit: usize) -> Self {
        Self {
            source,
            limit,
            emitted: 0,
            positioned: false,
            state: IteratorState::new(),
        }
    }
}

impl<B: BatchIterator> BatchIterator for LimitingBatchIterator<B> {
    fn move_next(&mut self) -> QuarryResult<bool> {
        self.state.ensure_open()?;
        self.positioned = false;
        if self.emitted >= self.limit || !self.source.move_next()? {
            return Ok(false);
        }
        self.emitted += 1;
        self.positioned = true;
        Ok(true)
    }

    fn current_element(&self) -> QuarryResult<&dyn Row> {
        if !self.positioned {
            return Err(not_positioned_error());
        }
        self.source.current_element()
    }

    fn move_to_start(&mut self) -> QuarryResult<()> {
        self.state.ensure_open()?;
        self.emitted = 0;
        self.positioned = false;
        self.source.move_to_start()
    }

    fn all_loaded(&self) -> bool {
        self.emitted >= self.limit || self.source.all_loaded()
    }

    fn load_next_batch(&mut self) -> LoadFuture {
        if let Err(e) = self.state.ensure_open() {
            return load_failed(e);
        }
        if self.emitted >= self.limit {
            return load_failed(all_loaded_error());
        }
        self.source.load_next_batch()
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

    fn size_hint(&self) -> Option<usize> {
        if self.limit == 0 {
            return Some(0);
        }
        self.source.size_hint().map(|n| n.min(self.limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{range, rows_of, BatchIteratorTester, BatchSimulatingIterator};

    #[tokio::test]
    async fn test_limit_contract() {
        let expected = rows_of(&[&[0], &[1], &[2]]);
        BatchIteratorTester::new(|| {
            Box::new(LimitingBatchIterator::new(
                BatchSimulatingIterator::new(range(0, 10), 2),
                3,
            ))
        })
        .verify_result_and_edge_case_behaviour(&expected)
        .await;
    }

    #[test]
    fn test_limit_stops_reading_source() {
        let mut it = LimitingBatchIterator::new(range(0, 10), 2);
        assert!(it.move_next().unwrap());
        assert!(it.move_next().unwrap());
        assert!(!it.move_next().unwrap());
        assert!(it.all_loaded());
        assert_eq!(it.size_hint(), Some(2));
    }

    #[test]
    fn test_zero_limit() {
        let mut it = LimitingBatchIterator::new(range(0, 10), 0);
        assert_eq!(it.size_hint(), Some(0));
        assert!(!it.move_next().unwrap());
    }
}
