//! Concatenation of several iterators.

use quarry_common::{QuarryError, QuarryResult};

use super::{
    all_loaded_error, load_failed, not_positioned_error, BatchIterator, BoxedBatchIterator,
    IteratorState, LoadFuture,
};
use crate::row::Row;

/// Emits every row of each source in turn, e.g. the shards of one collect
/// phase. Loading is delegated to the source currently being read.
pub struct CompositeBatchIterator {
    sources: Vec<BoxedBatchIterator>,
    active: usize,
    positioned: bool,
    state: IteratorState,
}

impl CompositeBatchIterator {
    /// Creates an iterator over `sources`, in order.
    pub fn new(sources: Vec<BoxedBatchIterator>) -> Self {
        Self {
            sources,
            active: 0,
            positioned: false,
            state: IteratorState::new(),
        }
    }
}

impl BatchIterator for CompositeBatchIterator {
    fn move_next(&mut self) -> QuarryResult<bool> {
        self.state.ensure_open()?;
        self.positioned = false;
        while let Some(source) = self.sources.get_mut(self.active) {
            if source.move_next()? {
                self.positioned = true;
                return Ok(true);
            }
            if !source.all_loaded() {
                return Ok(false);
            }
            self.active += 1;
        }
        Ok(false)
    }

    fn current_element(&self) -> QuarryResult<&dyn Row> {
        if !self.positioned {
            return Err(not_positioned_error());
        }
        self.sources
            .get(self.active)
            .ok_or_else(not_positioned_error)?
            .current_element()
    }

    fn move_to_start(&mut self) -> QuarryResult<()> {
        self.state.ensure_open()?;
        for source in &mut self.sources {
            source.move_to_start()?;
        }
        self.active = 0;
        self.positioned = false;
        Ok(())
    }

    fn all_loaded(&self) -> bool {
        self.sources
            .iter()
            .skip(self.active)
            .all(|source| source.all_loaded())
    }

    fn load_next_batch(&mut self) -> LoadFuture {
        if let Err(e) = self.state.ensure_open() {
            return load_failed(e);
        }
        match self
            .sources
            .iter_mut()
            .skip(self.active)
            .find(|source| !source.all_loaded())
        {
            Some(source) => source.load_next_batch(),
            None => load_failed(all_loaded_error()),
        }
    }

    fn close(&mut self) {
        if self.state.close() {
            self.positioned = false;
            for source in &mut self.sources {
                source.close();
            }
        }
    }

    fn kill(&mut self, cause: QuarryError) {
        if self.state.kill(cause.clone()) {
            self.positioned = false;
            for source in &mut self.sources {
                source.kill(cause.clone());
            }
        }
    }

    fn size_hint(&self) -> Option<usize> {
        self.sources.iter().map(|source| source.size_hint()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::InMemoryBatchIterator;
    use crate::testing::{range, rows_of, BatchIteratorTester, BatchSimulatingIterator};

    #[tokio::test]
    async fn test_composite_contract() {
        let expected = rows_of(&[&[0], &[1], &[2], &[10], &[11]]);
        BatchIteratorTester::new(|| {
            Box::new(CompositeBatchIterator::new(vec![
                Box::new(range(0, 3)),
                Box::new(InMemoryBatchIterator::empty()),
                Box::new(range(10, 12)),
            ]))
        })
        .verify_result_and_edge_case_behaviour(&expected)
        .await;
    }

    #[tokio::test]
    async fn test_composite_with_batched_sources() {
        let expected = rows_of(&[&[0], &[1], &[2], &[3], &[4], &[5]]);
        BatchIteratorTester::new(|| {
            Box::new(CompositeBatchIterator::new(vec![
                Box::new(BatchSimulatingIterator::new(range(0, 3), 2)),
                Box::new(BatchSimulatingIterator::new(range(3, 6), 1)),
            ]))
        })
        .verify_result_and_edge_case_behaviour(&expected)
        .await;
    }

    #[test]
    fn test_size_hint_sums_sources() {
        let it = CompositeBatchIterator::new(vec![Box::new(range(0, 3)), Box::new(range(0, 2))]);
        assert_eq!(it.size_hint(), Some(5));
    }
}
