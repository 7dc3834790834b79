//! Iterator over rows that are already in memory.

use quarry_common::{QuarryError, QuarryResult};

use super::{
    all_loaded_error, load_failed, not_positioned_error, BatchIterator, IteratorState, LoadFuture,
};
use crate::row::{OwnedRow, Row};

/// Fully loaded, rewindable iterator over a vector of rows.
#[derive(Debug)]
pub struct InMemoryBatchIterator {
    rows: Vec<OwnedRow>,
    /// Index of the current row plus one; 0 before the first row.
    position: usize,
    positioned: bool,
    state: IteratorState,
}

impl InMemoryBatchIterator {
    /// Creates an iterator over `rows`.
    pub fn new(rows: Vec<OwnedRow>) -> Self {
        Self {
            rows,
            position: 0,
            positioned: false,
            state: IteratorState::new(),
        }
    }

    /// Creates an empty iterator.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Creates an iterator from raw value vectors.
    pub fn from_values<I, R>(rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<OwnedRow>,
    {
        Self::new(rows.into_iter().map(Into::into).collect())
    }
}

impl BatchIterator for InMemoryBatchIterator {
    fn move_next(&mut self) -> QuarryResult<bool> {
        self.state.ensure_open()?;
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
        true
    }

    fn load_next_batch(&mut self) -> LoadFuture {
        match self.state.ensure_open() {
            Ok(()) => load_failed(all_loaded_error()),
            Err(e) => load_failed(e),
        }
    }

    fn close(&mut self) {
        if self.state.close() {
            self.positioned = false;
            self.rows = Vec::new();
        }
    }

    fn kill(&mut self, cause: QuarryError) {
        if self.state.kill(cause) {
            self.positioned = false;
            self.rows = Vec::new();
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{rows_of, BatchIteratorTester};
    use crate::value::Value;

    #[tokio::test]
    async fn test_in_memory_contract() {
        let expected = rows_of(&[&[1, 2], &[3, 4], &[5, 6]]);
        let source = expected.clone();
        BatchIteratorTester::new(move || {
            Box::new(InMemoryBatchIterator::from_values(source.clone()))
        })
        .verify_result_and_edge_case_behaviour(&expected)
        .await;
    }

    #[test]
    fn test_current_element_requires_position() {
        let mut it = InMemoryBatchIterator::from_values(vec![vec![Value::Int(1)]]);
        assert!(it.current_element().is_err());
        assert!(it.move_next().unwrap());
        assert_eq!(it.current_element().unwrap().get(0), Some(&Value::Int(1)));
        assert!(!it.move_next().unwrap());
        assert!(matches!(
            it.current_element(),
            Err(QuarryError::IllegalState { .. })
        ));
    }

    #[test]
    fn test_kill_fails_further_progress() {
        let mut it = InMemoryBatchIterator::from_values(vec![vec![Value::Int(1)]]);
        it.kill(QuarryError::JobKilled);
        assert_eq!(it.move_next().unwrap_err(), QuarryError::JobKilled);
        assert_eq!(
            futures::executor::block_on(it.load_next_batch()).unwrap_err(),
            QuarryError::JobKilled
        );
    }

    #[test]
    fn test_size_hint() {
        assert_eq!(InMemoryBatchIterator::empty().size_hint(), Some(0));
        assert_eq!(
            InMemoryBatchIterator::from_values(rows_of(&[&[1], &[2]])).size_hint(),
            Some(2)
        );
    }
}
