//! Column projection.

use quarry_common::{QuarryError, QuarryResult};

use super::{load_failed, not_positioned_error, BatchIterator, IteratorState, LoadFuture};
use crate::row::{OwnedRow, Row};
use crate::value::Value;

/// Emits the selected source columns, in the given order.
pub struct ProjectingBatchIterator<B> {
    source: B,
    columns: Vec<usize>,
    slot: OwnedRow,
    positioned: bool,
    state: IteratorState,
}

impl<B: BatchIterator> ProjectingBatchIterator<B> {
    /// Wraps `source`, keeping `columns`.
    pub fn new(source: B, columns: Vec<usize>) -> Self {
        Self {
            source,
            columns,
            slot: OwnedRow::default(),
            positioned: false,
            state: IteratorState::new(),
        }
    }
}

impl<B: BatchIterator> BatchIterator for ProjectingBatchIterator<B> {
    fn move_next(&mut self) -> QuarryResult<bool> {
        self.state.ensure_open()?;
        self.positioned = false;
        if !self.source.move_next()? {
            return Ok(false);
        }
        let row = self.source.current_element()?;
        let values: Vec<Value> = self
            .columns
            .iter()
            .map(|&i| {
                row.get(i).cloned().ok_or_else(|| {
                    QuarryError::invalid_argument(format!(
                        "column {} out of bounds for row with {} columns",
                        i,
                        row.num_columns()
                    ))
                })
            })
            .collect::<QuarryResult<_>>()?;
        self.slot = OwnedRow::new(values);
        self.positioned = true;
        Ok(true)
    }

    fn current_element(&self) -> QuarryResult<&dyn Row> {
        if !self.positioned {
            return Err(not_positioned_error());
        }
        Ok(&self.slot)
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
            self.positioned = false;
            self.source.close();
        }
    }

    fn kill(&mut self, cause: QuarryError) {
        if self.state.kill(cause.clone()) {
            self.positioned = false;
            self.source.kill(cause);
        }
    }

    fn size_hint(&self) -> Option<usize> {
        self.source.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::InMemoryBatchIterator;
    use crate::testing::{rows_of, BatchIteratorTester};

    #[tokio::test]
    async fn test_projection_contract() {
        let source = rows_of(&[&[1, 10, 100], &[2, 20, 200]]);
        let expected = rows_of(&[&[100, 1], &[200, 2]]);
        BatchIteratorTester::new(move || {
            Box::new(ProjectingBatchIterator::new(
                InMemoryBatchIterator::from_values(source.clone()),
                vec![2, 0],
            ))
        })
        .verify_result_and_edge_case_behaviour(&expected)
        .await;
    }

    #[test]
    fn test_out_of_bounds_column() {
        let mut it = ProjectingBatchIterator::new(
            InMemoryBatchIterator::from_values(rows_of(&[&[1]])),
            vec![3],
        );
        assert!(matches!(
            it.move_next(),
            Err(QuarryError::InvalidArgument { .. })
        ));
    }
}
