//! Draining iterators.

use quarry_common::QuarryResult;

use super::BatchIterator;
use crate::value::Value;

/// Drives `iterator` to the end, awaiting batch loads as needed, and returns
/// every row materialized.
pub async fn collect_all<B>(iterator: &mut B) -> QuarryResult<Vec<Vec<Value>>>
where
    B: BatchIterator + ?Sized,
{
    let mut rows = Vec::new();
    loop {
        while iterator.move_next()? {
            rows.push(iterator.current_element()?.materialize());
        }
        if iterator.all_loaded() {
            return Ok(rows);
        }
        iterator.load_next_batch().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{range, rows_of, BatchSimulatingIterator};

    #[tokio::test]
    async fn test_collect_all_loads_batches() {
        let mut it = BatchSimulatingIterator::new(range(0, 5), 2);
        let rows = collect_all(&mut it).await.unwrap();
        assert_eq!(rows, rows_of(&[&[0], &[1], &[2], &[3], &[4]]));
    }
}
