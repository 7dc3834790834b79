//! Test fixtures for batch iterators.
//!
//! Available to this crate's tests and, with the `testing` feature, to
//! downstream crates.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use quarry_common::{QuarryError, QuarryResult};

use crate::batch::{
    all_loaded_error, collect_all, load_failed, loaded, not_positioned_error, BatchIterator,
    BoxedBatchIterator, InMemoryBatchIterator, IteratorState, LoadFuture,
};
use crate::row::Row;
use crate::value::Value;

/// Builds rows of BigInt values.
pub fn rows_of(rows: &[&[i64]]) -> Vec<Vec<Value>> {
    rows.iter()
        .map(|row| row.iter().map(|&v| Value::BigInt(v)).collect())
        .collect()
}

/// Single-column iterator over `start..end`.
pub fn range(start: i64, end: i64) -> InMemoryBatchIterator {
    InMemoryBatchIterator::from_values((start..end).map(|v| vec![Value::BigInt(v)]))
}

/// Sorts rows so results of order-insensitive operators can be compared.
pub fn sorted(mut rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    rows.sort();
    rows
}

/// Counts rows by content, for multiset comparisons.
pub fn multiset(rows: &[Vec<Value>]) -> BTreeMap<Vec<Value>, usize> {
    let mut counts = BTreeMap::new();
    for row in rows {
        *counts.entry(row.clone()).or_insert(0) += 1;
    }
    counts
}

// =============================================================================
// CountingBatchIterator
// =============================================================================

/// Wraps an iterator and counts calls that advance it.
pub struct CountingBatchIterator<B> {
    source: B,
    moves: Arc<AtomicUsize>,
}

impl<B: BatchIterator> CountingBatchIterator<B> {
    /// Wraps `source`; the returned counter survives boxing the iterator.
    pub fn new(source: B) -> (Self, Arc<AtomicUsize>) {
        let moves = Arc::new(AtomicUsize::new(0));
        (
            Self {
                source,
                moves: Arc::clone(&moves),
            },
            moves,
        )
    }
}

impl<B: BatchIterator> BatchIterator for CountingBatchIterator<B> {
    fn move_next(&mut self) -> QuarryResult<bool> {
        self.moves.fetch_add(1, Ordering::SeqCst);
        self.source.move_next()
    }

    fn current_element(&self) -> QuarryResult<&dyn Row> {
        self.source.current_element()
    }

    fn move_to_start(&mut self) -> QuarryResult<()> {
        self.source.move_to_start()
    }

    fn all_loaded(&self) -> bool {
        self.source.all_loaded()
    }

    fn load_next_batch(&mut self) -> LoadFuture {
        self.source.load_next_batch()
    }

    fn close(&mut self) {
        self.source.close()
    }

    fn kill(&mut self, cause: QuarryError) {
        self.source.kill(cause)
    }

    fn size_hint(&self) -> Option<usize> {
        self.source.size_hint()
    }
}

// =============================================================================
// BatchSimulatingIterator
// =============================================================================

/// Exposes a fully loaded source in batches of `batch_size` rows, so the
/// load path of consumers gets exercised. Does not report a size hint.
pub struct BatchSimulatingIterator<B> {
    source: B,
    batch_size: usize,
    /// Rows made available so far.
    available: usize,
    /// Rows read since the last rewind.
    position: usize,
    source_exhausted: bool,
    positioned: bool,
    state: IteratorState,
}

impl<B: BatchIterator> BatchSimulatingIterator<B> {
    /// Wraps `source`.
    pub fn new(source: B, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            source,
            batch_size,
            available: batch_size,
            position: 0,
            source_exhausted: false,
            positioned: false,
            state: IteratorState::new(),
        }
    }
}

impl<B: BatchIterator> BatchIterator for BatchSimulatingIterator<B> {
    fn move_next(&mut self) -> QuarryResult<bool> {
        self.state.ensure_open()?;
        self.positioned = false;
        if self.position >= self.available {
            return Ok(false);
        }
        if self.source.move_next()? {
            self.position += 1;
            self.positioned = true;
        } else {
            self.source_exhausted = true;
        }
        Ok(self.positioned)
    }

    fn current_element(&self) -> QuarryResult<&dyn Row> {
        if !self.positioned {
            return Err(not_positioned_error());
        }
        self.source.current_element()
    }

    fn move_to_start(&mut self) -> QuarryResult<()> {
        self.state.ensure_open()?;
        self.position = 0;
        self.positioned = false;
        self.source.move_to_start()
    }

    fn all_loaded(&self) -> bool {
        if self.source_exhausted {
            return true;
        }
        match self.source.size_hint() {
            Some(total) => self.available >= total,
            None => false,
        }
    }

    fn load_next_batch(&mut self) -> LoadFuture {
        if let Err(e) = self.state.ensure_open() {
            return load_failed(e);
        }
        if self.all_loaded() {
            return load_failed(all_loaded_error());
        }
        self.available += self.batch_size;
        loaded()
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

// =============================================================================
// BatchIteratorTester
// =============================================================================

/// Verifies the full batch iterator contract against fresh instances.
pub struct BatchIteratorTester<F> {
    factory: F,
}

impl<F> BatchIteratorTester<F>
where
    F: Fn() -> BoxedBatchIterator,
{
    /// Creates a tester; `factory` must return a new iterator per call.
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    /// Checks results, rewinding, exhaustion, load preconditions, close and
    /// kill behaviour. Panics on the first violation.
    pub async fn verify_result_and_edge_case_behaviour(&self, expected: &[Vec<Value>]) {
        self.verify(expected, false).await;
    }

    /// Same as [`verify_result_and_edge_case_behaviour`] but compares results
    /// ignoring order.
    ///
    /// [`verify_result_and_edge_case_behaviour`]: Self::verify_result_and_edge_case_behaviour
    pub async fn verify_unordered(&self, expected: &[Vec<Value>]) {
        self.verify(expected, true).await;
    }

    async fn verify(&self, expected: &[Vec<Value>], unordered: bool) {
        let normalize = |rows: Vec<Vec<Value>>| if unordered { sorted(rows) } else { rows };
        let expected = normalize(expected.to_vec());

        // full drain
        let mut it = (self.factory)();
        assert!(
            it.current_element().is_err(),
            "current_element must fail before move_next"
        );
        let first = collect_all(&mut it).await.expect("first drain failed");
        assert_eq!(normalize(first.clone()), expected, "unexpected result");

        // exhausted stays exhausted
        assert!(!it.move_next().expect("move_next after exhaustion failed"));
        assert!(it.current_element().is_err());
        assert!(it.all_loaded());
        assert!(
            it.load_next_batch().await.is_err(),
            "load_next_batch must fail once all_loaded"
        );

        // rewind replays the identical sequence
        it.move_to_start().expect("move_to_start failed");
        let second = collect_all(&mut it).await.expect("second drain failed");
        assert_eq!(second, first, "rewind must replay the same sequence");

        // closed iterators refuse to advance
        it.close();
        it.close();
        assert!(it.move_next().is_err(), "move_next must fail after close");

        // killed iterators fail with the cause
        let mut it = (self.factory)();
        let cause = QuarryError::internal("killed by tester");
        it.kill(cause.clone());
        it.kill(QuarryError::JobKilled);
        assert_eq!(it.move_next().unwrap_err(), cause);
        assert_eq!(it.load_next_batch().await.unwrap_err(), cause);

        // partially consumed then rewound
        let mut it = (self.factory)();
        if it.move_next().expect("move_next failed") {
            it.move_to_start().expect("move_to_start failed");
        }
        let third = collect_all(&mut it).await.expect("drain after rewind failed");
        assert_eq!(third, first, "rewind after partial read must restart");
        it.close();
    }
}
