//! Plain nested loop join.

use quarry_common::{QuarryError, QuarryResult};

use super::{GrowableBitSet, JoinInputs, JoinPredicate, JoinSide};
use crate::batch::{load_failed, not_positioned_error, BatchIterator, BoxedBatchIterator, IteratorState, LoadFuture};
use crate::row::{CombinedRow, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NestedLoopState {
    Start,
    /// Checks an inner side of unknown size for rows before the outer side
    /// is touched.
    ProbeInner,
    AdvanceOuter,
    ScanInner,
    Exhausted,
}

/// For each outer row, rewinds and scans the whole inner side.
///
/// Output is outer-major, inner-minor. Cheap when the inner side rewinds
/// without refetching, e.g. when it is already in memory.
pub struct NestedLoopBatchIterator {
    inputs: JoinInputs,
    predicate: JoinPredicate,
    loop_state: NestedLoopState,
    combined: CombinedRow,
    /// Position of the current outer row in the outer stream.
    outer_index: usize,
    /// Whether the inner side produced any row during the first scan.
    inner_seen: bool,
    first_scan: bool,
    matched_outer: GrowableBitSet,
    positioned: bool,
    state: IteratorState,
}

impl NestedLoopBatchIterator {
    /// Creates the join.
    pub fn new(
        outer: BoxedBatchIterator,
        inner: BoxedBatchIterator,
        predicate: JoinPredicate,
    ) -> Self {
        Self {
            inputs: JoinInputs::new(outer, inner),
            predicate,
            loop_state: NestedLoopState::Start,
            combined: CombinedRow::new(),
            outer_index: 0,
            inner_seen: false,
            first_scan: true,
            matched_outer: GrowableBitSet::new(),
            positioned: false,
            state: IteratorState::new(),
        }
    }

    /// Outer rows, by position, that matched at least one inner row so far.
    pub fn matched_outer(&self) -> &GrowableBitSet {
        &self.matched_outer
    }

    fn finish(&mut self) -> QuarryResult<bool> {
        self.loop_state = NestedLoopState::Exhausted;
        self.inputs.exhausted = true;
        Ok(false)
    }
}

impl BatchIterator for NestedLoopBatchIterator {
    fn move_next(&mut self) -> QuarryResult<bool> {
        self.state.ensure_open()?;
        self.positioned = false;
        loop {
            match self.loop_state {
                NestedLoopState::Start => {
                    if self.inputs.known_empty() {
                        return self.finish();
                    }
                    self.loop_state = if self.inputs.inner.size_hint().is_none() {
                        NestedLoopState::ProbeInner
                    } else {
                        NestedLoopState::AdvanceOuter
                    };
                }
                NestedLoopState::ProbeInner => match self.inputs.advance(JoinSide::Inner)? {
                    None => return Ok(false),
                    Some(false) => return self.finish(),
                    Some(true) => {
                        self.inputs.inner.move_to_start()?;
                        self.inner_seen = true;
                        self.loop_state = NestedLoopState::AdvanceOuter;
                    }
                },
                NestedLoopState::AdvanceOuter => match self.inputs.advance(JoinSide::Outer)? {
                    None => return Ok(false),
                    Some(false) => return self.finish(),
                    Some(true) => {
                        self.combined
                            .set_outer(self.inputs.outer.current_element()?);
                        if !self.first_scan {
                            self.outer_index += 1;
                            self.inputs.inner.move_to_start()?;
                        }
                        self.loop_state = NestedLoopState::ScanInner;
                    }
                },
                NestedLoopState::ScanInner => match self.inputs.advance(JoinSide::Inner)? {
                    None => return Ok(false),
                    Some(true) => {
                        self.inner_seen = true;
                        let inner = self.inputs.inner.current_element()?;
                        if self.predicate.matches(self.combined.outer(), inner)? {
                            self.combined.set_inner(inner);
                            self.matched_outer.set(self.outer_index);
                            self.positioned = true;
                            return Ok(true);
                        }
                    }
                    Some(false) => {
                        if self.first_scan && !self.inner_seen {
                            return self.finish();
                        }
                        self.first_scan = false;
                        self.loop_state = NestedLoopState::AdvanceOuter;
                    }
                },
                NestedLoopState::Exhausted => return Ok(false),
            }
        }
    }

    fn current_element(&self) -> QuarryResult<&dyn Row> {
        if !self.positioned {
            return Err(not_positioned_error());
        }
        Ok(&self.combined)
    }

    fn move_to_start(&mut self) -> QuarryResult<()> {
        self.state.ensure_open()?;
        self.inputs.move_to_start()?;
        self.loop_state = NestedLoopState::Start;
        self.outer_index = 0;
        self.inner_seen = false;
        self.first_scan = true;
        self.matched_outer.clear();
        self.positioned = false;
        Ok(())
    }

    fn all_loaded(&self) -> bool {
        self.inputs.all_loaded()
    }

    fn load_next_batch(&mut self) -> LoadFuture {
        match self.state.ensure_open() {
            Ok(()) => self.inputs.load_next_batch(),
            Err(e) => load_failed(e),
        }
    }

    fn close(&mut self) {
        if self.state.close() {
            self.positioned = false;
            self.inputs.close();
        }
    }

    fn kill(&mut self, cause: QuarryError) {
        if self.state.kill(cause.clone()) {
            self.positioned = false;
            self.inputs.kill(cause);
        }
    }
}
