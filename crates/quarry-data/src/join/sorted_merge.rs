//! Sorted merge join.

use std::cmp::Ordering;

use quarry_common::{QuarryError, QuarryResult};

use super::{EquiJoinKeys, GrowableBitSet, JoinInputs, JoinPredicate, JoinSide};
use crate::batch::{
    load_failed, not_positioned_error, BatchIterator, BoxedBatchIterator, IteratorState,
    LoadFuture,
};
use crate::breaker::RowAccounting;
use crate::row::{extract_key, CombinedRow, OwnedRow, Row};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeState {
    Start,
    AdvanceOuter,
    /// Reading the next inner row into the lookahead.
    AdvanceInner,
    Compare,
    /// Collecting inner rows equal to `run_key`.
    FillRun,
    /// Emitting the current outer row with run rows from `next`.
    EmitRun {
        next: usize,
    },
    Exhausted,
}

/// Merges two inputs sorted ascending on the equality keys.
///
/// Inner rows sharing a key are buffered as one run; every outer row with
/// that key is paired with the whole run before the next outer row is read,
/// so output is in key order and outer-major within a key. Rows with a NULL
/// key are skipped. Inputs that are not sorted produce an incomplete result.
pub struct SortedMergeJoinBatchIterator {
    inputs: JoinInputs,
    outer_keys: Vec<usize>,
    inner_keys: Vec<usize>,
    residual: JoinPredicate,
    outer_key: Vec<Value>,
    /// Number of outer rows read so far.
    outer_position: usize,
    lookahead: OwnedRow,
    lookahead_key: Vec<Value>,
    has_lookahead: bool,
    run: Vec<OwnedRow>,
    run_key: Option<Vec<Value>>,
    loop_state: MergeState,
    combined: CombinedRow,
    accounting: Box<dyn RowAccounting>,
    matched_outer: GrowableBitSet,
    positioned: bool,
    state: IteratorState,
}

impl SortedMergeJoinBatchIterator {
    /// Creates the join.
    pub fn new(
        outer: BoxedBatchIterator,
        inner: BoxedBatchIterator,
        keys: EquiJoinKeys,
        accounting: Box<dyn RowAccounting>,
    ) -> Self {
        Self {
            inputs: JoinInputs::new(outer, inner),
            outer_keys: keys.outer,
            inner_keys: keys.inner,
            residual: keys.residual,
            outer_key: Vec::new(),
            outer_position: 0,
            lookahead: OwnedRow::default(),
            lookahead_key: Vec::new(),
            has_lookahead: false,
            run: Vec::new(),
            run_key: None,
            loop_state: MergeState::Start,
            combined: CombinedRow::new(),
            accounting,
            matched_outer: GrowableBitSet::new(),
            positioned: false,
            state: IteratorState::new(),
        }
    }

    /// Outer rows, by position, that matched at least one inner row so far.
    pub fn matched_outer(&self) -> &GrowableBitSet {
        &self.matched_outer
    }

    fn clear_run(&mut self) {
        self.run.clear();
        self.run_key = None;
        self.accounting.release();
    }

    fn finish(&mut self) -> QuarryResult<bool> {
        self.clear_run();
        self.has_lookahead = false;
        self.loop_state = MergeState::Exhausted;
        self.inputs.exhausted = true;
        Ok(false)
    }

    fn reset(&mut self) {
        self.run = Vec::new();
        self.run_key = None;
        self.accounting.release();
        self.has_lookahead = false;
        self.positioned = false;
    }
}

impl BatchIterator for SortedMergeJoinBatchIterator {
    fn move_next(&mut self) -> QuarryResult<bool> {
        self.state.ensure_open()?;
        self.positioned = false;
        loop {
            match self.loop_state {
                MergeState::Start => {
                    if self.inputs.known_empty() {
                        return self.finish();
                    }
                    self.loop_state = MergeState::AdvanceOuter;
                }
                MergeState::AdvanceOuter => match self.inputs.advance(JoinSide::Outer)? {
                    None => return Ok(false),
                    Some(false) => return self.finish(),
                    Some(true) => {
                        self.outer_position += 1;
                        let row = self.inputs.outer.current_element()?;
                        let Some(key) = extract_key(row, &self.outer_keys) else {
                            continue;
                        };
                        self.combined.set_outer(row);
                        if self.run_key.as_ref() == Some(&key) {
                            self.loop_state = MergeState::EmitRun { next: 0 };
                            continue;
                        }
                        self.outer_key = key;
                        if !self.run.is_empty() {
                            self.clear_run();
                        }
                        self.loop_state = if self.has_lookahead {
                            MergeState::Compare
                        } else {
                            MergeState::AdvanceInner
                        };
                    }
                },
                MergeState::AdvanceInner => match self.inputs.advance(JoinSide::Inner)? {
                    None => return Ok(false),
                    // no inner row left to match any later outer row
                    Some(false) => return self.finish(),
                    Some(true) => {
                        let row = self.inputs.inner.current_element()?;
                        let Some(key) = extract_key(row, &self.inner_keys) else {
                            continue;
                        };
                        self.lookahead.copy_from(row);
                        self.lookahead_key = key;
                        self.has_lookahead = true;
                        self.loop_state = MergeState::Compare;
                    }
                },
                MergeState::Compare => match self.outer_key.cmp(&self.lookahead_key) {
                    Ordering::Less => self.loop_state = MergeState::AdvanceOuter,
                    Ordering::Greater => {
                        self.has_lookahead = false;
                        self.loop_state = MergeState::AdvanceInner;
                    }
                    Ordering::Equal => {
                        self.accounting.account_for_and_maybe_break(&self.lookahead)?;
                        self.has_lookahead = false;
                        self.run.push(std::mem::take(&mut self.lookahead));
                        self.run_key = Some(std::mem::take(&mut self.lookahead_key));
                        self.loop_state = MergeState::FillRun;
                    }
                },
                MergeState::FillRun => match self.inputs.advance(JoinSide::Inner)? {
                    None => return Ok(false),
                    Some(false) => self.loop_state = MergeState::EmitRun { next: 0 },
                    Some(true) => {
                        let row = self.inputs.inner.current_element()?;
                        let Some(key) = extract_key(row, &self.inner_keys) else {
                            continue;
                        };
                        if self.run_key.as_ref() == Some(&key) {
                            self.accounting.account_for_and_maybe_break(row)?;
                            self.run.push(row.to_owned_row());
                        } else {
                            self.lookahead.copy_from(row);
                            self.lookahead_key = key;
                            self.has_lookahead = true;
                            self.loop_state = MergeState::EmitRun { next: 0 };
                        }
                    }
                },
                MergeState::EmitRun { next } => {
                    let mut idx = next;
                    while idx < self.run.len() {
                        let inner = &self.run[idx];
                        idx += 1;
                        if self.residual.matches(self.combined.outer(), inner)? {
                            self.combined.set_inner(inner);
                            self.matched_outer.set(self.outer_position - 1);
                            self.loop_state = MergeState::EmitRun { next: idx };
                            self.positioned = true;
                            return Ok(true);
                        }
                    }
                    self.loop_state = MergeState::AdvanceOuter;
                }
                MergeState::Exhausted => return Ok(false),
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
        self.reset();
        self.outer_position = 0;
        self.loop_state = MergeState::Start;
        self.matched_outer.clear();
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
            self.reset();
            self.inputs.close();
        }
    }

    fn kill(&mut self, cause: QuarryError) {
        if self.state.kill(cause.clone()) {
            self.reset();
            self.inputs.kill(cause);
        }
    }
}
