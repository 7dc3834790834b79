//! Block nested loop join.

use quarry_common::{QuarryError, QuarryResult};

use super::{GrowableBitSet, JoinInputs, JoinPredicate, JoinSide};
use crate::batch::{
    load_failed, not_positioned_error, BatchIterator, BoxedBatchIterator, IteratorState,
    LoadFuture,
};
use crate::breaker::RowAccounting;
use crate::row::{CombinedRow, OwnedRow, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Start,
    FillBlock,
    /// Reading the next inner row for the current block.
    AdvanceInner,
    /// Testing the current inner row against buffered rows from `next`.
    Probe { next: usize },
    Exhausted,
}

/// Buffers up to `block_size` outer rows, then scans the inner side once per
/// block, testing every inner row against the whole block.
///
/// Buffered rows are charged to the row accounting before they are added and
/// released when the block is discarded, closed or killed.
pub struct BlockNestedLoopBatchIterator {
    inputs: JoinInputs,
    predicate: JoinPredicate,
    block_size: usize,
    block: Vec<OwnedRow>,
    /// Outer stream position of the first row in `block`.
    block_start: usize,
    outer_done: bool,
    inner_seen: bool,
    first_block: bool,
    loop_state: BlockState,
    combined: CombinedRow,
    accounting: Box<dyn RowAccounting>,
    matched_outer: GrowableBitSet,
    positioned: bool,
    state: IteratorState,
}

impl BlockNestedLoopBatchIterator {
    /// Creates the join; `block_size` is raised to at least 1.
    pub fn new(
        outer: BoxedBatchIterator,
        inner: BoxedBatchIterator,
        predicate: JoinPredicate,
        block_size: usize,
        accounting: Box<dyn RowAccounting>,
    ) -> Self {
        Self {
            inputs: JoinInputs::new(outer, inner),
            predicate,
            block_size: block_size.max(1),
            block: Vec::new(),
            block_start: 0,
            outer_done: false,
            inner_seen: false,
            first_block: true,
            loop_state: BlockState::Start,
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

    fn clear_block(&mut self) {
        self.block_start += self.block.len();
        self.block.clear();
        self.accounting.release();
    }

    fn finish(&mut self) -> QuarryResult<bool> {
        self.block.clear();
        self.accounting.release();
        self.loop_state = BlockState::Exhausted;
        self.inputs.exhausted = true;
        Ok(false)
    }
}

impl BatchIterator for BlockNestedLoopBatchIterator {
    fn move_next(&mut self) -> QuarryResult<bool> {
        self.state.ensure_open()?;
        self.positioned = false;
        loop {
            match self.loop_state {
                BlockState::Start => {
                    if self.inputs.known_empty() {
                        return self.finish();
                    }
                    self.loop_state = BlockState::FillBlock;
                }
                BlockState::FillBlock => {
                    while self.block.len() < self.block_size {
                        match self.inputs.advance(JoinSide::Outer)? {
                            None => return Ok(false),
                            Some(true) => {
                                let row = self.inputs.outer.current_element()?;
                                self.accounting.account_for_and_maybe_break(row)?;
                                self.block.push(row.to_owned_row());
                            }
                            Some(false) => {
                                self.outer_done = true;
                                break;
                            }
                        }
                    }
                    if self.block.is_empty() {
                        return self.finish();
                    }
                    if !self.first_block {
                        self.inputs.inner.move_to_start()?;
                    }
                    self.loop_state = BlockState::AdvanceInner;
                }
                BlockState::AdvanceInner => match self.inputs.advance(JoinSide::Inner)? {
                    None => return Ok(false),
                    Some(true) => {
                        self.inner_seen = true;
                        self.combined
                            .set_inner(self.inputs.inner.current_element()?);
                        self.loop_state = BlockState::Probe { next: 0 };
                    }
                    Some(false) => {
                        if self.first_block && !self.inner_seen {
                            return self.finish();
                        }
                        self.first_block = false;
                        if self.outer_done {
                            return self.finish();
                        }
                        self.clear_block();
                        self.loop_state = BlockState::FillBlock;
                    }
                },
                BlockState::Probe { next } => {
                    let mut idx = next;
                    while idx < self.block.len() {
                        let outer = &self.block[idx];
                        idx += 1;
                        if self.predicate.matches(outer, self.combined.inner())? {
                            self.combined.set_outer(outer);
                            self.matched_outer.set(self.block_start + idx - 1);
                            self.loop_state = BlockState::Probe { next: idx };
                            self.positioned = true;
                            return Ok(true);
                        }
                    }
                    self.loop_state = BlockState::AdvanceInner;
                }
                BlockState::Exhausted => return Ok(false),
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
        self.block.clear();
        self.accounting.release();
        self.block_start = 0;
        self.outer_done = false;
        self.inner_seen = false;
        self.first_block = true;
        self.loop_state = BlockState::Start;
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
            self.block = Vec::new();
            self.accounting.release();
            self.inputs.close();
        }
    }

    fn kill(&mut self, cause: QuarryError) {
        if self.state.kill(cause.clone()) {
            self.positioned = false;
            self.block = Vec::new();
            self.accounting.release();
            self.inputs.kill(cause);
        }
    }
}
