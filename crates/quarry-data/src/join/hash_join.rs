//! Hash-assisted nested loop join.

use std::collections::HashMap;

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
enum HashState {
    Start,
    FillBlock,
    AdvanceProbe,
    /// Emitting candidates of the current probe row from `next`.
    Probe {
        next: usize,
    },
    Exhausted,
}

/// Hashes blocks of the build side on the equality keys and probes each
/// block with one scan of the other side.
///
/// The outer side is the build side unless both sizes are known upfront and
/// the inner side is smaller. Rows with a NULL key never match and are not
/// buffered. Conditions besides the equality keys are checked on every
/// candidate pair.
pub struct HashJoinBatchIterator {
    inputs: JoinInputs,
    build_side: JoinSide,
    build_keys: Vec<usize>,
    probe_keys: Vec<usize>,
    residual: JoinPredicate,
    block_size: usize,
    /// Buffered build rows with their position in the build stream.
    block: Vec<(usize, OwnedRow)>,
    table: HashMap<Vec<Value>, Vec<usize>>,
    build_position: usize,
    build_done: bool,
    probe_position: usize,
    probe_seen: bool,
    first_block: bool,
    candidates: Vec<usize>,
    loop_state: HashState,
    combined: CombinedRow,
    accounting: Box<dyn RowAccounting>,
    matched_outer: GrowableBitSet,
    positioned: bool,
    state: IteratorState,
}

impl HashJoinBatchIterator {
    /// Creates the join; `block_size` is raised to at least 1.
    pub fn new(
        outer: BoxedBatchIterator,
        inner: BoxedBatchIterator,
        keys: EquiJoinKeys,
        block_size: usize,
        accounting: Box<dyn RowAccounting>,
    ) -> Self {
        let build_side = match (outer.size_hint(), inner.size_hint()) {
            (Some(o), Some(i)) if i < o => JoinSide::Inner,
            _ => JoinSide::Outer,
        };
        let (build_keys, probe_keys) = match build_side {
            JoinSide::Outer => (keys.outer, keys.inner),
            JoinSide::Inner => (keys.inner, keys.outer),
        };
        Self {
            inputs: JoinInputs::new(outer, inner),
            build_side,
            build_keys,
            probe_keys,
            residual: keys.residual,
            block_size: block_size.max(1),
            block: Vec::new(),
            table: HashMap::new(),
            build_position: 0,
            build_done: false,
            probe_position: 0,
            probe_seen: false,
            first_block: true,
            candidates: Vec::new(),
            loop_state: HashState::Start,
            combined: CombinedRow::new(),
            accounting,
            matched_outer: GrowableBitSet::new(),
            positioned: false,
            state: IteratorState::new(),
        }
    }

    /// The side whose rows are hashed.
    pub fn build_side(&self) -> JoinSide {
        self.build_side
    }

    /// Outer rows, by position, that matched at least one inner row so far.
    pub fn matched_outer(&self) -> &GrowableBitSet {
        &self.matched_outer
    }

    fn probe_side(&self) -> JoinSide {
        match self.build_side {
            JoinSide::Outer => JoinSide::Inner,
            JoinSide::Inner => JoinSide::Outer,
        }
    }

    fn clear_block(&mut self) {
        self.block.clear();
        self.table.clear();
        self.candidates.clear();
        self.accounting.release();
    }

    fn finish(&mut self) -> QuarryResult<bool> {
        self.clear_block();
        self.loop_state = HashState::Exhausted;
        self.inputs.exhausted = true;
        Ok(false)
    }

    /// Reads build rows into the block. `Ok(false)` means a load is needed.
    fn fill_block(&mut self) -> QuarryResult<bool> {
        let build_side = self.build_side;
        while self.block.len() < self.block_size {
            match self.inputs.advance(build_side)? {
                None => return Ok(false),
                Some(true) => {
                    let position = self.build_position;
                    self.build_position += 1;
                    let row = self.inputs.get(build_side).current_element()?;
                    let Some(key) = extract_key(row, &self.build_keys) else {
                        continue;
                    };
                    self.accounting.account_for_and_maybe_break(row)?;
                    let owned = row.to_owned_row();
                    self.table.entry(key).or_default().push(self.block.len());
                    self.block.push((position, owned));
                }
                Some(false) => {
                    self.build_done = true;
                    break;
                }
            }
        }
        Ok(true)
    }
}

impl BatchIterator for HashJoinBatchIterator {
    fn move_next(&mut self) -> QuarryResult<bool> {
        self.state.ensure_open()?;
        self.positioned = false;
        let probe_side = self.probe_side();
        loop {
            match self.loop_state {
                HashState::Start => {
                    if self.inputs.known_empty() {
                        return self.finish();
                    }
                    self.loop_state = HashState::FillBlock;
                }
                HashState::FillBlock => {
                    if !self.fill_block()? {
                        return Ok(false);
                    }
                    if self.block.is_empty() {
                        return self.finish();
                    }
                    if !self.first_block {
                        self.inputs.side(probe_side).move_to_start()?;
                    }
                    self.probe_position = 0;
                    self.loop_state = HashState::AdvanceProbe;
                }
                HashState::AdvanceProbe => match self.inputs.advance(probe_side)? {
                    None => return Ok(false),
                    Some(true) => {
                        self.probe_seen = true;
                        self.probe_position += 1;
                        let row = self.inputs.get(probe_side).current_element()?;
                        self.candidates.clear();
                        if let Some(key) = extract_key(row, &self.probe_keys) {
                            if let Some(matches) = self.table.get(&key) {
                                self.candidates.extend_from_slice(matches);
                            }
                        }
                        if !self.candidates.is_empty() {
                            match probe_side {
                                JoinSide::Outer => self.combined.set_outer(row),
                                JoinSide::Inner => self.combined.set_inner(row),
                            }
                            self.loop_state = HashState::Probe { next: 0 };
                        }
                    }
                    Some(false) => {
                        if self.first_block && !self.probe_seen {
                            return self.finish();
                        }
                        self.first_block = false;
                        if self.build_done {
                            return self.finish();
                        }
                        self.clear_block();
                        self.loop_state = HashState::FillBlock;
                    }
                },
                HashState::Probe { next } => {
                    let mut idx = next;
                    while idx < self.candidates.len() {
                        let (build_position, build_row) = &self.block[self.candidates[idx]];
                        idx += 1;
                        let (outer, inner): (&dyn Row, &dyn Row) = match self.build_side {
                            JoinSide::Outer => (build_row, self.combined.inner()),
                            JoinSide::Inner => (self.combined.outer(), build_row),
                        };
                        if !self.residual.matches(outer, inner)? {
                            continue;
                        }
                        let outer_position = match self.build_side {
                            JoinSide::Outer => *build_position,
                            JoinSide::Inner => self.probe_position - 1,
                        };
                        match self.build_side {
                            JoinSide::Outer => self.combined.set_outer(build_row),
                            JoinSide::Inner => self.combined.set_inner(build_row),
                        }
                        self.matched_outer.set(outer_position);
                        self.loop_state = HashState::Probe { next: idx };
                        self.positioned = true;
                        return Ok(true);
                    }
                    self.loop_state = HashState::AdvanceProbe;
                }
                HashState::Exhausted => return Ok(false),
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
        self.clear_block();
        self.build_position = 0;
        self.build_done = false;
        self.probe_position = 0;
        self.probe_seen = false;
        self.first_block = true;
        self.loop_state = HashState::Start;
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
            self.clear_block();
            self.inputs.close();
        }
    }

    fn kill(&mut self, cause: QuarryError) {
        if self.state.kill(cause.clone()) {
            self.positioned = false;
            self.clear_block();
            self.inputs.kill(cause);
        }
    }
}
