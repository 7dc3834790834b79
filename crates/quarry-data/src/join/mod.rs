//! Join batch iterators.
//!
//! Every join composes an outer and an inner [`BatchIterator`] and emits a
//! [`CombinedRow`](crate::row::CombinedRow) (outer columns, then inner
//! columns) for each pair accepted by a [`JoinPredicate`]. The algorithm is
//! picked by the caller through [`JoinStrategy`]:
//!
//! | Strategy | Inner rewinds | Memory | Output order |
//! |----------|---------------|--------|--------------|
//! | `NestedLoop` | one per outer row | none | outer-major |
//! | `BlockNestedLoop` | one per outer block | one block | block-major |
//! | `Hash` | one per block | one hashed block | block-major |
//! | `SortedMerge` | none | one duplicate-key run | key order |
//!
//! Block-major means: per block, rows follow the scanned side, and per
//! scanned row the buffered rows in arrival order.
//!
//! If either side is known to be empty the join is empty and neither side
//! is advanced.

mod bitset;
mod block_nested_loop;
mod hash_join;
mod nested_loop;
mod sorted_merge;

pub use bitset::GrowableBitSet;
pub use block_nested_loop::BlockNestedLoopBatchIterator;
pub use hash_join::HashJoinBatchIterator;
pub use nested_loop::NestedLoopBatchIterator;
pub use sorted_merge::SortedMergeJoinBatchIterator;

use std::fmt;
use std::sync::Arc;

use quarry_common::config::{JoinConfig, JoinStrategyKind};
use quarry_common::constants::DEFAULT_JOIN_BLOCK_SIZE;
use quarry_common::{QuarryError, QuarryResult};

use crate::batch::{all_loaded_error, load_failed, BatchIterator, BoxedBatchIterator, LoadFuture};
use crate::breaker::RowAccounting;
use crate::row::{CombinedRowRef, Row, RowPredicate};

// =============================================================================
// Predicate
// =============================================================================

/// Join condition over an (outer, inner) row pair.
#[derive(Clone)]
pub enum JoinPredicate {
    /// Every pair matches (cross join).
    Always,
    /// Outer column equals inner column. NULL never equals anything.
    Equals {
        /// Column of the outer row.
        outer: usize,
        /// Column of the inner row.
        inner: usize,
    },
    /// All conjuncts hold.
    And(Vec<JoinPredicate>),
    /// Arbitrary condition over the combined row.
    Custom(RowPredicate),
}

impl JoinPredicate {
    /// Equality of one outer and one inner column.
    pub fn equals(outer: usize, inner: usize) -> Self {
        Self::Equals { outer, inner }
    }

    /// Conjunction of `predicates`.
    pub fn and(predicates: Vec<JoinPredicate>) -> Self {
        Self::And(predicates)
    }

    /// Condition evaluated against the combined row.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&dyn Row) -> QuarryResult<bool> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Evaluates the predicate for one pair.
    pub fn matches(&self, outer: &dyn Row, inner: &dyn Row) -> QuarryResult<bool> {
        match self {
            Self::Always => Ok(true),
            Self::Equals {
                outer: o,
                inner: i,
            } => Ok(match (outer.get(*o), inner.get(*i)) {
                (Some(a), Some(b)) => !a.is_null() && !b.is_null() && a == b,
                _ => false,
            }),
            Self::And(predicates) => {
                for predicate in predicates {
                    if !predicate.matches(outer, inner)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Custom(f) => f(&CombinedRowRef::new(outer, inner)),
        }
    }

    /// Splits a top-level conjunction into equality keys and the remaining
    /// conditions. Returns `None` when there is no equality to hash or merge
    /// on.
    pub fn equi_keys(&self) -> Option<EquiJoinKeys> {
        let mut outer = Vec::new();
        let mut inner = Vec::new();
        let mut residual = Vec::new();
        self.collect_conjuncts(&mut outer, &mut inner, &mut residual);
        if outer.is_empty() {
            return None;
        }
        let residual = match residual.len() {
            0 => JoinPredicate::Always,
            1 => residual.remove(0),
            _ => JoinPredicate::And(residual),
        };
        Some(EquiJoinKeys {
            outer,
            inner,
            residual,
        })
    }

    fn collect_conjuncts(
        &self,
        outer: &mut Vec<usize>,
        inner: &mut Vec<usize>,
        residual: &mut Vec<JoinPredicate>,
    ) {
        match self {
            Self::Always => {}
            Self::Equals {
                outer: o,
                inner: i,
            } => {
                outer.push(*o);
                inner.push(*i);
            }
            Self::And(predicates) => {
                for predicate in predicates {
                    predicate.collect_conjuncts(outer, inner, residual);
                }
            }
            Self::Custom(_) => residual.push(self.clone()),
        }
    }
}

impl fmt::Debug for JoinPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "Always"),
            Self::Equals { outer, inner } => write!(f, "outer[{}] = inner[{}]", outer, inner),
            Self::And(predicates) => f.debug_tuple("And").field(predicates).finish(),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Equality keys extracted from a join predicate.
#[derive(Debug, Clone)]
pub struct EquiJoinKeys {
    /// Key columns of the outer side.
    pub outer: Vec<usize>,
    /// Key columns of the inner side, pairwise equal to `outer`.
    pub inner: Vec<usize>,
    /// Conditions that still have to hold for pairs with equal keys.
    pub residual: JoinPredicate,
}

// =============================================================================
// Strategy
// =============================================================================

/// Join algorithm, chosen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStrategy {
    /// Rewind and scan the inner side for every outer row.
    NestedLoop,
    /// Buffer `block_size` outer rows per inner scan.
    BlockNestedLoop {
        /// Rows per block.
        block_size: usize,
    },
    /// Hash `block_size` rows of the build side and probe with the other.
    Hash {
        /// Rows per block.
        block_size: usize,
    },
    /// Merge inputs sorted ascending on the join keys.
    SortedMerge,
}

impl JoinStrategy {
    /// Builds the configured default strategy.
    pub fn from_config(config: &JoinConfig) -> Self {
        match config.strategy {
            JoinStrategyKind::NestedLoop => Self::NestedLoop,
            JoinStrategyKind::BlockNestedLoop => Self::BlockNestedLoop {
                block_size: config.block_size,
            },
            JoinStrategyKind::Hash => Self::Hash {
                block_size: config.block_size,
            },
            JoinStrategyKind::SortedMerge => Self::SortedMerge,
        }
    }

    fn block_size(self) -> usize {
        match self {
            Self::BlockNestedLoop { block_size } | Self::Hash { block_size } => block_size.max(1),
            Self::NestedLoop | Self::SortedMerge => DEFAULT_JOIN_BLOCK_SIZE,
        }
    }
}

/// Creates a join of `outer` and `inner` using `strategy`.
///
/// Hash and sorted-merge joins need equality keys; without them the join
/// falls back to a block nested loop.
pub fn join(
    outer: BoxedBatchIterator,
    inner: BoxedBatchIterator,
    predicate: JoinPredicate,
    strategy: JoinStrategy,
    accounting: Box<dyn RowAccounting>,
) -> BoxedBatchIterator {
    match strategy {
        JoinStrategy::NestedLoop => Box::new(NestedLoopBatchIterator::new(outer, inner, predicate)),
        JoinStrategy::BlockNestedLoop { block_size } => Box::new(
            BlockNestedLoopBatchIterator::new(outer, inner, predicate, block_size, accounting),
        ),
        JoinStrategy::Hash { block_size } => match predicate.equi_keys() {
            Some(keys) => Box::new(HashJoinBatchIterator::new(
                outer, inner, keys, block_size, accounting,
            )),
            None => fallback(outer, inner, predicate, strategy, accounting),
        },
        JoinStrategy::SortedMerge => match predicate.equi_keys() {
            Some(keys) => Box::new(SortedMergeJoinBatchIterator::new(
                outer, inner, keys, accounting,
            )),
            None => fallback(outer, inner, predicate, strategy, accounting),
        },
    }
}

/// Cross join: every outer row with every inner row.
pub fn cross_join(outer: BoxedBatchIterator, inner: BoxedBatchIterator) -> BoxedBatchIterator {
    Box::new(NestedLoopBatchIterator::new(
        outer,
        inner,
        JoinPredicate::Always,
    ))
}

fn fallback(
    outer: BoxedBatchIterator,
    inner: BoxedBatchIterator,
    predicate: JoinPredicate,
    strategy: JoinStrategy,
    accounting: Box<dyn RowAccounting>,
) -> BoxedBatchIterator {
    tracing::debug!(
        "{:?} join needs equality keys, falling back to block nested loop for {:?}",
        strategy,
        predicate
    );
    Box::new(BlockNestedLoopBatchIterator::new(
        outer,
        inner,
        predicate,
        strategy.block_size(),
        accounting,
    ))
}

// =============================================================================
// Shared plumbing
// =============================================================================

/// One side of a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinSide {
    /// The outer (left) side.
    Outer,
    /// The inner (right) side.
    Inner,
}

/// The two inputs of a join and the side that last needed data.
struct JoinInputs {
    outer: BoxedBatchIterator,
    inner: BoxedBatchIterator,
    active: JoinSide,
    exhausted: bool,
}

impl JoinInputs {
    fn new(outer: BoxedBatchIterator, inner: BoxedBatchIterator) -> Self {
        Self {
            outer,
            inner,
            active: JoinSide::Outer,
            exhausted: false,
        }
    }

    fn side(&mut self, side: JoinSide) -> &mut BoxedBatchIterator {
        match side {
            JoinSide::Outer => &mut self.outer,
            JoinSide::Inner => &mut self.inner,
        }
    }

    fn get(&self, side: JoinSide) -> &BoxedBatchIterator {
        match side {
            JoinSide::Outer => &self.outer,
            JoinSide::Inner => &self.inner,
        }
    }

    /// True if either side reports zero rows upfront.
    fn known_empty(&self) -> bool {
        self.outer.size_hint() == Some(0) || self.inner.size_hint() == Some(0)
    }

    /// Advances `side`. `Ok(None)` means the side needs a batch load.
    fn advance(&mut self, side: JoinSide) -> QuarryResult<Option<bool>> {
        self.active = side;
        let it = self.side(side);
        if it.move_next()? {
            Ok(Some(true))
        } else if it.all_loaded() {
            Ok(Some(false))
        } else {
            Ok(None)
        }
    }

    fn all_loaded(&self) -> bool {
        self.exhausted
            || match self.active {
                JoinSide::Outer => self.outer.all_loaded(),
                JoinSide::Inner => self.inner.all_loaded(),
            }
    }

    fn load_next_batch(&mut self) -> LoadFuture {
        if self.all_loaded() {
            return load_failed(all_loaded_error());
        }
        self.side(self.active).load_next_batch()
    }

    fn move_to_start(&mut self) -> QuarryResult<()> {
        self.outer.move_to_start()?;
        self.inner.move_to_start()?;
        self.active = JoinSide::Outer;
        self.exhausted = false;
        Ok(())
    }

    fn close(&mut self) {
        self.outer.close();
        self.inner.close();
    }

    fn kill(&mut self, cause: QuarryError) {
        self.outer.kill(cause.clone());
        self.inner.kill(cause);
    }
}
