//! # quarry-data
//!
//! Rows, batch iterators and join algorithms for Quarry.
//!
//! - **Values and rows**: [`Value`], the [`Row`] view trait, [`OwnedRow`] and
//!   the [`CombinedRow`] produced by joins
//! - **Batch iterators**: the pull-based [`BatchIterator`] protocol and its
//!   composition operators (filter, projection, limit, concatenation,
//!   asynchronously fed buckets)
//! - **Joins**: plain and block nested loop, hash and sorted-merge joins
//! - **Breaker**: per-query memory accounting for buffering operators
//!
//! ## Example
//!
//! ```rust
//! use quarry_data::batch::{collect_all, InMemoryBatchIterator};
//! use quarry_data::join::{join, JoinPredicate, JoinStrategy};
//! use quarry_data::breaker::NoopRowAccounting;
//! use quarry_data::{OwnedRow, Value};
//!
//! let outer = InMemoryBatchIterator::new(vec![
//!     OwnedRow::new(vec![Value::Int(1)]),
//!     OwnedRow::new(vec![Value::Int(2)]),
//! ]);
//! let inner = InMemoryBatchIterator::new(vec![OwnedRow::new(vec![Value::Int(2)])]);
//!
//! let mut joined = join(
//!     Box::new(outer),
//!     Box::new(inner),
//!     JoinPredicate::equals(0, 0),
//!     JoinStrategy::Hash { block_size: 16 },
//!     Box::new(NoopRowAccounting),
//! );
//! let rows = futures::executor::block_on(collect_all(&mut joined)).unwrap();
//! assert_eq!(rows, vec![vec![Value::Int(2), Value::Int(2)]]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod batch;
pub mod breaker;
pub mod join;
pub mod row;
pub mod value;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use batch::{BatchIterator, BoxedBatchIterator, KillSwitch, LoadFuture};
pub use row::{CombinedRow, OwnedRow, Row, RowPredicate};
pub use value::Value;
