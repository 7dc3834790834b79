//! Row representation.
//!
//! A [`Row`] is a positional view over column values. Iterators hand out
//! rows borrowed from their internal slot: the borrow ends with the next
//! call that advances the iterator, so anything that has to outlive one
//! step must be copied out with [`Row::materialize`] or [`Row::to_owned_row`].

mod combined;

pub use combined::{CombinedRow, CombinedRowRef};

use std::fmt;
use std::sync::Arc;

use quarry_common::QuarryResult;

use crate::value::Value;

/// Predicate evaluated against a single row.
pub type RowPredicate = Arc<dyn Fn(&dyn Row) -> QuarryResult<bool> + Send + Sync>;

/// Positional view over column values.
pub trait Row: fmt::Debug + Send + Sync {
    /// Returns the number of columns.
    fn num_columns(&self) -> usize;

    /// Returns the value at `index`, or `None` if out of bounds.
    fn get(&self, index: usize) -> Option<&Value>;

    /// Copies every column into a freshly allocated vector.
    fn materialize(&self) -> Vec<Value> {
        (0..self.num_columns())
            .map(|i| self.get(i).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Copies the row into an [`OwnedRow`].
    fn to_owned_row(&self) -> OwnedRow {
        OwnedRow::new(self.materialize())
    }

    /// Estimated memory footprint in bytes.
    fn estimate_size(&self) -> u64 {
        (0..self.num_columns())
            .filter_map(|i| self.get(i))
            .map(Value::estimate_size)
            .sum()
    }
}

/// The row with zero columns.
pub static EMPTY_ROW: OwnedRow = OwnedRow { values: Vec::new() };

/// A row that owns its values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct OwnedRow {
    values: Vec<Value>,
}

impl OwnedRow {
    /// Creates a new row with the given values.
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Creates a row with all NULL values.
    pub fn nulls(num_columns: usize) -> Self {
        Self {
            values: vec![Value::Null; num_columns],
        }
    }

    /// Replaces the contents with a copy of `row`, reusing the allocation.
    pub fn copy_from(&mut self, row: &dyn Row) {
        self.values.clear();
        self.values.extend(
            (0..row.num_columns()).map(|i| row.get(i).cloned().unwrap_or(Value::Null)),
        );
    }

    /// Returns the values as a slice.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consumes the row and returns the values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Projects this row to include only the specified columns.
    pub fn project(&self, indices: &[usize]) -> OwnedRow {
        let values = indices
            .iter()
            .map(|&i| self.values.get(i).cloned().unwrap_or(Value::Null))
            .collect();
        OwnedRow { values }
    }
}

impl Row for OwnedRow {
    #[inline]
    fn num_columns(&self) -> usize {
        self.values.len()
    }

    #[inline]
    fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    fn materialize(&self) -> Vec<Value> {
        self.values.clone()
    }

    fn to_owned_row(&self) -> OwnedRow {
        self.clone()
    }
}

impl From<Vec<Value>> for OwnedRow {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

impl fmt::Display for OwnedRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, ")")
    }
}

/// Extracts the values at `indices`, or `None` if any of them is NULL.
///
/// NULL never equals anything, so rows with a NULL key never join.
pub fn extract_key(row: &dyn Row, indices: &[usize]) -> Option<Vec<Value>> {
    let mut key = Vec::with_capacity(indices.len());
    for &i in indices {
        match row.get(i) {
            Some(v) if !v.is_null() => key.push(v.clone()),
            _ => return None,
        }
    }
    Some(key)
}
