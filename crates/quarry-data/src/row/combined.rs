//! Rows spliced from an outer and an inner row.

use super::{OwnedRow, Row};
use crate::value::Value;

/// Row produced by a join: the outer row's columns followed by the inner's.
///
/// Joins keep one `CombinedRow` as their output slot and overwrite its
/// halves in place as they advance.
#[derive(Debug, Clone, Default)]
pub struct CombinedRow {
    outer: OwnedRow,
    inner: OwnedRow,
}

impl CombinedRow {
    /// Creates an empty combined row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the outer half.
    #[inline]
    pub fn set_outer(&mut self, row: &dyn Row) {
        self.outer.copy_from(row);
    }

    /// Overwrites the inner half.
    #[inline]
    pub fn set_inner(&mut self, row: &dyn Row) {
        self.inner.copy_from(row);
    }

    /// Returns the outer half.
    pub fn outer(&self) -> &OwnedRow {
        &self.outer
    }

    /// Returns the inner half.
    pub fn inner(&self) -> &OwnedRow {
        &self.inner
    }
}

impl Row for CombinedRow {
    #[inline]
    fn num_columns(&self) -> usize {
        self.outer.num_columns() + self.inner.num_columns()
    }

    #[inline]
    fn get(&self, index: usize) -> Option<&Value> {
        route(&self.outer, &self.inner, index)
    }
}

/// Borrowed counterpart of [`CombinedRow`], used to evaluate join
/// predicates without copying either side.
#[derive(Debug, Clone, Copy)]
pub struct CombinedRowRef<'a> {
    outer: &'a dyn Row,
    inner: &'a dyn Row,
}

impl<'a> CombinedRowRef<'a> {
    /// Creates a view over `outer` followed by `inner`.
    pub fn new(outer: &'a dyn Row, inner: &'a dyn Row) -> Self {
        Self { outer, inner }
    }

    /// Returns the outer half.
    pub fn outer(&self) -> &'a dyn Row {
        self.outer
    }

    /// Returns the inner half.
    pub fn inner(&self) -> &'a dyn Row {
        self.inner
    }
}

impl Row for CombinedRowRef<'_> {
    #[inline]
    fn num_columns(&self) -> usize {
        self.outer.num_columns() + self.inner.num_columns()
    }

    #[inline]
    fn get(&self, index: usize) -> Option<&Value> {
        route(self.outer, self.inner, index)
    }
}

#[inline]
fn route<'r>(outer: &'r dyn Row, inner: &'r dyn Row, index: usize) -> Option<&'r Value> {
    let split = outer.num_columns();
    if index < split {
        outer.get(index)
    } else {
        inner.get(index - split)
    }
}
