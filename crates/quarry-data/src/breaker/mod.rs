//! Memory accounting for buffering operators.
//!
//! Operators that buffer rows (block nested loop blocks, hash join build
//! tables, sorted-merge duplicate runs) charge the estimated row size to a
//! per-query [`CircuitBreaker`] before buffering, and release it when the
//! buffer is cleared or the operator is closed or killed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use quarry_common::config::BreakerConfig;
use quarry_common::constants::QUERY_BREAKER_NAME;
use quarry_common::{QuarryError, QuarryResult};

use crate::row::Row;

/// A named memory budget shared by every operator of one query.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    limit: u64,
    overhead: f64,
    used: AtomicU64,
}

impl CircuitBreaker {
    /// Creates a breaker with `limit` bytes.
    pub fn new(name: impl Into<String>, limit: u64) -> Self {
        Self::with_overhead(name, limit, 1.0)
    }

    /// Creates a breaker that multiplies every estimate by `overhead`.
    pub fn with_overhead(name: impl Into<String>, limit: u64, overhead: f64) -> Self {
        Self {
            name: name.into(),
            limit,
            overhead,
            used: AtomicU64::new(0),
        }
    }

    /// Creates the per-query breaker from configuration.
    pub fn from_config(config: &BreakerConfig) -> Self {
        Self::with_overhead(
            QUERY_BREAKER_NAME,
            config.query_limit_bytes,
            config.overhead,
        )
    }

    /// Creates a breaker that never trips.
    pub fn unlimited(name: impl Into<String>) -> Self {
        Self::new(name, u64::MAX)
    }

    /// Charges `bytes` (scaled by the overhead). Fails without charging
    /// anything if the limit would be exceeded. Returns the bytes charged.
    pub fn add_estimate_and_maybe_break(&self, bytes: u64, label: &str) -> QuarryResult<u64> {
        let bytes = (bytes as f64 * self.overhead).ceil() as u64;
        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            let wanted = current.saturating_add(bytes);
            if wanted > self.limit {
                tracing::debug!(
                    "breaker [{}] tripped for [{}]: {} > {}",
                    self.name,
                    label,
                    wanted,
                    self.limit
                );
                return Err(QuarryError::CircuitBreaking {
                    breaker: self.name.clone(),
                    label: label.to_string(),
                    wanted,
                    limit: self.limit,
                });
            }
            match self.used.compare_exchange_weak(
                current,
                wanted,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(bytes),
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns `bytes` previously charged.
    pub fn release(&self, bytes: u64) {
        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(bytes);
            match self.used.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Bytes currently charged.
    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    /// Configured limit.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Charges buffered rows against a memory budget.
pub trait RowAccounting: fmt::Debug + Send {
    /// Charges `row` before it is buffered; fails if the budget forbids it.
    fn account_for_and_maybe_break(&mut self, row: &dyn Row) -> QuarryResult<()>;

    /// Releases everything charged so far.
    fn release(&mut self);
}

/// Accounting that never charges anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRowAccounting;

impl RowAccounting for NoopRowAccounting {
    fn account_for_and_maybe_break(&mut self, _row: &dyn Row) -> QuarryResult<()> {
        Ok(())
    }

    fn release(&mut self) {}
}

/// Accounting backed by a [`CircuitBreaker`]. Whatever is still charged is
/// released on drop.
#[derive(Debug)]
pub struct BreakingRowAccounting {
    breaker: Arc<CircuitBreaker>,
    label: String,
    accounted: u64,
}

impl BreakingRowAccounting {
    /// Creates accounting charging `breaker`, labelling errors with `label`.
    pub fn new(breaker: Arc<CircuitBreaker>, label: impl Into<String>) -> Self {
        Self {
            breaker,
            label: label.into(),
            accounted: 0,
        }
    }

    /// Bytes currently charged by this instance.
    pub fn accounted(&self) -> u64 {
        self.accounted
    }
}

impl RowAccounting for BreakingRowAccounting {
    fn account_for_and_maybe_break(&mut self, row: &dyn Row) -> QuarryResult<()> {
        let charged = self
            .breaker
            .add_estimate_and_maybe_break(row.estimate_size(), &self.label)?;
        self.accounted += charged;
        Ok(())
    }

    fn release(&mut self) {
        if self.accounted > 0 {
            self.breaker.release(self.accounted);
            self.accounted = 0;
        }
    }
}

impl Drop for BreakingRowAccounting {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::OwnedRow;
    use crate::value::Value;

    #[test]
    fn test_breaker_charges_and_releases() {
        let breaker = CircuitBreaker::new("query", 100);
        assert_eq!(breaker.add_estimate_and_maybe_break(60, "a").unwrap(), 60);
        assert_eq!(breaker.used(), 60);

        let err = breaker.add_estimate_and_maybe_break(50, "b").unwrap_err();
        assert!(matches!(
            err,
            QuarryError::CircuitBreaking {
                wanted: 110,
                limit: 100,
                ..
            }
        ));
        assert_eq!(breaker.used(), 60, "failed charge must not be kept");

        breaker.release(60);
        assert_eq!(breaker.used(), 0);
    }

    #[test]
    fn test_breaker_overhead() {
        let breaker = CircuitBreaker::with_overhead("query", 100, 2.0);
        assert_eq!(breaker.add_estimate_and_maybe_break(30, "a").unwrap(), 60);
        assert!(breaker.add_estimate_and_maybe_break(30, "a").is_err());
    }

    #[test]
    fn test_breaking_row_accounting_releases_on_drop() {
        let breaker = Arc::new(CircuitBreaker::new("query", 1000));
        let row = OwnedRow::new(vec![Value::Int(1), Value::Null]);
        {
            let mut accounting = BreakingRowAccounting::new(Arc::clone(&breaker), "test");
            accounting.account_for_and_maybe_break(&row).unwrap();
            accounting.account_for_and_maybe_break(&row).unwrap();
            assert_eq!(accounting.accounted(), 48);
            assert_eq!(breaker.used(), 48);
        }
        assert_eq!(breaker.used(), 0);
    }

    #[test]
    fn test_breaking_row_accounting_trips() {
        let breaker = Arc::new(CircuitBreaker::new("query", 20));
        let mut accounting = BreakingRowAccounting::new(Arc::clone(&breaker), "block");
        let row = OwnedRow::new(vec![Value::Int(1)]);
        accounting.account_for_and_maybe_break(&row).unwrap();
        assert!(matches!(
            accounting.account_for_and_maybe_break(&row),
            Err(QuarryError::CircuitBreaking { .. })
        ));
        accounting.release();
        assert_eq!(breaker.used(), 0);
    }

    #[test]
    fn test_noop_accounting() {
        let mut accounting = NoopRowAccounting;
        accounting
            .account_for_and_maybe_break(&OwnedRow::nulls(3))
            .unwrap();
        accounting.release();
    }
}
