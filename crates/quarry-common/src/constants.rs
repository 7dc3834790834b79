//! System-wide constants for Quarry.
//!
//! Defaults used by the configuration and by operators constructed without
//! an explicit configuration.

use std::time::Duration;

// =============================================================================
// Join Constants
// =============================================================================

/// Default number of rows buffered per block by block-based joins.
pub const DEFAULT_JOIN_BLOCK_SIZE: usize = 8192;

/// Initial capacity, in bits, of the bitset tracking matched rows.
pub const INITIAL_BITSET_CAPACITY: usize = 1024;

// =============================================================================
// Circuit Breaker Constants
// =============================================================================

/// Default per-query memory limit (256 MB).
pub const DEFAULT_QUERY_BREAKER_LIMIT: u64 = 256 * 1024 * 1024;

/// Default overhead factor applied to estimated row sizes.
pub const DEFAULT_BREAKER_OVERHEAD: f64 = 1.0;

/// Name of the per-query breaker.
pub const QUERY_BREAKER_NAME: &str = "query";

// =============================================================================
// Row Size Estimation
// =============================================================================

/// Estimated size of a NULL value.
pub const NULL_VALUE_SIZE: u64 = 8;

/// Estimated size of a fixed-width value (booleans, integers, doubles).
pub const FIXED_VALUE_SIZE: u64 = 16;

/// Fixed overhead of a variable-width value on top of its payload.
pub const VARIABLE_VALUE_OVERHEAD: u64 = 32;

// =============================================================================
// Job Constants
// =============================================================================

/// Default time to wait for a killed job to terminate.
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum number of concurrently registered jobs.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 1024;

// =============================================================================
// Receiver Constants
// =============================================================================

/// Default number of rows a result receiver accepts before pausing.
pub const DEFAULT_RESULT_PAGE_SIZE: usize = 10_000;

/// Default number of rows forwarded per bucket between phases.
pub const DEFAULT_BUCKET_SIZE: usize = 1000;
