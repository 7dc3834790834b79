//! Execution error types.
//!
//! Every failure that crosses an iterator, receiver or sub-context boundary
//! is a [`QuarryError`]. The type is `Clone` because a single kill cause is
//! handed to every iterator, receiver and completion observer of a job.

use std::fmt;
use thiserror::Error;

use crate::types::{ContextId, JobId, NodeId};

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Unknown or unspecified error.
    Unknown = 0x0000,
    /// Internal error (bug).
    Internal = 0x0001,
    /// Operation not supported.
    NotSupported = 0x0002,
    /// Invalid argument provided.
    InvalidArgument = 0x0003,
    /// Operation timed out.
    Timeout = 0x0004,
    /// Invalid configuration.
    InvalidConfig = 0x0005,

    // Iteration errors (0x0100 - 0x01FF)
    /// A protocol precondition was violated.
    IllegalState = 0x0100,
    /// Execution of an operator failed.
    ExecutionFailed = 0x0101,

    // Job errors (0x0200 - 0x02FF)
    /// The job was killed.
    JobKilled = 0x0200,
    /// No job context is registered for the job id.
    JobContextMissing = 0x0201,
    /// No sub-context is registered for the context id.
    SubContextMissing = 0x0202,
    /// A job context with the same id already exists.
    JobContextExists = 0x0203,
    /// A sub-context with the same id already exists.
    DuplicateSubContext = 0x0204,
    /// Too many concurrent jobs.
    TooManyJobs = 0x0205,

    // Resource errors (0x0300 - 0x03FF)
    /// A circuit breaker tripped.
    CircuitBreaking = 0x0300,

    // Remote errors (0x0400 - 0x04FF)
    /// A remote node reported a failure.
    RemoteFailure = 0x0400,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "Iteration",
            0x02 => "Job",
            0x03 => "Resource",
            0x04 => "Remote",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for Quarry.
///
/// # Example
///
/// ```rust
/// use quarry_common::error::{ErrorCode, QuarryError};
///
/// let err = QuarryError::illegal_state("current_element called before move_next");
/// assert_eq!(err.code(), ErrorCode::IllegalState);
/// assert_eq!(err.code().category(), "Iteration");
/// ```
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuarryError {
    // ==========================================================================
    // General Errors
    // ==========================================================================
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Operation not supported.
    #[error("operation not supported: {operation}")]
    NotSupported {
        /// The unsupported operation.
        operation: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds.
        duration_ms: u64,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    // ==========================================================================
    // Iteration Errors
    // ==========================================================================
    /// A protocol precondition was violated, e.g. reading the current
    /// element of an iterator that is not positioned.
    #[error("illegal state: {message}")]
    IllegalState {
        /// Error message.
        message: String,
    },

    /// Execution of an operator failed.
    #[error("execution failed: {reason}")]
    ExecutionFailed {
        /// Reason for failure.
        reason: String,
    },

    // ==========================================================================
    // Job Errors
    // ==========================================================================
    /// The job was killed. Default cause of a kill without explicit cause.
    #[error("job killed")]
    JobKilled,

    /// Job context is missing.
    #[error("JobExecutionContext for job {job_id} is missing")]
    JobContextMissing {
        /// The missing job.
        job_id: JobId,
    },

    /// Sub-context is missing.
    #[error("ExecutionSubContext for {job_id}/{context_id} is missing")]
    SubContextMissing {
        /// The job that was searched.
        job_id: JobId,
        /// The missing sub-context.
        context_id: ContextId,
    },

    /// Job context already registered.
    #[error("JobExecutionContext for job {job_id} already exists")]
    JobContextExists {
        /// The duplicate job.
        job_id: JobId,
    },

    /// Sub-context already registered.
    #[error("ExecutionSubContext for {job_id}/{context_id} already exists")]
    DuplicateSubContext {
        /// The job owning the sub-context.
        job_id: JobId,
        /// The duplicate sub-context id.
        context_id: ContextId,
    },

    /// Too many concurrent jobs.
    #[error("too many concurrent jobs: limit is {limit}")]
    TooManyJobs {
        /// Maximum number of concurrent jobs.
        limit: usize,
    },

    // ==========================================================================
    // Resource Errors
    // ==========================================================================
    /// A circuit breaker refused an allocation.
    #[error("[{breaker}] data too large, data for [{label}] would be [{wanted}] bytes, which is larger than the limit of [{limit}] bytes")]
    CircuitBreaking {
        /// Name of the breaker.
        breaker: String,
        /// What was being accounted.
        label: String,
        /// Bytes in use including the refused allocation.
        wanted: u64,
        /// Configured limit.
        limit: u64,
    },

    // ==========================================================================
    // Remote Errors
    // ==========================================================================
    /// A remote node reported a failure.
    #[error("node {node_id} failed: {reason}")]
    RemoteFailure {
        /// The failing node.
        node_id: NodeId,
        /// Reason reported by the node.
        reason: String,
    },
}

impl QuarryError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::NotSupported { .. } => ErrorCode::NotSupported,
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            Self::IllegalState { .. } => ErrorCode::IllegalState,
            Self::ExecutionFailed { .. } => ErrorCode::ExecutionFailed,
            Self::JobKilled => ErrorCode::JobKilled,
            Self::JobContextMissing { .. } => ErrorCode::JobContextMissing,
            Self::SubContextMissing { .. } => ErrorCode::SubContextMissing,
            Self::JobContextExists { .. } => ErrorCode::JobContextExists,
            Self::DuplicateSubContext { .. } => ErrorCode::DuplicateSubContext,
            Self::TooManyJobs { .. } => ErrorCode::TooManyJobs,
            Self::CircuitBreaking { .. } => ErrorCode::CircuitBreaking,
            Self::RemoteFailure { .. } => ErrorCode::RemoteFailure,
        }
    }

    /// Returns true if this error is retryable by a caller.
    ///
    /// Nothing inside the execution core retries; this only informs the
    /// layers above.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::CircuitBreaking { .. } | Self::TooManyJobs { .. }
        )
    }

    /// Returns true if this error stems from a kill rather than a failure.
    #[must_use]
    pub const fn is_kill(&self) -> bool {
        matches!(self, Self::JobKilled)
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an illegal state error.
    #[must_use]
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a not-supported error.
    #[must_use]
    pub fn not_supported(operation: impl Into<String>) -> Self {
        Self::NotSupported {
            operation: operation.into(),
        }
    }

    /// Creates a failure reported by a remote node.
    #[must_use]
    pub fn remote_failure(node_id: NodeId, reason: impl Into<String>) -> Self {
        Self::RemoteFailure {
            node_id,
            reason: reason.into(),
        }
    }

    /// Creates an execution failure.
    #[must_use]
    pub fn execution_failed(reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            reason: reason.into(),
        }
    }
}
