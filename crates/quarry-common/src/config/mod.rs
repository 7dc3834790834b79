//! Configuration for Quarry.
//!
//! This module provides the execution configuration consumed by the
//! execution crates.

mod execution;

pub use execution::{
    BreakerConfig, ExecutionConfig, ExecutionConfigBuilder, JobsConfig, JoinConfig,
    JoinStrategyKind, ReceiverConfig,
};
