//! Execution configuration structures.
//!
//! These structures define the tunables of the execution core on one node.
//! The file format is TOML; durations are written in humantime form
//! (`"30s"`, `"1m 30s"`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BREAKER_OVERHEAD, DEFAULT_BUCKET_SIZE, DEFAULT_JOIN_BLOCK_SIZE, DEFAULT_KILL_TIMEOUT,
    DEFAULT_MAX_CONCURRENT_JOBS, DEFAULT_QUERY_BREAKER_LIMIT, DEFAULT_RESULT_PAGE_SIZE,
};
use crate::error::{QuarryError, QuarryResult};
use crate::types::NodeId;

/// Main execution configuration.
///
/// # Example
///
/// ```rust
/// use quarry_common::config::{ExecutionConfig, JoinStrategyKind};
///
/// let config = ExecutionConfig::default();
/// assert_eq!(config.join.strategy, JoinStrategyKind::Hash);
/// assert_eq!(config.join.block_size, 8192);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Identifier of this node in the cluster.
    pub node_id: NodeId,

    /// Join configuration.
    #[serde(default)]
    pub join: JoinConfig,

    /// Circuit breaker configuration.
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Job registry configuration.
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Result receiver configuration.
    #[serde(default)]
    pub receiver: ReceiverConfig,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::FIRST,
            join: JoinConfig::default(),
            breaker: BreakerConfig::default(),
            jobs: JobsConfig::default(),
            receiver: ReceiverConfig::default(),
        }
    }
}

impl ExecutionConfig {
    /// Creates a small configuration for testing.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            node_id: NodeId::FIRST,
            join: JoinConfig {
                block_size: 4,
                ..Default::default()
            },
            breaker: BreakerConfig {
                query_limit_bytes: 16 * 1024 * 1024, // 16 MB for tests
                ..Default::default()
            },
            jobs: JobsConfig {
                kill_timeout: Duration::from_secs(5),
                max_concurrent_jobs: 64,
            },
            receiver: ReceiverConfig {
                page_size: 2,
                bucket_size: 2,
            },
        }
    }

    /// Creates a builder for configuration.
    #[must_use]
    pub fn builder() -> ExecutionConfigBuilder {
        ExecutionConfigBuilder::new()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if !self.node_id.is_valid() {
            return Err("node_id must not be 0".to_string());
        }

        if self.join.block_size == 0 {
            return Err("join.block_size must be at least 1".to_string());
        }

        if self.breaker.query_limit_bytes == 0 {
            return Err("breaker.query_limit_bytes must be greater than 0".to_string());
        }

        if self.breaker.overhead.is_nan() || self.breaker.overhead < 1.0 {
            return Err("breaker.overhead must be at least 1.0".to_string());
        }

        if self.receiver.bucket_size == 0 {
            return Err("receiver.bucket_size must be at least 1".to_string());
        }

        Ok(())
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> QuarryResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| QuarryError::InvalidConfig {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml(content: &str) -> QuarryResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| QuarryError::InvalidConfig {
            message: e.to_string(),
        })?;
        config
            .validate()
            .map_err(|message| QuarryError::InvalidConfig { message })?;
        Ok(config)
    }

    /// Saves configuration to a file.
    pub fn save(&self, path: &Path) -> QuarryResult<()> {
        let content = self.to_toml()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| QuarryError::InvalidConfig {
                message: format!("failed to create {}: {}", parent.display(), e),
            })?;
        }

        std::fs::write(path, content).map_err(|e| QuarryError::InvalidConfig {
            message: format!("failed to write {}: {}", path.display(), e),
        })
    }

    /// Converts configuration to a TOML string.
    pub fn to_toml(&self) -> QuarryResult<String> {
        toml::to_string_pretty(self).map_err(|e| QuarryError::InvalidConfig {
            message: e.to_string(),
        })
    }
}

/// Join algorithm used when the plan does not pick one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrategyKind {
    /// Rewind and scan the inner side for every outer row.
    NestedLoop,
    /// Buffer blocks of outer rows and scan the inner side once per block.
    BlockNestedLoop,
    /// Hash a block of one side and probe it with the other.
    Hash,
    /// Merge two inputs sorted on the join key.
    SortedMerge,
}

/// Join configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinConfig {
    /// Default join algorithm.
    /// Default: hash
    pub strategy: JoinStrategyKind,

    /// Rows buffered per block by block nested loop and hash joins.
    /// Default: 8192
    pub block_size: usize,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            strategy: JoinStrategyKind::Hash,
            block_size: DEFAULT_JOIN_BLOCK_SIZE,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Memory budget of a single query in bytes.
    /// Default: 268435456 (256 MB)
    pub query_limit_bytes: u64,

    /// Factor applied to estimated sizes before charging them.
    /// Default: 1.0
    pub overhead: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            query_limit_bytes: DEFAULT_QUERY_BREAKER_LIMIT,
            overhead: DEFAULT_BREAKER_OVERHEAD,
        }
    }
}

/// Job registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// How long to wait for a killed job to terminate.
    /// Default: 30s
    #[serde(with = "humantime_serde")]
    pub kill_timeout: Duration,

    /// Maximum number of registered jobs, 0 for unbounded.
    /// Default: 1024
    pub max_concurrent_jobs: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            kill_timeout: DEFAULT_KILL_TIMEOUT,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
        }
    }
}

/// Result receiver configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Rows handed to a result receiver before it pauses, 0 disables paging.
    /// Default: 10000
    pub page_size: usize,

    /// Rows per bucket forwarded from one phase to the next.
    /// Default: 1000
    pub bucket_size: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_RESULT_PAGE_SIZE,
            bucket_size: DEFAULT_BUCKET_SIZE,
        }
    }
}

/// Builder for execution configuration.
#[derive(Debug, Default)]
pub struct ExecutionConfigBuilder {
    config: ExecutionConfig,
}

impl ExecutionConfigBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the node id.
    #[must_use]
    pub fn node_id(mut self, id: NodeId) -> Self {
        self.config.node_id = id;
        self
    }

    /// Sets the default join strategy.
    #[must_use]
    pub fn join_strategy(mut self, strategy: JoinStrategyKind) -> Self {
        self.config.join.strategy = strategy;
        self
    }

    /// Sets the join block size.
    #[must_use]
    pub fn join_block_size(mut self, block_size: usize) -> Self {
        self.config.join.block_size = block_size;
        self
    }

    /// Sets the query memory limit.
    #[must_use]
    pub fn query_limit_bytes(mut self, limit: u64) -> Self {
        self.config.breaker.query_limit_bytes = limit;
        self
    }

    /// Sets the kill timeout.
    #[must_use]
    pub fn kill_timeout(mut self, timeout: Duration) -> Self {
        self.config.jobs.kill_timeout = timeout;
        self
    }

    /// Sets the maximum number of concurrent jobs.
    #[must_use]
    pub fn max_concurrent_jobs(mut self, max: usize) -> Self {
        self.config.jobs.max_concurrent_jobs = max;
        self
    }

    /// Sets the result page size.
    #[must_use]
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.config.receiver.page_size = page_size;
        self
    }

    /// Sets the bucket size.
    #[must_use]
    pub fn bucket_size(mut self, bucket_size: usize) -> Self {
        self.config.receiver.bucket_size = bucket_size;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> ExecutionConfig {
        self.config
    }
}

/// Serde helper for Duration using humantime format.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        s.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
