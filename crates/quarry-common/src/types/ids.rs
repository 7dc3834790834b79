//! Identifier types.
//!
//! Jobs are identified by random UUIDs handed out by the coordinating node.
//! Sub-contexts are identified by small integers that are only unique within
//! their job.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of an execution sub-context within one job.
///
/// Phase ids of the physical plan are used directly as sub-context ids.
pub type ContextId = u32;

// =============================================================================
// JobId
// =============================================================================

/// Identifier of a distributed job.
///
/// # Example
///
/// ```rust
/// use quarry_common::types::JobId;
///
/// let a = JobId::new_random();
/// let b = JobId::new_random();
/// assert_ne!(a, b);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Creates a new random job id.
    #[inline]
    #[must_use]
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[inline]
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    #[inline]
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}

// =============================================================================
// NodeId
// =============================================================================

/// Node identifier in the cluster.
///
/// # Example
///
/// ```rust
/// use quarry_common::types::NodeId;
///
/// let node = NodeId::new(1);
/// assert!(node.is_valid());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Invalid node ID, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// First valid node ID.
    pub const FIRST: Self = Self(1);

    /// Creates a new `NodeId` from a raw u32 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns true if this is a valid node ID.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "NodeId(INVALID)")
        } else {
            write!(f, "NodeId({})", self.0)
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    #[inline]
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

// =============================================================================
// ShardId
// =============================================================================

/// Identifier of one shard of a table: the index name and the shard number.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardId {
    index: String,
    id: u32,
}

impl ShardId {
    /// Creates a shard id.
    #[must_use]
    pub fn new(index: impl Into<String>, id: u32) -> Self {
        Self {
            index: index.into(),
            id,
        }
    }

    /// Returns the index (table) name.
    #[inline]
    #[must_use]
    pub fn index(&self) -> &str {
        &self.index
    }

    /// Returns the shard number.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}]", self.index, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id() {
        let uuid = Uuid::new_v4();
        let job_id = JobId::from(uuid);
        assert_eq!(job_id.as_uuid(), &uuid);
        assert_eq!(job_id.to_string(), uuid.to_string());
        assert_eq!(format!("{:?}", job_id), format!("JobId({})", uuid));
    }

    #[test]
    fn test_node_id() {
        let node = NodeId::new(5);
        assert_eq!(node.as_u32(), 5);
        assert!(node.is_valid());
        assert!(!NodeId::INVALID.is_valid());
        assert_eq!(format!("{:?}", NodeId::INVALID), "NodeId(INVALID)");
    }

    #[test]
    fn test_shard_id() {
        let shard = ShardId::new("orders", 3);
        assert_eq!(shard.index(), "orders");
        assert_eq!(shard.id(), 3);
        assert_eq!(shard.to_string(), "[orders][3]");
        assert!(ShardId::new("orders", 1) < shard);
    }
}
