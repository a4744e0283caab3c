//! Cache record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Logical partition of the persistent tier.
///
/// Each partition has its own capacity and eviction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    /// Slow-changing reference data (members, labels, test types, environments)
    Reference,
    /// Test-execution data, LRU-bounded
    Execution,
}

impl Partition {
    pub const ALL: [Partition; 2] = [Partition::Reference, Partition::Execution];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::Execution => "execution",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "reference" => Some(Self::Reference),
            "execution" => Some(Self::Execution),
            _ => None,
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row of the persistent tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub partition: Partition,
    /// Physical key, `tenant:resource`
    pub key: String,
    pub tenant_id: String,
    #[serde(with = "crate::utils::datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "crate::utils::datetime")]
    pub last_access: DateTime<Utc>,
    /// Size of the serialized payload before compression
    pub size: u64,
    pub compressed: bool,
    #[serde(skip)]
    pub payload: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_names_roundtrip() {
        for partition in Partition::ALL {
            assert_eq!(Partition::parse(partition.as_str()), Some(partition));
        }
        assert_eq!(Partition::parse("metrics"), None);
    }
}
