use crate::error::{Result, StreamLedgerError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value Object: Partition
///
/// An opaque tenancy tag isolating streams, snapshots, and stream-heads from
/// one another within the same physical store. Every persistence operation
/// is implicitly scoped to the partition configured at backend construction
/// time.
///
/// Domain Rules:
/// - Empty string is rejected; use [`Partition::default_partition`] instead
///   of an empty tag — the sentinel is never special beyond being the
///   default backend configuration.
/// - Immutable once created, compared by value equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Partition(String);

impl Partition {
    /// The sentinel used when no partition is configured. Never treated
    /// specially by persistence operations beyond being the default.
    pub const DEFAULT: &'static str = "default";

    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(StreamLedgerError::InvalidCommit(
                "partition tag cannot be empty".to_string(),
            ));
        }
        Ok(Self(value))
    }

    /// The sentinel partition ("default").
    pub fn default_partition() -> Self {
        Self(Self::DEFAULT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }
}

impl Default for Partition {
    fn default() -> Self {
        Self::default_partition()
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Partition {
    fn from(value: &str) -> Self {
        // Infallible in the common case: callers who want validation call
        // `Partition::new` directly. This impl exists for config/test
        // ergonomics, mirroring teacher's `new_unchecked` escape hatch.
        if value.is_empty() {
            Self::default_partition()
        } else {
            Self(value.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_partition_is_rejected() {
        assert!(Partition::new("").is_err());
    }

    #[test]
    fn default_partition_is_sentinel() {
        let p = Partition::default_partition();
        assert!(p.is_default());
        assert_eq!(p.as_str(), "default");
    }

    #[test]
    fn distinct_partitions_are_not_equal() {
        let a = Partition::new("tenant-a").unwrap();
        let b = Partition::new("tenant-b").unwrap();
        assert_ne!(a, b);
    }
}
