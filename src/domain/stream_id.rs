use crate::error::{Result, StreamLedgerError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value Object: StreamId
///
/// Identifies a stream — a gap-free, ordered sequence of commits sharing an
/// id within a partition; the unit of optimistic concurrency.
///
/// Domain Rules:
/// - Cannot be empty.
/// - Immutable once created, compared by value equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(StreamLedgerError::InvalidCommit(
                "stream_id cannot be empty".to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
