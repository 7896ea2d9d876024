use crate::domain::{Partition, StreamId};
use crate::error::{Result, StreamLedgerError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// An immutable batch of one or more events appended to a stream.
///
/// Once accepted by a backend, a `Commit` is owned by the persistence layer
/// — callers must treat it as read-only. `dispatched` is the one field a
/// backend may flip, and only false -> true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub partition: Partition,
    pub stream_id: StreamId,
    pub commit_id: Uuid,
    pub commit_sequence: u64,
    pub stream_revision: u64,
    pub starting_stream_revision: u64,
    pub commit_stamp: DateTime<Utc>,
    pub headers: HashMap<String, serde_json::Value>,
    pub events: Vec<serde_json::Value>,
    pub dispatched: bool,
}

impl Commit {
    /// Construct a commit directly from a [`CommitAttempt`], as a backend
    /// does once it has won the `(partition, stream_id, commit_sequence)`
    /// race. `dispatched` always starts false.
    pub fn from_attempt(attempt: CommitAttempt) -> Self {
        Self {
            partition: attempt.partition,
            stream_id: attempt.stream_id,
            commit_id: attempt.commit_id,
            commit_sequence: attempt.commit_sequence,
            stream_revision: attempt.stream_revision,
            starting_stream_revision: attempt.starting_stream_revision,
            commit_stamp: attempt.commit_stamp,
            headers: attempt.headers,
            events: attempt.events,
            dispatched: false,
        }
    }

    /// Mark this commit dispatched. Idempotent: flipping an
    /// already-dispatched commit is a no-op.
    pub fn mark_dispatched(&mut self) {
        self.dispatched = true;
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

/// A not-yet-persisted commit, built by an [`crate::stream::OptimisticEventStream`]
/// and submitted through the facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitAttempt {
    pub partition: Partition,
    pub stream_id: StreamId,
    pub commit_id: Uuid,
    pub commit_sequence: u64,
    pub stream_revision: u64,
    pub starting_stream_revision: u64,
    pub commit_stamp: DateTime<Utc>,
    pub headers: HashMap<String, serde_json::Value>,
    pub events: Vec<serde_json::Value>,
}

impl CommitAttempt {
    /// Structural validation: missing ids, non-positive sequence/revision,
    /// or revision inconsistent with sequence/event-count are all rejected
    /// here so both the facade's silent-drop path and a direct caller's
    /// hard error share one check.
    pub fn validate(&self) -> Result<()> {
        if self.stream_id.as_str().is_empty() {
            return Err(StreamLedgerError::InvalidCommit(
                "stream_id cannot be empty".to_string(),
            ));
        }
        if self.commit_sequence == 0 {
            return Err(StreamLedgerError::InvalidCommit(
                "commit_sequence must be >= 1".to_string(),
            ));
        }
        if self.stream_revision == 0 {
            return Err(StreamLedgerError::InvalidCommit(
                "stream_revision must be >= 1".to_string(),
            ));
        }
        if self.stream_revision < self.commit_sequence {
            return Err(StreamLedgerError::InvalidCommit(format!(
                "stream_revision ({}) cannot be less than commit_sequence ({})",
                self.stream_revision, self.commit_sequence
            )));
        }
        if self.events.is_empty() {
            return Err(StreamLedgerError::InvalidCommit(
                "a commit attempt must carry at least one event".to_string(),
            ));
        }
        let expected_starting = self.stream_revision - self.events.len() as u64 + 1;
        if self.starting_stream_revision != expected_starting {
            return Err(StreamLedgerError::InvalidCommit(format!(
                "starting_stream_revision ({}) inconsistent with stream_revision ({}) and event count ({})",
                self.starting_stream_revision,
                self.stream_revision,
                self.events.len()
            )));
        }
        Ok(())
    }
}
