use crate::domain::{Partition, StreamId};
use serde::{Deserialize, Serialize};

/// Per-`(partition, stream_id)` summary of a stream's head revision and
/// snapshot lag.
///
/// `unsnapshotted = head_revision - snapshot_revision`. Created on first
/// commit, updated on every commit and snapshot, never deleted except by
/// `Purge`. It is derived state — a backend must be able to reconstruct it
/// from the commit log alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamHead {
    pub partition: Partition,
    pub stream_id: StreamId,
    pub head_revision: u64,
    pub snapshot_revision: u64,
}

impl StreamHead {
    /// A brand-new stream-head, as created on first commit. `unsnapshotted`
    /// always starts at the first commit's event count rather than 0, even
    /// though the stream-head is created lazily — this constructor enforces
    /// that by taking `head_revision` directly rather than defaulting it to
    /// zero.
    pub fn new(partition: Partition, stream_id: StreamId, head_revision: u64) -> Self {
        Self {
            partition,
            stream_id,
            head_revision,
            snapshot_revision: 0,
        }
    }

    pub fn unsnapshotted(&self) -> u64 {
        self.head_revision.saturating_sub(self.snapshot_revision)
    }

    /// Advance the head after a new commit.
    pub fn advance_to(&mut self, head_revision: u64) {
        debug_assert!(head_revision >= self.head_revision);
        self.head_revision = head_revision;
    }

    /// Record a snapshot at `snapshot_revision`, recomputing the lag.
    pub fn record_snapshot(&mut self, snapshot_revision: u64) {
        self.snapshot_revision = snapshot_revision;
    }

    pub fn is_candidate_for_snapshot(&self, threshold: u64) -> bool {
        self.unsnapshotted() >= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_head_is_fully_unsnapshotted() {
        let head = StreamHead::new(
            Partition::default_partition(),
            StreamId::new("s-1").unwrap(),
            3,
        );
        assert_eq!(head.unsnapshotted(), 3);
    }

    #[test]
    fn snapshotting_reduces_lag() {
        let mut head = StreamHead::new(
            Partition::default_partition(),
            StreamId::new("s-1").unwrap(),
            3,
        );
        head.record_snapshot(2);
        assert_eq!(head.unsnapshotted(), 1);
    }

    #[test]
    fn candidate_threshold_is_inclusive() {
        let mut head = StreamHead::new(
            Partition::default_partition(),
            StreamId::new("s-1").unwrap(),
            3,
        );
        head.record_snapshot(2);
        assert!(head.is_candidate_for_snapshot(1));
        assert!(!head.is_candidate_for_snapshot(2));
    }

    #[test]
    fn advancing_head_tracks_new_commits() {
        let mut head = StreamHead::new(
            Partition::default_partition(),
            StreamId::new("s-1").unwrap(),
            3,
        );
        head.advance_to(5);
        assert_eq!(head.head_revision, 5);
        assert_eq!(head.unsnapshotted(), 5);
    }
}
