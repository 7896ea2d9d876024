use crate::domain::{Partition, StreamId};
use crate::stream_head::StreamHead;
use uuid::Uuid;

/// Shared backend-adapter scaffolding: duplicate/concurrency classification
/// and stream-head bookkeeping that every concrete backend needs regardless
/// of storage kind.

/// Which taxonomy a `(partition, stream_id, commit_sequence)` collision maps
/// to. A backend must distinguish the two either through separate unique
/// constraints or — as here — by re-reading the offending row and comparing
/// `commit_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCollision {
    /// Same `commit_id` as the existing row: the caller is retrying an
    /// attempt that already succeeded.
    Duplicate,
    /// Different `commit_id`: someone else's commit won this sequence.
    Concurrency,
}

pub fn classify_sequence_collision(
    existing_commit_id: Uuid,
    attempt_commit_id: Uuid,
) -> SequenceCollision {
    if existing_commit_id == attempt_commit_id {
        SequenceCollision::Duplicate
    } else {
        SequenceCollision::Concurrency
    }
}

/// Compute the stream-head that should exist after a commit lands at
/// `new_head_revision`. Creates a fresh, fully-unsnapshotted head when
/// `existing` is `None` — first-commit stream-head creation must initialize
/// `unsnapshotted` to the event count, never to zero, even though the
/// stream-head is otherwise created lazily.
pub fn head_after_commit(
    existing: Option<StreamHead>,
    partition: &Partition,
    stream_id: &StreamId,
    new_head_revision: u64,
) -> StreamHead {
    match existing {
        Some(mut head) => {
            head.advance_to(new_head_revision);
            head
        }
        None => StreamHead::new(partition.clone(), stream_id.clone(), new_head_revision),
    }
}

/// Compute the stream-head after a successful `AddSnapshot`. The head must
/// already exist — a snapshot can only be taken of a stream that has at
/// least one commit.
pub fn head_after_snapshot(mut head: StreamHead, snapshot_revision: u64) -> StreamHead {
    head.record_snapshot(snapshot_revision);
    head
}
