use crate::commit::{Commit, CommitAttempt};
use crate::domain::{Partition, StreamId};
use crate::error::Result;
use crate::snapshot::Snapshot;
use crate::stream_head::StreamHead;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

/// The polymorphic backend interface the rest of the core depends on.
///
/// Every operation is implicitly scoped to the partition configured at
/// construction time. Two instances with different partitions over the
/// same physical store must be mutually invisible across every read here,
/// including the timestamp sweeps, and `purge` must never touch another
/// partition's data.
///
/// Read operations return lazy, pull-based streams rather than materialized
/// vectors — a backend unable to page simply returns a stream that drains
/// its full in-memory result in one go; the facade treats both the same
/// way.
#[async_trait]
pub trait PersistenceEngine: Send + Sync {
    /// Idempotent; safe to call concurrently, but schema/index creation
    /// happens at most once per process lifetime.
    async fn initialize(&self) -> Result<()>;

    /// Every commit of `stream_id` in this partition containing an event
    /// whose revision lies in `[min_revision, max_revision]`, ascending by
    /// `stream_revision`. Empty if the stream is absent. `max_revision` of
    /// `0` means unbounded, matching the facade's `OpenStream` contract.
    async fn get_from_revision(
        &self,
        stream_id: &StreamId,
        min_revision: u64,
        max_revision: u64,
    ) -> Result<BoxStream<'static, Result<Commit>>>;

    /// All commits in this partition with `commit_stamp >= since`, ordered
    /// by `commit_stamp` ascending, ties broken by insertion order.
    async fn get_from_timestamp(
        &self,
        since: DateTime<Utc>,
    ) -> Result<BoxStream<'static, Result<Commit>>>;

    /// As `get_from_timestamp`, but bounded: `start <= commit_stamp < end`.
    async fn get_from_to(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BoxStream<'static, Result<Commit>>>;

    /// Persist `attempt` atomically. Fails with
    /// [`crate::error::StreamLedgerError::DuplicateCommit`] when an existing
    /// record shares `(partition, stream_id, commit_id)`, or
    /// [`crate::error::StreamLedgerError::Concurrency`] when an existing
    /// record shares `(partition, stream_id, commit_sequence)` with a
    /// different `commit_id`. On success `dispatched = false` and the
    /// stream-head is updated.
    async fn commit(&self, attempt: CommitAttempt) -> Result<Commit>;

    /// All commits with `dispatched = false` in this partition, ordered by
    /// `commit_stamp`.
    async fn get_undispatched_commits(&self) -> Result<BoxStream<'static, Result<Commit>>>;

    /// Idempotent: sets `dispatched = true`.
    async fn mark_commit_as_dispatched(
        &self,
        stream_id: &StreamId,
        commit_sequence: u64,
    ) -> Result<()>;

    /// Stream-heads with `unsnapshotted >= threshold` in this partition,
    /// most-lagging first.
    async fn get_streams_to_snapshot(&self, threshold: u64) -> Result<Vec<StreamHead>>;

    /// The highest-revision snapshot with `stream_revision <= max_revision`
    /// in this partition, if any.
    async fn get_snapshot(
        &self,
        stream_id: &StreamId,
        max_revision: u64,
    ) -> Result<Option<Snapshot>>;

    /// Upsert. Never fails outward — on internal failure this returns
    /// `false` rather than propagating an error, so a background snapshot
    /// task can never corrupt the commit path. On success the owning
    /// stream-head's `snapshot_revision` is updated and `unsnapshotted`
    /// recomputed.
    async fn add_snapshot(&self, snapshot: Snapshot) -> bool;

    /// Drop all commits, snapshots, and stream-heads in this partition only.
    async fn purge(&self) -> Result<()>;

    /// The partition this instance is scoped to.
    fn partition(&self) -> &Partition;
}
