use crate::commit::{Commit, CommitAttempt};
use crate::domain::{Partition, StreamId};
use crate::error::{Result, StreamLedgerError};
use crate::persistence::PersistenceEngine;
use crate::pipeline::PipelineHooksAware;
use crate::snapshot::Snapshot;
use crate::stream::OptimisticEventStream;
use futures::stream::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Factory for [`OptimisticEventStream`]s, wrapping a persistence backend
/// and its pipeline hook chain. The facade is the one object application
/// code talks to; streams it opens hold a reference back to it for commit
/// submission and rebase reads.
pub struct EventStoreFacade {
    persistence: Arc<dyn PersistenceEngine>,
    hooks: PipelineHooksAware,
    disposed: AtomicBool,
}

impl EventStoreFacade {
    pub fn new(persistence: Arc<dyn PersistenceEngine>, hooks: PipelineHooksAware) -> Self {
        Self {
            persistence,
            hooks,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn partition(&self) -> &Partition {
        self.persistence.partition()
    }

    /// An empty stream positioned at revision 0, sequence 0.
    pub fn create_stream(self: &Arc<Self>, stream_id: StreamId) -> Result<OptimisticEventStream> {
        self.ensure_not_disposed()?;
        Ok(OptimisticEventStream::empty(
            self.partition().clone(),
            stream_id,
            Arc::clone(self),
        ))
    }

    /// Reads commits `[min_revision, max_revision]` through the persistence
    /// backend and the hook `select` filter, reconstituting a stream
    /// positioned at the highest observed revision. `max_revision == 0`
    /// means unbounded.
    pub async fn open_stream(
        self: &Arc<Self>,
        stream_id: StreamId,
        min_revision: u64,
        max_revision: u64,
    ) -> Result<OptimisticEventStream> {
        self.ensure_not_disposed()?;
        let commits = self.read_range(&stream_id, min_revision, max_revision).await?;
        Ok(OptimisticEventStream::from_commits(
            self.partition().clone(),
            stream_id,
            None,
            0,
            commits,
            Arc::clone(self),
        ))
    }

    /// Starts from `snapshot`'s revision + 1, reading forward to
    /// `max_revision`.
    ///
    /// The resumed stream must carry the real `commit_sequence` the
    /// snapshot was taken at, not 0 — otherwise a snapshot taken at the
    /// current head (the common case) returns no commits to fold and the
    /// next `commit_changes` collides with the stream's actual first
    /// commit. That sequence is recovered by looking up the commit that
    /// produced the snapshot's revision.
    pub async fn open_stream_from_snapshot(
        self: &Arc<Self>,
        snapshot: Snapshot,
        max_revision: u64,
    ) -> Result<OptimisticEventStream> {
        self.ensure_not_disposed()?;
        let stream_id = snapshot.stream_id.clone();
        let base_commit_sequence = self
            .commit_sequence_at_revision(&stream_id, snapshot.stream_revision)
            .await?;
        let commits = self
            .read_range(&stream_id, snapshot.stream_revision + 1, max_revision)
            .await?;
        Ok(OptimisticEventStream::from_commits(
            self.partition().clone(),
            stream_id,
            Some(snapshot),
            base_commit_sequence,
            commits,
            Arc::clone(self),
        ))
    }

    /// The `commit_sequence` of the commit whose `stream_revision` equals
    /// `revision`, or 0 if `revision` is 0 (no commits yet). Reads directly
    /// through persistence, bypassing the hook `select` filter — this is
    /// bookkeeping recovery, not stream content.
    async fn commit_sequence_at_revision(&self, stream_id: &StreamId, revision: u64) -> Result<u64> {
        if revision == 0 {
            return Ok(0);
        }
        let mut stream = self
            .persistence
            .get_from_revision(stream_id, revision, revision)
            .await?;
        while let Some(item) = stream.next().await {
            let commit = item?;
            if commit.stream_revision == revision {
                return Ok(commit.commit_sequence);
            }
        }
        Ok(0)
    }

    /// Central write path: validate (silent drop if invalid or
    /// event-empty), run pre-hooks (silent drop on rejection), persist, run
    /// post-hooks. `Ok(None)` means the attempt was silently dropped by
    /// design — validation and pre-hook failures are programmer errors
    /// surfaced via logs, not runtime errors. Any error returned here comes
    /// from persistence.
    pub async fn commit(&self, attempt: CommitAttempt) -> Result<Option<Commit>> {
        self.ensure_not_disposed()?;

        if let Err(e) = attempt.validate() {
            tracing::debug!(stream_id = %attempt.stream_id, error = %e, "dropping invalid commit attempt");
            return Ok(None);
        }

        if !self.hooks.pre_commit(&attempt).await {
            tracing::debug!(stream_id = %attempt.stream_id, "commit attempt rejected by pre-commit hook");
            return Ok(None);
        }

        let commit = self.persistence.commit(attempt).await?;
        self.hooks.post_commit(&commit).await;
        Ok(Some(commit))
    }

    /// Raw persistence access for administrative code (snapshot sweeps,
    /// dispatch schedulers, purge tooling).
    pub fn advanced(&self) -> Result<&dyn PersistenceEngine> {
        self.ensure_not_disposed()?;
        Ok(self.persistence.as_ref())
    }

    /// Releases persistence and all hooks exactly once. Idempotent;
    /// subsequent calls to any other operation on this facade fail with
    /// [`StreamLedgerError::ObjectDisposed`].
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.hooks.dispose();
        }
    }

    pub(crate) async fn read_range(
        &self,
        stream_id: &StreamId,
        min_revision: u64,
        max_revision: u64,
    ) -> Result<Vec<Commit>> {
        let mut stream = self
            .persistence
            .get_from_revision(stream_id, min_revision, max_revision)
            .await?;
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            if let Some(commit) = self.hooks.select(item?).await {
                out.push(commit);
            }
        }
        Ok(out)
    }

    fn ensure_not_disposed(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(StreamLedgerError::ObjectDisposed);
        }
        Ok(())
    }
}
