use crate::commit::{Commit, CommitAttempt};
use crate::domain::{Partition, StreamId};
use crate::error::{Result, StreamLedgerError};
use crate::snapshot::Snapshot;
use crate::store::EventStoreFacade;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Per-stream session: an in-memory buffer of uncommitted events plus a
/// committed cursor, the unit of optimistic concurrency. Not thread-safe —
/// a single instance must not be shared across threads.
pub struct OptimisticEventStream {
    partition: Partition,
    stream_id: StreamId,
    stream_revision: u64,
    commit_sequence: u64,
    committed_events: Vec<serde_json::Value>,
    committed_headers: HashMap<String, serde_json::Value>,
    uncommitted_events: Vec<serde_json::Value>,
    uncommitted_headers: HashMap<String, serde_json::Value>,
    base_snapshot: Option<Snapshot>,
    facade: Arc<EventStoreFacade>,
}

impl OptimisticEventStream {
    /// A brand-new stream with no history.
    pub fn empty(partition: Partition, stream_id: StreamId, facade: Arc<EventStoreFacade>) -> Self {
        Self {
            partition,
            stream_id,
            stream_revision: 0,
            commit_sequence: 0,
            committed_events: Vec::new(),
            committed_headers: HashMap::new(),
            uncommitted_events: Vec::new(),
            uncommitted_headers: HashMap::new(),
            base_snapshot: None,
            facade,
        }
    }

    /// Constructed from a previously-read sequence of commits (a revision
    /// range, or commits following a snapshot). Folds each commit's events
    /// and headers into the committed buffers in order, tracking the
    /// highest-seen revision and sequence.
    ///
    /// `base_commit_sequence` is the sequence number the stream starts at
    /// before any of `commits` are folded in — 0 for a plain revision-range
    /// read, or the sequence of the commit that produced the snapshot's
    /// revision when resuming from one. Without it a snapshot taken at the
    /// current head leaves `commit_sequence` at 0 forever, since no forward
    /// read returns a commit to fold: the next `commit_changes` would then
    /// submit `commit_sequence = 1` and collide with the stream's real
    /// first commit on every retry.
    pub(crate) fn from_commits(
        partition: Partition,
        stream_id: StreamId,
        base_snapshot: Option<Snapshot>,
        base_commit_sequence: u64,
        commits: Vec<Commit>,
        facade: Arc<EventStoreFacade>,
    ) -> Self {
        let mut stream = Self {
            partition,
            stream_id,
            stream_revision: base_snapshot.as_ref().map_or(0, |s| s.stream_revision),
            commit_sequence: base_commit_sequence,
            committed_events: Vec::new(),
            committed_headers: HashMap::new(),
            uncommitted_events: Vec::new(),
            uncommitted_headers: HashMap::new(),
            base_snapshot,
            facade,
        };
        stream.fold_commits(commits);
        stream
    }

    fn fold_commits(&mut self, commits: Vec<Commit>) {
        for commit in commits {
            self.committed_events.extend(commit.events);
            self.committed_headers.extend(commit.headers);
            self.stream_revision = commit.stream_revision;
            self.commit_sequence = commit.commit_sequence;
        }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn stream_revision(&self) -> u64 {
        self.stream_revision
    }

    pub fn commit_sequence(&self) -> u64 {
        self.commit_sequence
    }

    pub fn committed_events(&self) -> &[serde_json::Value] {
        &self.committed_events
    }

    pub fn committed_headers(&self) -> &HashMap<String, serde_json::Value> {
        &self.committed_headers
    }

    pub fn base_snapshot(&self) -> Option<&Snapshot> {
        self.base_snapshot.as_ref()
    }

    pub fn append_event(&mut self, event: serde_json::Value) {
        self.uncommitted_events.push(event);
    }

    pub fn append_header(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.uncommitted_headers.insert(key.into(), value);
    }

    pub fn clear_changes(&mut self) {
        self.uncommitted_events.clear();
        self.uncommitted_headers.clear();
    }

    pub fn has_uncommitted_changes(&self) -> bool {
        !self.uncommitted_events.is_empty()
    }

    /// Builds an attempt from the uncommitted buffers and submits it
    /// through the owning facade.
    ///
    /// - Empty uncommitted buffer: returns `Ok(None)` without effect.
    /// - Success: committed buffers absorb the uncommitted ones, counters
    ///   advance, uncommitted buffers clear.
    /// - `DuplicateCommit`: surfaced unchanged; local state untouched.
    /// - `Concurrency`: rebases against newly-observed commits first (the
    ///   uncommitted buffer survives the rebase), then surfaces the
    ///   failure.
    pub async fn commit_changes(&mut self, commit_id: Uuid) -> Result<Option<Commit>> {
        if self.uncommitted_events.is_empty() {
            return Ok(None);
        }

        let event_count = self.uncommitted_events.len() as u64;
        let attempt = CommitAttempt {
            partition: self.partition.clone(),
            stream_id: self.stream_id.clone(),
            commit_id,
            commit_sequence: self.commit_sequence + 1,
            stream_revision: self.stream_revision + event_count,
            starting_stream_revision: self.stream_revision + 1,
            commit_stamp: Utc::now(),
            headers: self.uncommitted_headers.clone(),
            events: self.uncommitted_events.clone(),
        };

        match self.facade.commit(attempt).await {
            Ok(Some(commit)) => {
                self.committed_events.append(&mut self.uncommitted_events);
                self.committed_headers.extend(self.uncommitted_headers.drain());
                self.stream_revision = commit.stream_revision;
                self.commit_sequence = commit.commit_sequence;
                Ok(Some(commit))
            }
            Ok(None) => Ok(None),
            Err(StreamLedgerError::Concurrency {
                stream_id,
                commit_sequence,
            }) => {
                self.rebase().await?;
                Err(StreamLedgerError::Concurrency {
                    stream_id,
                    commit_sequence,
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Re-reads commits with a revision beyond what this stream has
    /// observed and folds them into the committed buffers, advancing
    /// `stream_revision`/`commit_sequence`. Uncommitted changes are
    /// untouched.
    async fn rebase(&mut self) -> Result<()> {
        let commits = self
            .facade
            .read_range(&self.stream_id, self.stream_revision + 1, 0)
            .await?;
        self.fold_commits(commits);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::pipeline::PipelineHooksAware;
    use serde_json::json;

    fn stream_on_fresh_facade(stream_id: &str) -> (Arc<EventStoreFacade>, OptimisticEventStream) {
        let facade = Arc::new(EventStoreFacade::new(
            Arc::new(InMemoryBackend::new(Partition::default_partition())),
            PipelineHooksAware::empty(),
        ));
        let stream = facade.create_stream(StreamId::new(stream_id).unwrap()).unwrap();
        (facade, stream)
    }

    #[tokio::test]
    async fn committing_with_no_changes_is_a_no_op() {
        let (_facade, mut stream) = stream_on_fresh_facade("s-1");
        let result = stream.commit_changes(Uuid::new_v4()).await.unwrap();
        assert!(result.is_none());
        assert_eq!(stream.stream_revision(), 0);
    }

    #[tokio::test]
    async fn successful_commit_advances_counters_and_clears_uncommitted() {
        let (_facade, mut stream) = stream_on_fresh_facade("s-1");
        stream.append_event(json!({"a": 1}));
        stream.append_event(json!({"a": 2}));

        let commit = stream.commit_changes(Uuid::new_v4()).await.unwrap().unwrap();
        assert_eq!(commit.stream_revision, 2);
        assert_eq!(stream.stream_revision(), 2);
        assert_eq!(stream.commit_sequence(), 1);
        assert!(!stream.has_uncommitted_changes());
        assert_eq!(stream.committed_events().len(), 2);
    }

    #[tokio::test]
    async fn duplicate_commit_leaves_local_state_untouched() {
        let facade = Arc::new(EventStoreFacade::new(
            Arc::new(InMemoryBackend::new(Partition::default_partition())),
            PipelineHooksAware::empty(),
        ));
        let stream_id = StreamId::new("s-1").unwrap();
        let commit_id = Uuid::new_v4();

        let mut first = facade.create_stream(stream_id.clone()).unwrap();
        first.append_event(json!({"a": 1}));
        first.commit_changes(commit_id).await.unwrap();

        // A second, independent stream handle retries the identical attempt.
        let mut retry = facade.create_stream(stream_id).unwrap();
        retry.append_event(json!({"a": 1}));
        let result = retry.commit_changes(commit_id).await;
        assert!(matches!(result, Err(StreamLedgerError::DuplicateCommit { .. })));
        // the retrying stream's own local counters are untouched by the failure
        assert_eq!(retry.stream_revision(), 0);
        assert!(retry.has_uncommitted_changes());
    }

    #[tokio::test]
    async fn concurrency_conflict_rebases_and_surfaces_failure() {
        let facade = Arc::new(EventStoreFacade::new(
            Arc::new(InMemoryBackend::new(Partition::default_partition())),
            PipelineHooksAware::empty(),
        ));
        let stream_id = StreamId::new("s-1").unwrap();

        let mut winner = facade.create_stream(stream_id.clone()).unwrap();
        winner.append_event(json!({"winner": true}));

        let mut loser = facade.create_stream(stream_id.clone()).unwrap();
        loser.append_event(json!({"loser": true}));

        winner.commit_changes(Uuid::new_v4()).await.unwrap();

        let result = loser.commit_changes(Uuid::new_v4()).await;
        assert!(matches!(result, Err(StreamLedgerError::Concurrency { .. })));

        // rebase folded the winner's commit into the loser's committed view
        assert_eq!(loser.stream_revision(), 1);
        assert_eq!(loser.commit_sequence(), 1);
        assert_eq!(loser.committed_events(), &[json!({"winner": true})]);
        // uncommitted changes survive the rebase
        assert!(loser.has_uncommitted_changes());
    }
}
