use crate::backend::scaffolding::{classify_sequence_collision, head_after_commit, head_after_snapshot};
use crate::commit::{Commit, CommitAttempt};
use crate::domain::{Partition, StreamId};
use crate::error::{Result, StreamLedgerError};
use crate::persistence::PersistenceEngine;
use crate::snapshot::Snapshot;
use crate::stream_head::StreamHead;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type StoreKey = (String, String);

/// The physical substrate multiple [`InMemoryBackend`] instances (one per
/// partition) can share, the way several relational-backend instances share
/// one physical Postgres cluster. Sharing a store across partitions is what
/// lets tests exercise partition isolation; production code typically gives
/// each backend its own store.
///
/// A per-stream [`Mutex`] provides the compare-and-swap boundary for the
/// commit-sequence race: writes to the same `(partition, stream_id)` are
/// serialized by the unique-sequence constraint.
pub struct InMemoryStore {
    commits: DashMap<StoreKey, Arc<Mutex<Vec<Commit>>>>,
    stream_heads: DashMap<StoreKey, StreamHead>,
    snapshots: DashMap<StoreKey, Vec<Snapshot>>,
    insertion_counter: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            commits: DashMap::new(),
            stream_heads: DashMap::new(),
            snapshots: DashMap::new(),
            insertion_counter: AtomicU64::new(0),
        }
    }

    fn next_insertion_order(&self) -> u64 {
        self.insertion_counter.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A key-value-with-compare-and-swap backend suitable for development,
/// testing, and single-node deployments. `InMemoryEventStreamRepository`
/// guards its whole map with one outer `RwLock<HashMap<..>>`; this backend
/// needs finer-grained concurrent access for its partition-scoped multi-key
/// uniqueness constraint, so the map itself is a `DashMap` instead.
pub struct InMemoryBackend {
    store: Arc<InMemoryStore>,
    partition: Partition,
}

impl InMemoryBackend {
    /// A backend with its own private physical store.
    pub fn new(partition: Partition) -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            partition,
        }
    }

    /// A backend sharing `store` with other partitions — used to verify
    /// partition isolation holds even over one physical substrate.
    pub fn with_store(store: Arc<InMemoryStore>, partition: Partition) -> Self {
        Self { store, partition }
    }

    fn key(&self, stream_id: &StreamId) -> StoreKey {
        (self.partition.as_str().to_string(), stream_id.as_str().to_string())
    }

    fn stream_ids_in_partition(&self) -> Vec<String> {
        self.store
            .commits
            .iter()
            .filter(|entry| entry.key().0 == self.partition.as_str())
            .map(|entry| entry.key().1.clone())
            .collect()
    }
}

#[async_trait]
impl PersistenceEngine for InMemoryBackend {
    async fn initialize(&self) -> Result<()> {
        // Nothing to provision for an in-memory map; the operation still
        // exists so callers can treat every backend uniformly.
        Ok(())
    }

    async fn get_from_revision(
        &self,
        stream_id: &StreamId,
        min_revision: u64,
        max_revision: u64,
    ) -> Result<BoxStream<'static, Result<Commit>>> {
        let key = self.key(stream_id);
        let max_revision = if max_revision == 0 { u64::MAX } else { max_revision };

        let commits: Vec<Commit> = match self.store.commits.get(&key) {
            Some(lock) => lock
                .lock()
                .iter()
                .filter(|c| {
                    let lo = c.starting_stream_revision;
                    let hi = c.stream_revision;
                    // overlap test against [min_revision, max_revision]
                    hi >= min_revision && lo <= max_revision
                })
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        Ok(stream::iter(commits.into_iter().map(Ok)).boxed())
    }

    async fn get_from_timestamp(
        &self,
        since: DateTime<Utc>,
    ) -> Result<BoxStream<'static, Result<Commit>>> {
        self.get_from_to(since, DateTime::<Utc>::MAX_UTC).await
    }

    async fn get_from_to(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BoxStream<'static, Result<Commit>>> {
        let mut matched: Vec<(u64, Commit)> = Vec::new();
        for stream_id in self.stream_ids_in_partition() {
            let key = (self.partition.as_str().to_string(), stream_id);
            if let Some(lock) = self.store.commits.get(&key) {
                for commit in lock.lock().iter() {
                    if commit.commit_stamp >= start && commit.commit_stamp < end {
                        matched.push((commit.commit_sequence, commit.clone()));
                    }
                }
            }
        }
        // Stable sort by commit_stamp; ties keep relative (insertion) order
        // because `matched` was built from each stream's storage order and
        // sort_by is stable.
        matched.sort_by_key(|(_, c)| c.commit_stamp);
        Ok(stream::iter(matched.into_iter().map(|(_, c)| Ok(c))).boxed())
    }

    async fn commit(&self, attempt: CommitAttempt) -> Result<Commit> {
        attempt.validate()?;
        if attempt.partition != self.partition {
            return Err(StreamLedgerError::InvalidCommit(
                "attempt partition does not match backend partition".to_string(),
            ));
        }

        let key = self.key(&attempt.stream_id);
        let slot = self
            .store
            .commits
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())))
            .clone();

        let mut commits = slot.lock();

        if let Some(existing) = commits.iter().find(|c| c.commit_id == attempt.commit_id) {
            return Err(StreamLedgerError::DuplicateCommit {
                stream_id: attempt.stream_id.as_str().to_string(),
                commit_id: existing.commit_id,
            });
        }

        let position = attempt.commit_sequence as usize;
        if position <= commits.len() {
            let existing = &commits[position - 1];
            let collision = classify_sequence_collision(existing.commit_id, attempt.commit_id);
            return match collision {
                crate::backend::scaffolding::SequenceCollision::Duplicate => {
                    Err(StreamLedgerError::DuplicateCommit {
                        stream_id: attempt.stream_id.as_str().to_string(),
                        commit_id: existing.commit_id,
                    })
                }
                crate::backend::scaffolding::SequenceCollision::Concurrency => {
                    Err(StreamLedgerError::Concurrency {
                        stream_id: attempt.stream_id.as_str().to_string(),
                        commit_sequence: attempt.commit_sequence,
                    })
                }
            };
        }
        if position != commits.len() + 1 {
            return Err(StreamLedgerError::Storage(format!(
                "commit_sequence {} leaves a gap after {} existing commits",
                attempt.commit_sequence,
                commits.len()
            )));
        }

        let _insertion_order = self.store.next_insertion_order();
        let new_revision = attempt.stream_revision;
        let commit = Commit::from_attempt(attempt);
        commits.push(commit.clone());
        drop(commits);

        self.store
            .stream_heads
            .entry(key)
            .and_modify(|head| head.advance_to(new_revision))
            .or_insert_with(|| head_after_commit(None, &self.partition, &commit.stream_id, new_revision));

        Ok(commit)
    }

    async fn get_undispatched_commits(&self) -> Result<BoxStream<'static, Result<Commit>>> {
        let mut matched = Vec::new();
        for stream_id in self.stream_ids_in_partition() {
            let key = (self.partition.as_str().to_string(), stream_id);
            if let Some(lock) = self.store.commits.get(&key) {
                for commit in lock.lock().iter().filter(|c| !c.dispatched) {
                    matched.push(commit.clone());
                }
            }
        }
        matched.sort_by_key(|c| c.commit_stamp);
        Ok(stream::iter(matched.into_iter().map(Ok)).boxed())
    }

    async fn mark_commit_as_dispatched(
        &self,
        stream_id: &StreamId,
        commit_sequence: u64,
    ) -> Result<()> {
        let key = self.key(stream_id);
        if let Some(lock) = self.store.commits.get(&key) {
            let mut commits = lock.lock();
            if let Some(commit) = commits
                .iter_mut()
                .find(|c| c.commit_sequence == commit_sequence)
            {
                commit.mark_dispatched();
            }
        }
        Ok(())
    }

    async fn get_streams_to_snapshot(&self, threshold: u64) -> Result<Vec<StreamHead>> {
        let mut candidates: Vec<StreamHead> = self
            .store
            .stream_heads
            .iter()
            .filter(|entry| entry.key().0 == self.partition.as_str())
            .map(|entry| entry.value().clone())
            .filter(|head| head.is_candidate_for_snapshot(threshold))
            .collect();
        candidates.sort_by_key(|head| std::cmp::Reverse(head.unsnapshotted()));
        Ok(candidates)
    }

    async fn get_snapshot(
        &self,
        stream_id: &StreamId,
        max_revision: u64,
    ) -> Result<Option<Snapshot>> {
        let key = self.key(stream_id);
        let max_revision = if max_revision == 0 { u64::MAX } else { max_revision };
        Ok(self.store.snapshots.get(&key).and_then(|snaps| {
            snaps
                .iter()
                .filter(|s| s.stream_revision <= max_revision)
                .max_by_key(|s| s.stream_revision)
                .cloned()
        }))
    }

    async fn add_snapshot(&self, snapshot: Snapshot) -> bool {
        if snapshot.partition != self.partition {
            tracing::warn!("add_snapshot called with mismatched partition; ignoring");
            return false;
        }
        let key = self.key(&snapshot.stream_id);

        let existing_head = match self.store.stream_heads.get(&key) {
            Some(head) => head.clone(),
            None => {
                tracing::warn!(
                    "add_snapshot: no stream-head for {:?}, cannot record snapshot",
                    snapshot.stream_id
                );
                return false;
            }
        };

        let revision = snapshot.stream_revision;
        self.store
            .snapshots
            .entry(key.clone())
            .or_insert_with(Vec::new)
            .retain(|s| s.stream_revision != revision);
        self.store
            .snapshots
            .get_mut(&key)
            .expect("entry just inserted")
            .push(snapshot);

        let updated = head_after_snapshot(existing_head, revision);
        self.store.stream_heads.insert(key, updated);
        true
    }

    async fn purge(&self) -> Result<()> {
        let partition = self.partition.as_str().to_string();
        self.store.commits.retain(|k, _| k.0 != partition);
        self.store.stream_heads.retain(|k, _| k.0 != partition);
        self.store.snapshots.retain(|k, _| k.0 != partition);
        Ok(())
    }

    fn partition(&self) -> &Partition {
        &self.partition
    }
}
