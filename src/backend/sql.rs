use crate::commit::{Commit, CommitAttempt};
use crate::domain::{Partition, StreamId};
use crate::error::{Result, StreamLedgerError};
use crate::persistence::PersistenceEngine;
use crate::snapshot::Snapshot;
use crate::stream_head::StreamHead;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::collections::HashMap;
use uuid::Uuid;

/// A relational backend over a `PgPool`: row-locks the stream-head for the
/// duration of a commit so concurrent writers to the same stream serialize
/// through Postgres, with the partition-scoped commit/snapshot/stream-head
/// schema defined in `migrations/`.
pub struct SqlBackend {
    pool: PgPool,
    partition: Partition,
}

impl SqlBackend {
    pub fn new(pool: PgPool, partition: Partition) -> Self {
        Self { pool, partition }
    }

    /// Apply the embedded migrations. Idempotent; safe to call on every
    /// startup.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StreamLedgerError::Storage(format!("migration failed: {e}")))?;
        Ok(())
    }

    fn row_to_commit(row: &PgRow) -> Result<Commit> {
        let headers_json: serde_json::Value = row
            .try_get("headers")
            .map_err(|e| StreamLedgerError::Storage(format!("invalid headers column: {e}")))?;
        let headers: HashMap<String, serde_json::Value> = serde_json::from_value(headers_json)?;
        let events_json: serde_json::Value = row
            .try_get("events")
            .map_err(|e| StreamLedgerError::Storage(format!("invalid events column: {e}")))?;
        let events: Vec<serde_json::Value> = serde_json::from_value(events_json)?;

        let partition: String = row
            .try_get("partition")
            .map_err(|e| StreamLedgerError::Storage(format!("invalid partition column: {e}")))?;
        let stream_id: String = row
            .try_get("stream_id")
            .map_err(|e| StreamLedgerError::Storage(format!("invalid stream_id column: {e}")))?;
        let commit_sequence: i64 = row
            .try_get("commit_sequence")
            .map_err(|e| StreamLedgerError::Storage(format!("invalid commit_sequence column: {e}")))?;
        let stream_revision: i64 = row
            .try_get("stream_revision")
            .map_err(|e| StreamLedgerError::Storage(format!("invalid stream_revision column: {e}")))?;
        let starting_stream_revision: i64 = row
            .try_get("starting_stream_revision")
            .map_err(|e| StreamLedgerError::Storage(format!("invalid starting_stream_revision column: {e}")))?;

        Ok(Commit {
            partition: Partition::from(partition.as_str()),
            stream_id: StreamId::new(stream_id)
                .map_err(|_| StreamLedgerError::Storage("empty stream_id in storage".to_string()))?,
            commit_id: row
                .try_get("commit_id")
                .map_err(|e| StreamLedgerError::Storage(format!("invalid commit_id column: {e}")))?,
            commit_sequence: commit_sequence as u64,
            stream_revision: stream_revision as u64,
            starting_stream_revision: starting_stream_revision as u64,
            commit_stamp: row
                .try_get("commit_stamp")
                .map_err(|e| StreamLedgerError::Storage(format!("invalid commit_stamp column: {e}")))?,
            headers,
            events,
            dispatched: row
                .try_get("dispatched")
                .map_err(|e| StreamLedgerError::Storage(format!("invalid dispatched column: {e}")))?,
        })
    }
}

#[async_trait]
impl PersistenceEngine for SqlBackend {
    async fn initialize(&self) -> Result<()> {
        self.migrate().await
    }

    async fn get_from_revision(
        &self,
        stream_id: &StreamId,
        min_revision: u64,
        max_revision: u64,
    ) -> Result<BoxStream<'static, Result<Commit>>> {
        let max_revision = if max_revision == 0 { i64::MAX } else { max_revision as i64 };
        let rows = sqlx::query(
            "SELECT partition, stream_id, commit_id, commit_sequence, stream_revision,
                    starting_stream_revision, commit_stamp, headers, events, dispatched
             FROM commits
             WHERE partition = $1 AND stream_id = $2
               AND stream_revision >= $3 AND starting_stream_revision <= $4
             ORDER BY commit_sequence ASC",
        )
        .bind(self.partition.as_str())
        .bind(stream_id.as_str())
        .bind(min_revision as i64)
        .bind(max_revision)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StreamLedgerError::Storage(format!("get_from_revision failed: {e}")))?;

        let commits: Result<Vec<Commit>> = rows.iter().map(Self::row_to_commit).collect();
        Ok(stream::iter(commits?.into_iter().map(Ok)).boxed())
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
        let rows = sqlx::query(
            "SELECT partition, stream_id, commit_id, commit_sequence, stream_revision,
                    starting_stream_revision, commit_stamp, headers, events, dispatched
             FROM commits
             WHERE partition = $1 AND commit_stamp >= $2 AND commit_stamp < $3
             ORDER BY commit_stamp ASC",
        )
        .bind(self.partition.as_str())
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StreamLedgerError::Storage(format!("get_from_to failed: {e}")))?;

        let commits: Result<Vec<Commit>> = rows.iter().map(Self::row_to_commit).collect();
        Ok(stream::iter(commits?.into_iter().map(Ok)).boxed())
    }

    async fn commit(&self, attempt: CommitAttempt) -> Result<Commit> {
        attempt.validate()?;
        if attempt.partition != self.partition {
            return Err(StreamLedgerError::InvalidCommit(
                "attempt partition does not match backend partition".to_string(),
            ));
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StreamLedgerError::StorageUnavailable(format!("begin failed: {e}")))?;

        // Row-lock the stream-head first so concurrent commits to the same
        // stream serialize through Postgres rather than racing on the
        // commits insert alone.
        let existing_head = sqlx::query(
            "SELECT head_revision, snapshot_revision FROM stream_heads
             WHERE partition = $1 AND stream_id = $2 FOR UPDATE",
        )
        .bind(self.partition.as_str())
        .bind(attempt.stream_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StreamLedgerError::Storage(format!("head lock failed: {e}")))?;

        if let Some(row) = &existing_head {
            let head_revision: i64 = row
                .try_get("head_revision")
                .map_err(|e| StreamLedgerError::Storage(format!("invalid head_revision: {e}")))?;
            if (attempt.commit_sequence as i64) <= head_revision {
                // A commit already occupies this sequence; find out whether
                // it is this exact attempt retried or someone else's.
                let clash = sqlx::query(
                    "SELECT commit_id FROM commits
                     WHERE partition = $1 AND stream_id = $2 AND commit_sequence = $3",
                )
                .bind(self.partition.as_str())
                .bind(attempt.stream_id.as_str())
                .bind(attempt.commit_sequence as i64)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| StreamLedgerError::Storage(format!("clash lookup failed: {e}")))?;

                return match clash {
                    Some(row) => {
                        let existing_commit_id: Uuid = row
                            .try_get("commit_id")
                            .map_err(|e| StreamLedgerError::Storage(format!("invalid commit_id: {e}")))?;
                        if existing_commit_id == attempt.commit_id {
                            Err(StreamLedgerError::DuplicateCommit {
                                stream_id: attempt.stream_id.as_str().to_string(),
                                commit_id: existing_commit_id,
                            })
                        } else {
                            Err(StreamLedgerError::Concurrency {
                                stream_id: attempt.stream_id.as_str().to_string(),
                                commit_sequence: attempt.commit_sequence,
                            })
                        }
                    }
                    None => Err(StreamLedgerError::Storage(
                        "stream-head ahead of commit log".to_string(),
                    )),
                };
            }
        }

        let headers_json = serde_json::to_value(&attempt.headers)?;
        let events_json = serde_json::to_value(&attempt.events)?;

        let insert = sqlx::query(
            "INSERT INTO commits
             (partition, stream_id, commit_id, commit_sequence, stream_revision,
              starting_stream_revision, commit_stamp, headers, events, dispatched)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, FALSE)",
        )
        .bind(self.partition.as_str())
        .bind(attempt.stream_id.as_str())
        .bind(attempt.commit_id)
        .bind(attempt.commit_sequence as i64)
        .bind(attempt.stream_revision as i64)
        .bind(attempt.starting_stream_revision as i64)
        .bind(attempt.commit_stamp)
        .bind(headers_json)
        .bind(events_json)
        .execute(&mut *tx)
        .await;

        if let Err(e) = insert {
            if is_unique_violation(&e) {
                return Err(StreamLedgerError::DuplicateCommit {
                    stream_id: attempt.stream_id.as_str().to_string(),
                    commit_id: attempt.commit_id,
                });
            }
            return Err(StreamLedgerError::Storage(format!("insert failed: {e}")));
        }

        sqlx::query(
            "INSERT INTO stream_heads (partition, stream_id, head_revision, snapshot_revision)
             VALUES ($1, $2, $3, 0)
             ON CONFLICT (partition, stream_id)
             DO UPDATE SET head_revision = EXCLUDED.head_revision",
        )
        .bind(self.partition.as_str())
        .bind(attempt.stream_id.as_str())
        .bind(attempt.stream_revision as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| StreamLedgerError::Storage(format!("head upsert failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StreamLedgerError::Storage(format!("commit failed: {e}")))?;

        Ok(Commit::from_attempt(attempt))
    }

    async fn get_undispatched_commits(&self) -> Result<BoxStream<'static, Result<Commit>>> {
        let rows = sqlx::query(
            "SELECT partition, stream_id, commit_id, commit_sequence, stream_revision,
                    starting_stream_revision, commit_stamp, headers, events, dispatched
             FROM commits
             WHERE partition = $1 AND dispatched = FALSE
             ORDER BY commit_stamp ASC",
        )
        .bind(self.partition.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StreamLedgerError::Storage(format!("get_undispatched_commits failed: {e}")))?;

        let commits: Result<Vec<Commit>> = rows.iter().map(Self::row_to_commit).collect();
        Ok(stream::iter(commits?.into_iter().map(Ok)).boxed())
    }

    async fn mark_commit_as_dispatched(
        &self,
        stream_id: &StreamId,
        commit_sequence: u64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE commits SET dispatched = TRUE
             WHERE partition = $1 AND stream_id = $2 AND commit_sequence = $3",
        )
        .bind(self.partition.as_str())
        .bind(stream_id.as_str())
        .bind(commit_sequence as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| StreamLedgerError::Storage(format!("mark_commit_as_dispatched failed: {e}")))?;
        Ok(())
    }

    async fn get_streams_to_snapshot(&self, threshold: u64) -> Result<Vec<StreamHead>> {
        let rows = sqlx::query(
            "SELECT stream_id, head_revision, snapshot_revision FROM stream_heads
             WHERE partition = $1 AND (head_revision - snapshot_revision) >= $2
             ORDER BY (head_revision - snapshot_revision) DESC",
        )
        .bind(self.partition.as_str())
        .bind(threshold as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StreamLedgerError::Storage(format!("get_streams_to_snapshot failed: {e}")))?;

        rows.into_iter()
            .map(|row| {
                let stream_id: String = row
                    .try_get("stream_id")
                    .map_err(|e| StreamLedgerError::Storage(format!("invalid stream_id: {e}")))?;
                let head_revision: i64 = row
                    .try_get("head_revision")
                    .map_err(|e| StreamLedgerError::Storage(format!("invalid head_revision: {e}")))?;
                let snapshot_revision: i64 = row
                    .try_get("snapshot_revision")
                    .map_err(|e| StreamLedgerError::Storage(format!("invalid snapshot_revision: {e}")))?;
                let mut head = StreamHead::new(
                    self.partition.clone(),
                    StreamId::new(stream_id)
                        .map_err(|_| StreamLedgerError::Storage("empty stream_id in storage".to_string()))?,
                    head_revision as u64,
                );
                head.record_snapshot(snapshot_revision as u64);
                Ok(head)
            })
            .collect()
    }

    async fn get_snapshot(
        &self,
        stream_id: &StreamId,
        max_revision: u64,
    ) -> Result<Option<Snapshot>> {
        let max_revision = if max_revision == 0 { i64::MAX } else { max_revision as i64 };
        let row = sqlx::query(
            "SELECT stream_revision, payload FROM snapshots
             WHERE partition = $1 AND stream_id = $2 AND stream_revision <= $3
             ORDER BY stream_revision DESC LIMIT 1",
        )
        .bind(self.partition.as_str())
        .bind(stream_id.as_str())
        .bind(max_revision)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StreamLedgerError::Storage(format!("get_snapshot failed: {e}")))?;

        match row {
            Some(row) => {
                let stream_revision: i64 = row
                    .try_get("stream_revision")
                    .map_err(|e| StreamLedgerError::Storage(format!("invalid stream_revision: {e}")))?;
                let payload: serde_json::Value = row
                    .try_get("payload")
                    .map_err(|e| StreamLedgerError::Storage(format!("invalid payload: {e}")))?;
                Ok(Some(Snapshot::new(
                    self.partition.clone(),
                    stream_id.clone(),
                    stream_revision as u64,
                    payload,
                )))
            }
            None => Ok(None),
        }
    }

    async fn add_snapshot(&self, snapshot: Snapshot) -> bool {
        if snapshot.partition != self.partition {
            tracing::warn!("add_snapshot called with mismatched partition; ignoring");
            return false;
        }

        let result: sqlx::Result<()> = async {
            let mut tx = self.pool.begin().await?;

            let updated = sqlx::query(
                "UPDATE stream_heads SET snapshot_revision = $1
                 WHERE partition = $2 AND stream_id = $3",
            )
            .bind(snapshot.stream_revision as i64)
            .bind(self.partition.as_str())
            .bind(snapshot.stream_id.as_str())
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                // No stream-head: nothing to snapshot yet.
                return Ok(());
            }

            sqlx::query(
                "INSERT INTO snapshots (partition, stream_id, stream_revision, payload)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (partition, stream_id, stream_revision)
                 DO UPDATE SET payload = EXCLUDED.payload",
            )
            .bind(self.partition.as_str())
            .bind(snapshot.stream_id.as_str())
            .bind(snapshot.stream_revision as i64)
            .bind(&snapshot.payload)
            .execute(&mut *tx)
            .await?;

            tx.commit().await
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "add_snapshot failed");
                false
            }
        }
    }

    async fn purge(&self) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StreamLedgerError::Storage(format!("begin failed: {e}")))?;

        sqlx::query("DELETE FROM commits WHERE partition = $1")
            .bind(self.partition.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| StreamLedgerError::Storage(format!("purge commits failed: {e}")))?;
        sqlx::query("DELETE FROM snapshots WHERE partition = $1")
            .bind(self.partition.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| StreamLedgerError::Storage(format!("purge snapshots failed: {e}")))?;
        sqlx::query("DELETE FROM stream_heads WHERE partition = $1")
            .bind(self.partition.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| StreamLedgerError::Storage(format!("purge stream_heads failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| StreamLedgerError::Storage(format!("purge commit failed: {e}")))?;
        Ok(())
    }

    fn partition(&self) -> &Partition {
        &self.partition
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err.as_database_error().and_then(|e| e.code()), Some(code) if code == "23505")
}
