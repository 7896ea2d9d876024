/// Error taxonomy for the persistence and commit pipeline.
///
/// Mirrors the language-neutral taxonomy of the design: concurrency and
/// duplicate-commit failures surface to the caller as distinct variants so
/// a stream can tell "someone beat me to this sequence" apart from "I
/// already committed this exact attempt".
#[derive(Debug, thiserror::Error)]
pub enum StreamLedgerError {
    /// An attempted commit collided with an already-persisted commit at the
    /// same `(partition, stream_id, commit_sequence)` but a different
    /// `commit_id`.
    #[error("concurrency conflict on stream {stream_id} at sequence {commit_sequence}")]
    Concurrency {
        stream_id: String,
        commit_sequence: u64,
    },

    /// An attempted commit collided on `(partition, stream_id, commit_id)`
    /// with an already-persisted commit.
    #[error("duplicate commit {commit_id} on stream {stream_id}")]
    DuplicateCommit {
        stream_id: String,
        commit_id: uuid::Uuid,
    },

    /// Transient backend connectivity failure; callers may retry.
    #[error("storage temporarily unavailable: {0}")]
    StorageUnavailable(String),

    /// Any other backend fault; callers should treat as fatal for the
    /// operation.
    #[error("storage error: {0}")]
    Storage(String),

    /// The attempt failed structural validation (missing ids, non-positive
    /// sequence/revision, revision < sequence).
    #[error("invalid commit: {0}")]
    InvalidCommit(String),

    /// Use of a facade or stream after it was disposed.
    #[error("object disposed")]
    ObjectDisposed,

    /// Ambient (de)serialization failure — config loading, payload
    /// round-tripping through `serde_json`.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StreamLedgerError>;

impl StreamLedgerError {
    /// True for failures a caller may reasonably retry without changing
    /// anything about the attempt — a transient `StorageUnavailable` is the
    /// caller's retry signal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StreamLedgerError::StorageUnavailable(_))
    }
}
