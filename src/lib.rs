pub mod backend;
pub mod commit;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod pipeline;
pub mod snapshot;
pub mod store;
pub mod stream;
pub mod stream_head;

pub use backend::{InMemoryBackend, InMemoryStore};
#[cfg(feature = "sql")]
pub use backend::SqlBackend;
pub use commit::{Commit, CommitAttempt};
pub use config::{BackendKind, DispatchPolicy, EngineConfig, SnapshotPolicy};
pub use domain::{Partition, StreamId};
pub use error::{Result, StreamLedgerError};
pub use persistence::PersistenceEngine;
pub use pipeline::{PipelineHook, PipelineHooksAware};
pub use snapshot::Snapshot;
pub use store::EventStoreFacade;
pub use stream::OptimisticEventStream;
pub use stream_head::StreamHead;
