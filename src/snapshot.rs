use crate::domain::{Partition, StreamId};
use serde::{Deserialize, Serialize};

/// A materialized stream state at a chosen revision, used to bound
/// rehydration cost.
///
/// Unique on `(partition, stream_id, stream_revision)`; a later revision for
/// the same stream overwrites via upsert (`add_snapshot`). Once accepted by
/// a backend a `Snapshot` is immutable — callers never mutate a `Snapshot`
/// in place, they build a new one and resubmit it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub partition: Partition,
    pub stream_id: StreamId,
    pub stream_revision: u64,
    pub payload: serde_json::Value,
}

impl Snapshot {
    pub fn new(
        partition: Partition,
        stream_id: StreamId,
        stream_revision: u64,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            partition,
            stream_id,
            stream_revision,
            payload,
        }
    }
}
