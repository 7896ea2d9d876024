/// Engine configuration: the constructor-argument surface the core accepts.
///
/// No environment-variable layering and no file-watching — the core reads
/// no environment itself; the embedding binary builds or deserializes an
/// `EngineConfig` and hands it to the facade/backend constructors.
use crate::error::{Result, StreamLedgerError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    #[cfg(feature = "sql")]
    Sql,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Memory
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub partition: String,
    pub backend: BackendKind,
    pub snapshot: SnapshotPolicy,
    pub dispatch: DispatchPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            partition: "default".to_string(),
            backend: BackendKind::default(),
            snapshot: SnapshotPolicy::default(),
            dispatch: DispatchPolicy::default(),
        }
    }
}

/// Governs when a background sweep should consider a stream
/// snapshot-worthy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotPolicy {
    /// `unsnapshotted` threshold past which `GetStreamsToSnapshot` reports a
    /// stream as a candidate.
    pub threshold: u64,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self { threshold: 100 }
    }
}

/// Governs how the external dispatch scheduler sweeps undispatched
/// commits. The engine itself only guarantees discoverability and
/// idempotent flagging; batch pacing lives here for the scheduler to read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchPolicy {
    pub batch_size: usize,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self { batch_size: 256 }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| StreamLedgerError::Storage(format!("failed to read config file: {e}")))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| StreamLedgerError::InvalidCommit(format!("invalid config format: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.partition.is_empty() {
            return Err(StreamLedgerError::InvalidCommit(
                "partition cannot be empty".to_string(),
            ));
        }
        if self.snapshot.threshold == 0 {
            return Err(StreamLedgerError::InvalidCommit(
                "snapshot threshold must be >= 1".to_string(),
            ));
        }
        if self.dispatch.batch_size == 0 {
            return Err(StreamLedgerError::InvalidCommit(
                "dispatch batch_size must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = EngineConfig::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed = EngineConfig::from_toml_str(&toml).unwrap();
        assert_eq!(parsed.partition, config.partition);
        assert_eq!(parsed.snapshot.threshold, config.snapshot.threshold);
    }

    #[test]
    fn empty_partition_is_rejected() {
        let mut config = EngineConfig::default();
        config.partition = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_snapshot_threshold_is_rejected() {
        let mut config = EngineConfig::default();
        config.snapshot.threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_a_toml_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(
            &path,
            "partition = \"tenant-a\"\nbackend = \"memory\"\n\n[snapshot]\nthreshold = 50\n\n[dispatch]\nbatch_size = 64\n",
        )
        .unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.partition, "tenant-a");
        assert_eq!(config.snapshot.threshold, 50);
        assert_eq!(config.dispatch.batch_size, 64);
    }

    #[test]
    fn missing_file_surfaces_a_storage_error() {
        let result = EngineConfig::from_file("/nonexistent/path/engine.toml");
        assert!(matches!(result, Err(StreamLedgerError::Storage(_))));
    }
}
