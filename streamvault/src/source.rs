//! Managed source capability interface.
//!
//! Every content source kind (chunk-backed streams today, swarm-transfer
//! sources later) exposes the same closed capability surface; the registry
//! and scheduler are generic over this trait, never over a concrete kind.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Tagged source kinds sharing the `ManagedSource` interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceKind {
    /// Content-addressed chunked stream backed by the chunk store.
    Chunked,
    /// Source backed by a general-purpose swarm-transfer engine.
    Swarm,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Chunked => write!(f, "chunked"),
            SourceKind::Swarm => write!(f, "swarm"),
        }
    }
}

/// Runtime status of a managed source, mirroring the persisted catalog
/// status. Ordered by declaration so comparison selectors apply to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Running,
    Finished,
    Stopped,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Running => "running",
            SourceStatus::Finished => "finished",
            SourceStatus::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SourceStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(SourceStatus::Running),
            "finished" => Ok(SourceStatus::Finished),
            "stopped" => Ok(SourceStatus::Stopped),
            other => Err(crate::Error::validation(format!(
                "unknown source status '{}'",
                other
            ))),
        }
    }
}

/// Closed capability interface over one managed content source.
#[async_trait]
pub trait ManagedSource: Send + Sync + 'static {
    /// Which source kind backs this entry.
    fn kind(&self) -> SourceKind;

    /// Primary identity: the manifest (sd) hash.
    fn identifier(&self) -> &str;

    /// Catalog-level stable identity.
    fn stream_hash(&self) -> &str;

    fn status(&self) -> SourceStatus;

    fn added_on(&self) -> DateTime<Utc>;

    /// One-shot replication-complete signal; set once, never unset.
    fn fully_reflected(&self) -> bool;

    /// Whether every data chunk is locally present and verified.
    async fn chunks_complete(&self) -> bool;

    /// Materialize (or resume materializing) the source to disk.
    async fn save_file(&self, file_name: &str, download_directory: &str) -> Result<()>;

    /// Upload this source to one redundancy server.
    async fn upload_to_reflector(&self, host: &str, port: u16) -> Result<()>;

    /// Stop any per-source background work. Idempotent.
    fn stop_tasks(&self);
}
