//! Persistent catalog collaborator seam.
//!
//! The catalog is the durable record of known streams, their chunk
//! inventories, claim bindings, and replication schedule. Schema and query
//! mechanics live behind the trait; this layer consumes the contract and the
//! claim-change broadcast.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::Result;
use crate::manifest::{ChunkDescriptor, StreamManifest};
use crate::source::SourceStatus;

/// Blockchain claim metadata bound to a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimInfo {
    pub claim_id: String,
    pub claim_name: String,
    /// `txid:nout` of the claim output.
    pub outpoint: String,
    pub channel_name: Option<String>,
}

/// One catalog row describing a known stream.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    /// Opaque catalog row reference.
    pub rowid: i64,
    pub sd_hash: String,
    pub stream_hash: String,
    pub stream_name: String,
    pub suggested_file_name: String,
    /// Decryption key (hex).
    pub key: String,
    pub file_name: Option<String>,
    pub download_directory: Option<String>,
    pub status: SourceStatus,
    pub claim: Option<ClaimInfo>,
    /// Payment transaction reference for the content fee, if one was paid.
    pub content_fee: Option<String>,
    /// Whether the stream's file was fully written to disk.
    pub saved_file: bool,
    pub added_on: DateTime<Utc>,
}

/// A manifest reconstructed from catalog inventory, pending one batch flush.
#[derive(Debug, Clone)]
pub struct RecoveredStream {
    pub manifest: StreamManifest,
    pub content_fee: Option<String>,
}

/// Notification that a stream's claim metadata changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimChange {
    pub stream_hash: String,
}

/// Durable record store of known streams.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Every stream the catalog knows about.
    async fn all_known_streams(&self) -> Result<Vec<StreamEntry>>;

    /// Full chunk inventory previously recorded for one stream.
    async fn chunks_for_stream(&self, stream_hash: &str) -> Result<Vec<ChunkDescriptor>>;

    /// Manifest hashes of streams due for re-replication.
    async fn streams_due_for_replication(&self) -> Result<Vec<String>>;

    /// Persist a batch of recovered manifests in one write.
    async fn save_recovered_manifests(
        &self,
        batch: &[RecoveredStream],
        download_dir: &Path,
    ) -> Result<()>;

    /// Record a newly created local stream; returns the catalog row id.
    async fn save_new_stream(
        &self,
        manifest: &StreamManifest,
        file_name: &str,
        download_directory: &str,
    ) -> Result<i64>;

    /// Remove a stream's catalog row and chunk inventory.
    async fn delete_stream(&self, manifest: &StreamManifest) -> Result<()>;

    /// Current claim bound to a stream, if any.
    async fn current_claim(&self, stream_hash: &str) -> Result<Option<ClaimInfo>>;

    /// Reconcile files removed from disk outside this process since last run.
    async fn reconcile_externally_removed_files(&self) -> Result<()>;

    /// Subscribe to claim-change notifications.
    fn claim_changes(&self) -> broadcast::Receiver<ClaimChange>;
}

/// Buffered claim changes before a slow listener starts lagging.
const CLAIM_CHANNEL_CAPACITY: usize = 256;

/// Fan-out point for claim-change notifications.
///
/// Catalog implementations publish through this; the stream manager holds
/// one subscription for the lifetime of its claim listener task.
pub struct ClaimChangeBroadcaster {
    sender: broadcast::Sender<ClaimChange>,
}

impl ClaimChangeBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CLAIM_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClaimChange> {
        self.sender.subscribe()
    }

    /// Publish a claim change, returning the number of receivers reached.
    /// Zero subscribers is not an error.
    pub fn publish(&self, change: ClaimChange) -> usize {
        tracing::debug!("Publishing claim change for {}", change.stream_hash);
        self.sender.send(change).unwrap_or(0)
    }
}

impl Default for ClaimChangeBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
