//! In-memory record of one managed chunk-backed stream.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::Result;
use crate::assembler::{ByteRange, PeerDiscovery, ReflectorClient, StreamAssembler};
use crate::catalog::ClaimInfo;
use crate::manifest::StreamManifest;
use crate::source::{ManagedSource, SourceKind, SourceStatus};
use crate::store::ChunkStore;

/// Shared collaborators every chunk-backed record drives its work through.
#[derive(Clone)]
pub struct SourceContext {
    pub store: Arc<dyn ChunkStore>,
    pub assembler: Arc<dyn StreamAssembler>,
    pub reflector: Arc<dyn ReflectorClient>,
    pub node: Option<Arc<dyn PeerDiscovery>>,
}

/// File placement, set once when the materialization location becomes known.
#[derive(Debug, Clone, Default)]
struct Placement {
    file_name: Option<String>,
    download_directory: Option<String>,
}

/// Live record of one managed stream.
///
/// At most one record exists per sd hash in the registry. Claim binding and
/// replication state mutate in place for the record's lifetime; everything
/// else is fixed at construction except status and the set-once placement.
pub struct StreamRecord {
    manifest: StreamManifest,
    rowid: i64,
    added_on: DateTime<Utc>,
    status: RwLock<SourceStatus>,
    placement: RwLock<Placement>,
    claim: RwLock<Option<ClaimInfo>>,
    content_fee: RwLock<Option<String>>,
    saved_file: AtomicBool,
    /// Set once all chunks were durably uploaded to at least one reflector
    /// this session. Never unset.
    fully_reflected: AtomicBool,
    ctx: SourceContext,
}

impl StreamRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        manifest: StreamManifest,
        rowid: i64,
        status: SourceStatus,
        file_name: Option<String>,
        download_directory: Option<String>,
        saved_file: bool,
        added_on: DateTime<Utc>,
        ctx: SourceContext,
    ) -> Self {
        Self {
            manifest,
            rowid,
            added_on,
            status: RwLock::new(status),
            placement: RwLock::new(Placement {
                file_name,
                download_directory,
            }),
            claim: RwLock::new(None),
            content_fee: RwLock::new(None),
            saved_file: AtomicBool::new(saved_file),
            fully_reflected: AtomicBool::new(false),
            ctx,
        }
    }

    pub fn manifest(&self) -> &StreamManifest {
        &self.manifest
    }

    pub fn rowid(&self) -> i64 {
        self.rowid
    }

    pub fn claim(&self) -> Option<ClaimInfo> {
        self.claim.read().clone()
    }

    pub fn content_fee(&self) -> Option<String> {
        self.content_fee.read().clone()
    }

    pub fn file_name(&self) -> Option<String> {
        self.placement.read().file_name.clone()
    }

    pub fn download_directory(&self) -> Option<String> {
        self.placement.read().download_directory.clone()
    }

    /// Full path of the materialized file, when placement is known.
    pub fn full_path(&self) -> Option<PathBuf> {
        let placement = self.placement.read();
        match (&placement.download_directory, &placement.file_name) {
            (Some(dir), Some(name)) => Some(PathBuf::from(dir).join(name)),
            _ => None,
        }
    }

    pub fn saved_file(&self) -> bool {
        self.saved_file.load(Ordering::SeqCst)
    }

    /// Bind (or rebind) claim metadata and content fee in place.
    pub fn set_claim(&self, claim: Option<ClaimInfo>, content_fee: Option<String>) {
        *self.claim.write() = claim;
        *self.content_fee.write() = content_fee;
    }

    /// Record placement once; later calls keep the original location.
    fn set_placement(&self, file_name: &str, download_directory: &str) {
        let mut placement = self.placement.write();
        if placement.file_name.is_none() {
            placement.file_name = Some(file_name.to_string());
        }
        if placement.download_directory.is_none() {
            placement.download_directory = Some(download_directory.to_string());
        }
    }

    /// Serve one byte range of this stream, fetching remote chunks through
    /// the discovery node when local content is partial.
    pub async fn serve_range(&self, range: ByteRange) -> Result<bytes::Bytes> {
        self.ctx
            .assembler
            .read_range(&self.manifest, range, self.ctx.node.clone())
            .await
    }
}

#[async_trait]
impl ManagedSource for StreamRecord {
    fn kind(&self) -> SourceKind {
        SourceKind::Chunked
    }

    fn identifier(&self) -> &str {
        &self.manifest.sd_hash
    }

    fn stream_hash(&self) -> &str {
        &self.manifest.stream_hash
    }

    fn status(&self) -> SourceStatus {
        *self.status.read()
    }

    fn added_on(&self) -> DateTime<Utc> {
        self.added_on
    }

    fn fully_reflected(&self) -> bool {
        self.fully_reflected.load(Ordering::SeqCst)
    }

    async fn chunks_complete(&self) -> bool {
        for chunk in self.manifest.data_chunks() {
            if !self.ctx.store.is_verified(&chunk.chunk_hash).await {
                return false;
            }
        }
        true
    }

    async fn save_file(&self, file_name: &str, download_directory: &str) -> Result<()> {
        self.set_placement(file_name, download_directory);
        *self.status.write() = SourceStatus::Running;

        let path = self
            .ctx
            .assembler
            .write_file(
                &self.manifest,
                std::path::Path::new(download_directory),
                file_name,
                self.ctx.node.clone(),
            )
            .await?;

        self.saved_file.store(true, Ordering::SeqCst);
        *self.status.write() = SourceStatus::Finished;
        debug!("Saved stream {} to {}", self.manifest.sd_hash, path.display());
        Ok(())
    }

    async fn upload_to_reflector(&self, host: &str, port: u16) -> Result<()> {
        debug!(
            "Uploading stream {} to reflector {}:{}",
            self.manifest.sd_hash, host, port
        );
        let outcome = self
            .ctx
            .reflector
            .upload(&self.manifest, host, port)
            .await?;

        if outcome.fully_reflected && !self.fully_reflected.swap(true, Ordering::SeqCst) {
            info!(
                "Stream {} fully reflected to {}:{} ({} chunks sent)",
                self.manifest.sd_hash, host, port, outcome.chunks_sent
            );
        }
        Ok(())
    }

    fn stop_tasks(&self) {
        let mut status = self.status.write();
        if *status == SourceStatus::Running {
            *status = SourceStatus::Stopped;
        }
    }
}
