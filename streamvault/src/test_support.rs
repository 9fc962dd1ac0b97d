//! Shared fixtures and mock collaborators for unit tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::broadcast;

use crate::assembler::{
    ByteRange, PeerDiscovery, ReflectorClient, ReflectorOutcome, StreamAssembler,
};
use crate::catalog::{
    Catalog, ClaimChange, ClaimChangeBroadcaster, ClaimInfo, RecoveredStream, StreamEntry,
};
use crate::manifest::{ChunkDescriptor, StreamManifest};
use crate::record::{SourceContext, StreamRecord};
use crate::source::SourceStatus;
use crate::store::ChunkStore;
use crate::{Error, Result};

pub const TEST_CHUNK_LENGTH: u64 = 2097152;

/// A well-formed manifest with `data_chunks` data chunks plus the terminator.
pub fn make_manifest(sd_hash: &str, stream_hash: &str, data_chunks: u32) -> StreamManifest {
    let mut chunks: Vec<ChunkDescriptor> = (0..data_chunks)
        .map(|i| ChunkDescriptor::new(format!("{}-chunk-{}", sd_hash, i), TEST_CHUNK_LENGTH, i))
        .collect();
    chunks.push(ChunkDescriptor::new("", 0, data_chunks));
    StreamManifest {
        sd_hash: sd_hash.to_string(),
        stream_hash: stream_hash.to_string(),
        stream_name: format!("{}-name", stream_hash),
        suggested_file_name: format!("{}.mp4", stream_hash),
        key: "deadbeef".to_string(),
        chunks,
    }
}

/// A catalog row for a finished, saved stream.
pub fn make_entry(sd_hash: &str, stream_hash: &str) -> StreamEntry {
    StreamEntry {
        rowid: 1,
        sd_hash: sd_hash.to_string(),
        stream_hash: stream_hash.to_string(),
        stream_name: format!("{}-name", stream_hash),
        suggested_file_name: format!("{}.mp4", stream_hash),
        key: "deadbeef".to_string(),
        file_name: Some(format!("{}.mp4", stream_hash)),
        download_directory: Some("/tmp/streams".to_string()),
        status: SourceStatus::Finished,
        claim: None,
        content_fee: None,
        saved_file: true,
        added_on: Utc::now(),
    }
}

pub fn make_claim(claim_id: &str) -> ClaimInfo {
    ClaimInfo {
        claim_id: claim_id.to_string(),
        claim_name: format!("{}-name", claim_id),
        outpoint: format!("{}-txid:0", claim_id),
        channel_name: Some("@channel".to_string()),
    }
}

/// Default collaborator set wired with fresh mocks.
pub fn make_ctx() -> (
    SourceContext,
    Arc<MockChunkStore>,
    Arc<MockAssembler>,
    Arc<MockReflector>,
) {
    let store = Arc::new(MockChunkStore::new());
    let assembler = Arc::new(MockAssembler::linked_to(store.clone()));
    let reflector = Arc::new(MockReflector::new());
    let ctx = SourceContext {
        store: store.clone(),
        assembler: assembler.clone(),
        reflector: reflector.clone(),
        node: None,
    };
    (ctx, store, assembler, reflector)
}

pub fn make_record(
    manifest: StreamManifest,
) -> (Arc<StreamRecord>, Arc<MockChunkStore>, Arc<MockReflector>) {
    make_record_with_status(manifest, SourceStatus::Stopped)
}

pub fn make_record_with_status(
    manifest: StreamManifest,
    status: SourceStatus,
) -> (Arc<StreamRecord>, Arc<MockChunkStore>, Arc<MockReflector>) {
    let (ctx, store, _, reflector) = make_ctx();
    let record = Arc::new(StreamRecord::new(
        manifest,
        1,
        status,
        None,
        None,
        false,
        Utc::now(),
        ctx,
    ));
    (record, store, reflector)
}

// ========== Chunk store ==========

#[derive(Default)]
pub struct MockChunkStore {
    verified: Mutex<HashSet<String>>,
    deleted: Mutex<Vec<String>>,
}

impl MockChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verify(&self, chunk_hash: &str) {
        self.verified.lock().unwrap().insert(chunk_hash.to_string());
    }

    /// Mark the manifest chunk and every data chunk verified.
    pub fn verify_stream(&self, manifest: &StreamManifest) {
        let mut verified = self.verified.lock().unwrap();
        verified.insert(manifest.sd_hash.clone());
        for chunk in manifest.data_chunks() {
            verified.insert(chunk.chunk_hash.clone());
        }
    }

    pub fn unverify(&self, chunk_hash: &str) {
        self.verified.lock().unwrap().remove(chunk_hash);
    }

    /// Hashes passed to `delete_chunks`, in call order.
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChunkStore for MockChunkStore {
    async fn is_verified(&self, chunk_hash: &str) -> bool {
        self.verified.lock().unwrap().contains(chunk_hash)
    }

    async fn delete_chunks(&self, chunk_hashes: &[String], _purge_from_catalog: bool) -> Result<()> {
        let mut verified = self.verified.lock().unwrap();
        let mut deleted = self.deleted.lock().unwrap();
        for hash in chunk_hashes {
            verified.remove(hash);
            deleted.push(hash.clone());
        }
        Ok(())
    }
}

// ========== Assembler ==========

#[derive(Default)]
pub struct MockAssembler {
    manifests: Mutex<HashMap<String, StreamManifest>>,
    next_encoded: Mutex<Option<StreamManifest>>,
    ranges: Mutex<HashMap<String, Bytes>>,
    written: Mutex<Vec<(String, PathBuf)>>,
    persisted: Mutex<Vec<String>>,
    persist_failures: Mutex<HashSet<String>>,
    /// When linked, `persist_manifest` marks the manifest chunk verified.
    store: Option<Arc<MockChunkStore>>,
}

impl MockAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn linked_to(store: Arc<MockChunkStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::default()
        }
    }

    /// Make `persist_manifest` fail for this sd hash.
    pub fn fail_persist(&self, sd_hash: &str) {
        self.persist_failures
            .lock()
            .unwrap()
            .insert(sd_hash.to_string());
    }

    /// Sd hashes whose manifest chunks were rewritten, in call order.
    pub fn persisted_manifests(&self) -> Vec<String> {
        self.persisted.lock().unwrap().clone()
    }

    /// Make `load_manifest` succeed for this manifest's sd hash.
    pub fn put_manifest(&self, manifest: StreamManifest) {
        self.manifests
            .lock()
            .unwrap()
            .insert(manifest.sd_hash.clone(), manifest);
    }

    /// Queue the manifest the next `encode_file` call returns.
    pub fn set_encode_result(&self, manifest: StreamManifest) {
        *self.next_encoded.lock().unwrap() = Some(manifest);
    }

    /// Fix the full decrypted content served for one stream.
    pub fn set_content(&self, sd_hash: &str, content: Bytes) {
        self.ranges
            .lock()
            .unwrap()
            .insert(sd_hash.to_string(), content);
    }

    /// `(sd_hash, path)` pairs written so far.
    pub fn written_files(&self) -> Vec<(String, PathBuf)> {
        self.written.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamAssembler for MockAssembler {
    async fn encode_file(
        &self,
        file_path: &Path,
        _key: Option<Vec<u8>>,
        _iv_seed: Option<Vec<u8>>,
    ) -> Result<StreamManifest> {
        self.next_encoded.lock().unwrap().take().ok_or_else(|| {
            Error::Other(format!("no encode result queued for {}", file_path.display()))
        })
    }

    async fn load_manifest(&self, sd_hash: &str) -> Result<StreamManifest> {
        self.manifests
            .lock()
            .unwrap()
            .get(sd_hash)
            .cloned()
            .ok_or_else(|| Error::not_found("StreamManifest", sd_hash))
    }

    async fn persist_manifest(&self, manifest: &StreamManifest) -> Result<()> {
        if self
            .persist_failures
            .lock()
            .unwrap()
            .contains(&manifest.sd_hash)
        {
            return Err(Error::ChunkStore(format!(
                "cannot write manifest chunk {}",
                manifest.sd_hash
            )));
        }
        self.persisted.lock().unwrap().push(manifest.sd_hash.clone());
        if let Some(store) = &self.store {
            store.verify(&manifest.sd_hash);
        }
        self.put_manifest(manifest.clone());
        Ok(())
    }

    async fn write_file(
        &self,
        manifest: &StreamManifest,
        download_directory: &Path,
        file_name: &str,
        _node: Option<Arc<dyn PeerDiscovery>>,
    ) -> Result<PathBuf> {
        let path = download_directory.join(file_name);
        self.written
            .lock()
            .unwrap()
            .push((manifest.sd_hash.clone(), path.clone()));
        Ok(path)
    }

    async fn read_range(
        &self,
        manifest: &StreamManifest,
        range: ByteRange,
        _node: Option<Arc<dyn PeerDiscovery>>,
    ) -> Result<Bytes> {
        let ranges = self.ranges.lock().unwrap();
        let content = ranges
            .get(&manifest.sd_hash)
            .ok_or_else(|| Error::not_found("StreamContent", &manifest.sd_hash))?;
        let start = range.start.min(content.len() as u64) as usize;
        let end = range
            .end
            .map(|e| (e + 1).min(content.len() as u64) as usize)
            .unwrap_or(content.len());
        Ok(content.slice(start..end.max(start)))
    }
}

// ========== Reflector ==========

#[derive(Default)]
pub struct MockReflector {
    uploads: Mutex<HashMap<String, usize>>,
    failing: Mutex<HashSet<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockReflector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every upload of this stream fail.
    pub fn fail_stream(&self, sd_hash: &str) {
        self.failing.lock().unwrap().insert(sd_hash.to_string());
    }

    pub fn upload_count(&self, sd_hash: &str) -> usize {
        self.uploads.lock().unwrap().get(sd_hash).copied().unwrap_or(0)
    }

    pub fn total_uploads(&self) -> usize {
        self.uploads.lock().unwrap().values().sum()
    }

    /// High-water mark of concurrently running uploads.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReflectorClient for MockReflector {
    async fn upload(
        &self,
        manifest: &StreamManifest,
        host: &str,
        port: u16,
    ) -> Result<ReflectorOutcome> {
        *self
            .uploads
            .lock()
            .unwrap()
            .entry(manifest.sd_hash.clone())
            .or_insert(0) += 1;

        if self.failing.lock().unwrap().contains(&manifest.sd_hash) {
            return Err(Error::Reflector(format!(
                "connection to {}:{} refused",
                host, port
            )));
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        // long enough for uploads issued together to overlap
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(ReflectorOutcome {
            chunks_sent: manifest.data_chunks().len() + 1,
            fully_reflected: true,
        })
    }
}

// ========== Catalog ==========

pub struct MockCatalog {
    entries: Mutex<Vec<StreamEntry>>,
    inventories: Mutex<HashMap<String, Vec<ChunkDescriptor>>>,
    due: Mutex<Vec<String>>,
    claims: Mutex<HashMap<String, ClaimInfo>>,
    recovered: Mutex<Vec<Vec<RecoveredStream>>>,
    saved_new: Mutex<Vec<String>>,
    deleted_streams: Mutex<Vec<String>>,
    reconcile_calls: AtomicUsize,
    next_rowid: AtomicI64,
    pub broadcaster: ClaimChangeBroadcaster,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            inventories: Mutex::new(HashMap::new()),
            due: Mutex::new(Vec::new()),
            claims: Mutex::new(HashMap::new()),
            recovered: Mutex::new(Vec::new()),
            saved_new: Mutex::new(Vec::new()),
            deleted_streams: Mutex::new(Vec::new()),
            reconcile_calls: AtomicUsize::new(0),
            next_rowid: AtomicI64::new(100),
            broadcaster: ClaimChangeBroadcaster::new(),
        }
    }

    pub fn push_entry(&self, entry: StreamEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn set_inventory(&self, stream_hash: &str, chunks: Vec<ChunkDescriptor>) {
        self.inventories
            .lock()
            .unwrap()
            .insert(stream_hash.to_string(), chunks);
    }

    pub fn set_due(&self, sd_hashes: Vec<String>) {
        *self.due.lock().unwrap() = sd_hashes;
    }

    pub fn set_claim(&self, stream_hash: &str, claim: ClaimInfo) {
        self.claims
            .lock()
            .unwrap()
            .insert(stream_hash.to_string(), claim);
    }

    /// Batches passed to `save_recovered_manifests`, in call order.
    pub fn recovered_batches(&self) -> Vec<Vec<RecoveredStream>> {
        self.recovered.lock().unwrap().clone()
    }

    pub fn saved_new_streams(&self) -> Vec<String> {
        self.saved_new.lock().unwrap().clone()
    }

    pub fn deleted_streams(&self) -> Vec<String> {
        self.deleted_streams.lock().unwrap().clone()
    }

    pub fn reconcile_calls(&self) -> usize {
        self.reconcile_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Catalog for MockCatalog {
    async fn all_known_streams(&self) -> Result<Vec<StreamEntry>> {
        Ok(self.entries.lock().unwrap().clone())
    }

    async fn chunks_for_stream(&self, stream_hash: &str) -> Result<Vec<ChunkDescriptor>> {
        self.inventories
            .lock()
            .unwrap()
            .get(stream_hash)
            .cloned()
            .ok_or_else(|| Error::Catalog(format!("no chunk rows for stream {}", stream_hash)))
    }

    async fn streams_due_for_replication(&self) -> Result<Vec<String>> {
        Ok(self.due.lock().unwrap().clone())
    }

    async fn save_recovered_manifests(
        &self,
        batch: &[RecoveredStream],
        _download_dir: &Path,
    ) -> Result<()> {
        self.recovered.lock().unwrap().push(batch.to_vec());
        Ok(())
    }

    async fn save_new_stream(
        &self,
        manifest: &StreamManifest,
        _file_name: &str,
        _download_directory: &str,
    ) -> Result<i64> {
        self.saved_new.lock().unwrap().push(manifest.sd_hash.clone());
        Ok(self.next_rowid.fetch_add(1, Ordering::SeqCst))
    }

    async fn delete_stream(&self, manifest: &StreamManifest) -> Result<()> {
        self.deleted_streams
            .lock()
            .unwrap()
            .push(manifest.sd_hash.clone());
        self.entries
            .lock()
            .unwrap()
            .retain(|e| e.sd_hash != manifest.sd_hash);
        Ok(())
    }

    async fn current_claim(&self, stream_hash: &str) -> Result<Option<ClaimInfo>> {
        Ok(self.claims.lock().unwrap().get(stream_hash).cloned())
    }

    async fn reconcile_externally_removed_files(&self) -> Result<()> {
        self.reconcile_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn claim_changes(&self) -> broadcast::Receiver<ClaimChange> {
        self.broadcaster.subscribe()
    }
}
