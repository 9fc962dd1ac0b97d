//! Stream manager: startup loading, replication scheduling, and lifecycle.
//!
//! The manager specializes the source registry for chunk-backed streams. It
//! replays the catalog into live records at startup (recovering manifests
//! where needed), resumes interrupted downloads as one cancellable unit,
//! runs the periodic replication scheduler under a hard concurrency cap,
//! applies claim changes to live records, and cancels all of its background
//! work on shutdown.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use rand::seq::IndexedRandom;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::assembler::ByteRange;
use crate::catalog::{Catalog, StreamEntry};
use crate::config::VaultConfig;
use crate::manifest::StreamManifest;
use crate::record::{SourceContext, StreamRecord};
use crate::recovery;
use crate::registry::SourceRegistry;
use crate::source::{ManagedSource, SourceStatus};
use crate::{Error, Result};

/// Interval between replication scan cycles.
const REFLECT_INTERVAL: Duration = Duration::from_secs(300);

/// Coordination layer over the live registry of chunk-backed streams.
pub struct StreamManager<C: Catalog + 'static> {
    config: VaultConfig,
    catalog: Arc<C>,
    ctx: SourceContext,
    registry: Arc<SourceRegistry<StreamRecord>>,
    /// Cancels every background unit this manager spawned.
    cancellation: CancellationToken,
    /// Combined resume-download unit from startup, if one was issued.
    resume_task: Mutex<Option<JoinHandle<()>>>,
    /// Periodic replication scheduler loop.
    reflect_task: Mutex<Option<JoinHandle<()>>>,
    /// Claim-change listener; its cancellation covers pending claim updates.
    claim_task: Mutex<Option<JoinHandle<()>>>,
    /// Ad hoc reflector uploads still in flight.
    uploads: Mutex<JoinSet<()>>,
}

impl<C: Catalog + 'static> StreamManager<C> {
    /// Create a manager over the given catalog and collaborators.
    ///
    /// Fails only on malformed configuration.
    pub fn new(config: VaultConfig, catalog: Arc<C>, ctx: SourceContext) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            catalog,
            ctx,
            registry: Arc::new(SourceRegistry::new()),
            cancellation: CancellationToken::new(),
            resume_task: Mutex::new(None),
            reflect_task: Mutex::new(None),
            claim_task: Mutex::new(None),
            uploads: Mutex::new(JoinSet::new()),
        })
    }

    pub fn registry(&self) -> &Arc<SourceRegistry<StreamRecord>> {
        &self.registry
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Whether `stop` has not been requested yet.
    pub fn is_running(&self) -> bool {
        !self.cancellation.is_cancelled()
    }

    // ========== Startup ==========

    /// Replay all catalog-known streams into live records.
    ///
    /// Runs exactly once at process start. Single-stream failures are
    /// skipped and logged; they never abort the rest of the load.
    pub async fn initialize_from_catalog(&self) -> Result<usize> {
        self.catalog.reconcile_externally_removed_files().await?;

        let entries = self.catalog.all_known_streams().await?;

        let mut to_recover = Vec::new();
        for entry in &entries {
            if !self.ctx.store.is_verified(&entry.sd_hash).await {
                to_recover.push(entry.clone());
            }
        }

        let mut recovered: HashMap<String, StreamManifest> = HashMap::new();
        if !to_recover.is_empty() {
            for stream in recovery::recover_streams(
                &*self.catalog,
                &*self.ctx.assembler,
                &to_recover,
                &self.config.download_dir,
            )
            .await?
            {
                recovered.insert(stream.manifest.sd_hash.clone(), stream.manifest);
            }
        }

        info!("Initializing {} streams", entries.len());

        let to_resume: Vec<(String, String, String)> = entries
            .iter()
            .filter(|e| !e.saved_file && e.status == SourceStatus::Running)
            .filter_map(|e| match (&e.file_name, &e.download_directory) {
                (Some(name), Some(dir)) => Some((e.sd_hash.clone(), name.clone(), dir.clone())),
                _ => None,
            })
            .collect();

        join_all(entries.into_iter().map(|entry| {
            let manifest = recovered.remove(&entry.sd_hash);
            self.load_stream(entry, manifest)
        }))
        .await;

        let count = self.registry.len();
        info!("Started stream manager with {} streams", count);
        if self.ctx.node.is_none() {
            info!("No discovery node given, resuming downloads trusting reflectors are reachable");
        }

        if !to_resume.is_empty() {
            self.spawn_resume_unit(to_resume);
        }

        Ok(count)
    }

    /// Construct and register one record from a catalog entry.
    ///
    /// `manifest` is the recovered manifest when this entry went through
    /// recovery; otherwise the manifest is read fresh from the chunk store.
    async fn load_stream(&self, entry: StreamEntry, manifest: Option<StreamManifest>) {
        let manifest = match manifest {
            Some(manifest) => manifest,
            None => match self.ctx.assembler.load_manifest(&entry.sd_hash).await {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!("Failed to start stream for sd {}: {}", entry.sd_hash, e);
                    return;
                }
            },
        };

        let record = Arc::new(StreamRecord::new(
            manifest,
            entry.rowid,
            entry.status,
            entry.file_name,
            entry.download_directory,
            entry.saved_file,
            entry.added_on,
            self.ctx.clone(),
        ));
        record.set_claim(entry.claim, entry.content_fee);
        self.registry.add(record);
    }

    /// Issue the combined resume-download unit for interrupted saves.
    fn spawn_resume_unit(&self, to_resume: Vec<(String, String, String)>) {
        info!("Resuming saving {} files", to_resume.len());

        let saves: Vec<(Arc<StreamRecord>, String, String)> = to_resume
            .into_iter()
            .filter_map(|(sd_hash, file_name, dir)| {
                self.registry.get(&sd_hash).map(|r| (r, file_name, dir))
            })
            .collect();

        let cancel = self.cancellation.clone();
        let handle = tokio::spawn(async move {
            let work = join_all(saves.into_iter().map(|(record, file_name, dir)| async move {
                if let Err(e) = record.save_file(&file_name, &dir).await {
                    warn!(
                        "Failed to resume saving stream {}: {}",
                        record.identifier(),
                        e
                    );
                }
            }));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = work => {}
            }
        });
        *self.resume_task.lock() = Some(handle);
    }

    // ========== Replication ==========

    /// One replication scan cycle. Returns the number of uploads issued.
    ///
    /// Candidates are drained from a private snapshot; the registry can be
    /// concurrently modified by record construction or claim updates.
    /// Never more than `concurrent_reflector_uploads` uploads are in flight
    /// from this scan at once.
    pub async fn reflect_streams_once(&self) -> Result<usize> {
        if !self.config.reflect_streams || self.config.reflector_servers.is_empty() {
            return Ok(0);
        }

        let due = self.catalog.streams_due_for_replication().await?;
        let mut candidates: Vec<Arc<StreamRecord>> = due
            .iter()
            .filter_map(|sd_hash| self.registry.get(sd_hash))
            .collect();

        let cap = self.config.concurrent_reflector_uploads;
        let mut issued = 0usize;
        let mut batch = Vec::new();

        while let Some(record) = candidates.pop() {
            if !self.ctx.store.is_verified(record.identifier()).await
                || !record.chunks_complete().await
            {
                continue;
            }
            if record.fully_reflected() {
                continue;
            }
            let Some((host, port)) = self.pick_reflector() else {
                break;
            };
            issued += 1;
            batch.push(async move {
                if let Err(e) = record.upload_to_reflector(&host, port).await {
                    warn!(
                        "Reflector upload failed for {}: {}",
                        record.identifier(),
                        e
                    );
                }
            });
            if batch.len() >= cap {
                join_all(std::mem::take(&mut batch)).await;
            }
        }
        if !batch.is_empty() {
            join_all(batch).await;
        }

        Ok(issued)
    }

    /// Choose a reflector server uniformly at random.
    fn pick_reflector(&self) -> Option<(String, u16)> {
        self.config
            .reflector_servers
            .choose(&mut rand::rng())
            .cloned()
    }

    fn spawn_reflect_loop(self: Arc<Self>) {
        let manager = self.clone();
        let cancel = self.cancellation.clone();
        let handle = tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                match manager.reflect_streams_once().await {
                    Ok(issued) if issued > 0 => {
                        debug!("Replication scan issued {} uploads", issued)
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Replication scan failed: {}", e),
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(REFLECT_INTERVAL) => {}
                }
            }
            debug!("Replication scheduler stopped");
        });
        *self.reflect_task.lock() = Some(handle);
    }

    /// Schedule one immediate upload for a newly created stream.
    ///
    /// Tracked in the upload set solely so shutdown can cancel whatever is
    /// still running.
    fn upload_stream_to_reflector(&self, record: Arc<StreamRecord>) {
        let Some((host, port)) = self.pick_reflector() else {
            return;
        };
        let cancel = self.cancellation.clone();
        let mut uploads = self.uploads.lock();
        // drop bookkeeping for uploads that already finished
        while uploads.try_join_next().is_some() {}
        uploads.spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                result = record.upload_to_reflector(&host, port) => {
                    if let Err(e) = result {
                        warn!(
                            "Ad hoc reflector upload failed for {}: {}",
                            record.identifier(),
                            e
                        );
                    }
                }
            }
        });
    }

    // ========== Claim binding ==========

    fn spawn_claim_listener(self: Arc<Self>) {
        let mut receiver = self.catalog.claim_changes();
        let manager = self.clone();
        let cancel = self.cancellation.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    change = receiver.recv() => match change {
                        Ok(change) => manager.update_content_claim(&change.stream_hash).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Claim listener lagged, {} changes dropped", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            debug!("Claim listener stopped");
        });
        *self.claim_task.lock() = Some(handle);
    }

    /// Refresh the claim binding of the record for `stream_hash`.
    ///
    /// Claim changes can race with record construction; an unregistered
    /// stream is a logged no-op.
    async fn update_content_claim(&self, stream_hash: &str) {
        let Some(record) = self.registry.get_by_stream_hash(stream_hash) else {
            debug!("Claim change for unregistered stream {}, ignoring", stream_hash);
            return;
        };
        match self.catalog.current_claim(stream_hash).await {
            Ok(claim) => {
                record.set_claim(claim, record.content_fee());
                debug!("Updated claim binding for stream {}", stream_hash);
            }
            Err(e) => warn!("Failed to fetch claim for {}: {}", stream_hash, e),
        }
    }

    // ========== Lifecycle ==========

    /// Load the catalog, then activate the background schedulers.
    pub async fn start(self: Arc<Self>) -> Result<usize> {
        let count = self.initialize_from_catalog().await?;
        self.registry.mark_started();
        self.clone().spawn_claim_listener();
        self.clone().spawn_reflect_loop();
        Ok(count)
    }

    /// Cancel all background work and drain the registry.
    ///
    /// Cancellations are requested, not awaited. Safe to call repeatedly and
    /// on work that already completed.
    pub fn stop(&self) {
        self.cancellation.cancel();
        if let Some(task) = self.resume_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.reflect_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.claim_task.lock().take() {
            task.abort();
        }
        self.uploads.lock().abort_all();
        self.registry.stop();
        info!("Finished stopping the stream manager");
    }

    // ========== Stream operations ==========

    /// Materialize a new local stream from `file_path` and register it.
    pub async fn create_stream(
        &self,
        file_path: &Path,
        key: Option<Vec<u8>>,
        iv_seed: Option<Vec<u8>>,
    ) -> Result<Arc<StreamRecord>> {
        let file_name = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::validation(format!("invalid stream file path {}", file_path.display()))
            })?
            .to_string();
        let download_directory = file_path
            .parent()
            .and_then(|p| p.to_str())
            .unwrap_or("")
            .to_string();

        let manifest = self.ctx.assembler.encode_file(file_path, key, iv_seed).await?;
        let rowid = self
            .catalog
            .save_new_stream(&manifest, &file_name, &download_directory)
            .await?;

        let record = Arc::new(StreamRecord::new(
            manifest,
            rowid,
            SourceStatus::Finished,
            Some(file_name),
            Some(download_directory),
            true,
            Utc::now(),
            self.ctx.clone(),
        ));
        let record = self.registry.add(record);

        if self.config.reflect_streams {
            self.upload_stream_to_reflector(record.clone());
        }
        Ok(record)
    }

    /// Delete a stream's chunks and catalog row, then drop it from the
    /// registry.
    ///
    /// Chunk-store and catalog deletion are independent calls; no
    /// compensation is attempted when one fails after the other succeeded.
    pub async fn delete_stream(&self, record: &Arc<StreamRecord>, delete_file: bool) -> Result<()> {
        let hashes = record.manifest().deletable_hashes();
        self.ctx.store.delete_chunks(&hashes, false).await?;
        self.catalog.delete_stream(record.manifest()).await?;
        self.registry.remove(record.identifier());

        if delete_file {
            if let Some(path) = record.full_path() {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => debug!("Deleted stream file {}", path.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    /// Serve one byte range of a registered stream.
    pub async fn serve_partial_content(&self, range: ByteRange, sd_hash: &str) -> Result<Bytes> {
        let record = self
            .registry
            .get(sd_hash)
            .ok_or_else(|| Error::not_found("Stream", sd_hash))?;
        record.serve_range(range).await
    }
}
