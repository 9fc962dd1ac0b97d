//! Manifest recovery from catalog chunk inventory.
//!
//! When a stream's manifest chunk is missing or fails verification (chunk
//! files removed by hand, or chunk persistence was disabled at download
//! time), the manifest can be rebuilt from the per-chunk inventory the
//! catalog kept. Each reconstructed manifest is written back into the chunk
//! store so the stream verifies and replicates like any other; durable state
//! is flushed to the catalog in one batch at the end. Each candidate is
//! attempted independently so one bad record never aborts the pass.

use std::path::Path;

use futures::future::join_all;
use tracing::{info, warn};

use crate::Result;
use crate::assembler::StreamAssembler;
use crate::catalog::{Catalog, RecoveredStream, StreamEntry};
use crate::manifest::StreamManifest;

/// Attempt to rebuild manifests for every candidate entry, rewrite each
/// recovered manifest chunk into the chunk store, then flush the successful
/// ones to the catalog in one batch write.
///
/// Returns the recovered streams so the caller can register them without a
/// second chunk-store round trip.
pub async fn recover_streams<C: Catalog + ?Sized>(
    catalog: &C,
    assembler: &dyn StreamAssembler,
    entries: &[StreamEntry],
    download_dir: &Path,
) -> Result<Vec<RecoveredStream>> {
    let recovered: Vec<RecoveredStream> =
        join_all(entries.iter().map(|e| recover_one(catalog, assembler, e)))
            .await
            .into_iter()
            .flatten()
            .collect();

    if !recovered.is_empty() {
        catalog
            .save_recovered_manifests(&recovered, download_dir)
            .await?;
    }
    info!(
        "Recovered {}/{} attempted streams",
        recovered.len(),
        entries.len()
    );
    Ok(recovered)
}

/// Rebuild one stream's manifest from its catalog inventory and rewrite the
/// manifest chunk.
///
/// Insufficient or inconsistent inventory, or a failed chunk rewrite, yields
/// `None`; the stream is skipped and only logged.
async fn recover_one<C: Catalog + ?Sized>(
    catalog: &C,
    assembler: &dyn StreamAssembler,
    entry: &StreamEntry,
) -> Option<RecoveredStream> {
    let inventory = match catalog.chunks_for_stream(&entry.stream_hash).await {
        Ok(inventory) => inventory,
        Err(e) => {
            warn!(
                "Failed to read chunk inventory for stream {}: {}",
                entry.stream_hash, e
            );
            return None;
        }
    };

    let manifest = match StreamManifest::from_inventory(
        &entry.sd_hash,
        &entry.stream_hash,
        &entry.stream_name,
        &entry.suggested_file_name,
        &entry.key,
        inventory,
    ) {
        Ok(manifest) => manifest,
        Err(e) => {
            warn!("Could not recover manifest for {}: {}", entry.sd_hash, e);
            return None;
        }
    };

    if let Err(e) = assembler.persist_manifest(&manifest).await {
        warn!(
            "Failed to rewrite recovered manifest chunk for {}: {}",
            entry.sd_hash, e
        );
        return None;
    }

    Some(RecoveredStream {
        manifest,
        content_fee: entry.content_fee.clone(),
    })
}
