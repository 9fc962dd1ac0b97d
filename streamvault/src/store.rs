//! Chunk store collaborator seam.

use async_trait::async_trait;

use crate::Result;

/// External store holding individually hash-verified encrypted chunks.
///
/// Verification, wire format, and on-disk layout are the store's concern;
/// this layer only coordinates against the contract below. Chunk reads and
/// writes flow through the assembler, which owns the wire format.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Whether the chunk exists locally and passed hash verification.
    async fn is_verified(&self, chunk_hash: &str) -> bool;

    /// Delete the given chunks. `purge_from_catalog` additionally drops the
    /// store's own bookkeeping rows for them.
    async fn delete_chunks(&self, chunk_hashes: &[String], purge_from_catalog: bool) -> Result<()>;
}
