//! Collaborator seams for the stream wire format and remote endpoints.
//!
//! Chunk encryption, manifest encoding, and reflector protocol mechanics are
//! external concerns; the traits here are the full surface this layer drives
//! them through.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;
use crate::manifest::StreamManifest;

/// An inclusive byte range requested by a partial-content caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Inclusive end; `None` means until end of stream.
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: Option<u64>) -> Self {
        Self { start, end }
    }
}

/// Distributed lookup used to locate remote chunk providers when local
/// content is partial. Absence of a node is informational, not an error:
/// downloads can still contact reflector servers directly.
#[async_trait]
pub trait PeerDiscovery: Send + Sync {
    /// Peers announcing the given chunk.
    async fn providers_for(&self, chunk_hash: &str) -> Result<Vec<SocketAddr>>;
}

/// Encoder/decoder for the external manifest+chunk format.
#[async_trait]
pub trait StreamAssembler: Send + Sync {
    /// Encode a local file into encrypted chunks in the chunk store and
    /// return the resulting manifest.
    async fn encode_file(
        &self,
        file_path: &Path,
        key: Option<Vec<u8>>,
        iv_seed: Option<Vec<u8>>,
    ) -> Result<StreamManifest>;

    /// Read and parse the manifest chunk for `sd_hash` from the chunk store.
    async fn load_manifest(&self, sd_hash: &str) -> Result<StreamManifest>;

    /// Re-encode a reconstructed manifest and write its chunk back into the
    /// chunk store so the manifest hash verifies again.
    async fn persist_manifest(&self, manifest: &StreamManifest) -> Result<()>;

    /// Materialize a stream to disk, fetching missing chunks from remote
    /// providers via `node` when one is available. Returns the written path.
    async fn write_file(
        &self,
        manifest: &StreamManifest,
        download_directory: &Path,
        file_name: &str,
        node: Option<Arc<dyn PeerDiscovery>>,
    ) -> Result<PathBuf>;

    /// Decrypt and return one byte range of a stream.
    async fn read_range(
        &self,
        manifest: &StreamManifest,
        range: ByteRange,
        node: Option<Arc<dyn PeerDiscovery>>,
    ) -> Result<Bytes>;
}

/// Outcome of one upload attempt against a reflector server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReflectorOutcome {
    /// Chunks actually sent this attempt.
    pub chunks_sent: usize,
    /// Whether the server now holds the manifest chunk and every data chunk.
    pub fully_reflected: bool,
}

/// Transport for uploading a stream to one redundancy server.
#[async_trait]
pub trait ReflectorClient: Send + Sync {
    /// Upload the manifest chunk plus whatever data chunks the server
    /// reports missing.
    async fn upload(
        &self,
        manifest: &StreamManifest,
        host: &str,
        port: u16,
    ) -> Result<ReflectorOutcome>;
}
