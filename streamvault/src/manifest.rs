//! Stream manifest model.
//!
//! A manifest is an immutable, hash-identified document listing a stream's
//! ordered encrypted chunks and the key needed to decrypt them. The final
//! descriptor of every well-formed manifest is a zero-length terminator with
//! no backing chunk content.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One chunk of a stream as listed by its manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    /// Content hash of the encrypted chunk (hex).
    pub chunk_hash: String,
    /// Encrypted length in bytes; zero marks the stream terminator.
    pub length: u64,
    /// Zero-based position within the stream.
    pub position: u32,
}

impl ChunkDescriptor {
    pub fn new(chunk_hash: impl Into<String>, length: u64, position: u32) -> Self {
        Self {
            chunk_hash: chunk_hash.into(),
            length,
            position,
        }
    }

    /// Whether this descriptor is the zero-length stream terminator.
    pub fn is_terminator(&self) -> bool {
        self.length == 0
    }
}

/// Immutable description of one managed stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamManifest {
    /// Content hash of the manifest chunk itself; primary stream identity.
    pub sd_hash: String,
    /// Catalog-level stable stream identity.
    pub stream_hash: String,
    /// Display name of the stream.
    pub stream_name: String,
    /// File name suggested at publish time.
    pub suggested_file_name: String,
    /// Decryption key (hex).
    pub key: String,
    /// Ordered chunk descriptors, terminator last.
    pub chunks: Vec<ChunkDescriptor>,
}

impl StreamManifest {
    /// Decryption key decoded from its hex form.
    pub fn key_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(&self.key)
            .map_err(|e| Error::invalid_manifest(&self.sd_hash, format!("bad key hex: {}", e)))
    }

    /// Chunks carrying content, excluding the trailing terminator.
    pub fn data_chunks(&self) -> &[ChunkDescriptor] {
        match self.chunks.split_last() {
            Some((last, rest)) if last.is_terminator() => rest,
            _ => &self.chunks,
        }
    }

    /// Every hash with backing content: the manifest chunk plus all data
    /// chunks. The terminator has no backing content and is never included.
    pub fn deletable_hashes(&self) -> Vec<String> {
        let mut hashes = Vec::with_capacity(1 + self.data_chunks().len());
        hashes.push(self.sd_hash.clone());
        hashes.extend(self.data_chunks().iter().map(|c| c.chunk_hash.clone()));
        hashes
    }

    /// Reconstruct a manifest from the catalog's per-chunk inventory.
    ///
    /// Used when the manifest chunk itself is missing or unverifiable. Fails
    /// when the inventory is insufficient or inconsistent: empty, positions
    /// not contiguous from zero, terminator missing or misplaced, or a data
    /// chunk without a hash.
    pub fn from_inventory(
        sd_hash: impl Into<String>,
        stream_hash: impl Into<String>,
        stream_name: impl Into<String>,
        suggested_file_name: impl Into<String>,
        key: impl Into<String>,
        mut inventory: Vec<ChunkDescriptor>,
    ) -> Result<Self> {
        let sd_hash = sd_hash.into();

        inventory.sort_by_key(|c| c.position);

        for (expected, chunk) in inventory.iter().enumerate() {
            if chunk.position as usize != expected {
                return Err(Error::invalid_manifest(
                    &sd_hash,
                    format!(
                        "gap in chunk inventory at position {} (found {})",
                        expected, chunk.position
                    ),
                ));
            }
        }

        let Some((last, data)) = inventory.split_last() else {
            return Err(Error::invalid_manifest(&sd_hash, "empty chunk inventory"));
        };
        if !last.is_terminator() {
            return Err(Error::invalid_manifest(
                &sd_hash,
                "inventory does not end with a terminator chunk",
            ));
        }
        if let Some(bad) = data.iter().find(|c| c.is_terminator() || c.chunk_hash.is_empty()) {
            return Err(Error::invalid_manifest(
                &sd_hash,
                format!("invalid data chunk at position {}", bad.position),
            ));
        }

        Ok(Self {
            sd_hash,
            stream_hash: stream_hash.into(),
            stream_name: stream_name.into(),
            suggested_file_name: suggested_file_name.into(),
            key: key.into(),
            chunks: inventory,
        })
    }
}
