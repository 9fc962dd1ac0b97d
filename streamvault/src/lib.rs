//! Coordination layer for content-addressed, chunked media streams.
//!
//! Streams are immutable sequences of encrypted chunks described by a
//! hash-identified manifest. This crate tracks the set of known streams as
//! live in-memory records, rebuilds lost manifests from catalog inventory,
//! resumes interrupted downloads, replicates completed streams to reflector
//! servers under a bounded-concurrency scheduler, and keeps claim metadata
//! on live records current.
//!
//! Storage, wire formats, and networks stay behind trait seams: the
//! [`catalog::Catalog`] holds durable stream records, the
//! [`store::ChunkStore`] holds verified chunks, and the
//! [`assembler::StreamAssembler`] / [`assembler::ReflectorClient`] pair
//! drives encoding and replication transport. [`manager::StreamManager`]
//! ties them together.

pub mod assembler;
pub mod catalog;
pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod manifest;
pub mod record;
pub mod recovery;
pub mod registry;
pub mod source;
pub mod store;

#[cfg(test)]
mod test_support;

pub use assembler::{ByteRange, PeerDiscovery, ReflectorClient, ReflectorOutcome, StreamAssembler};
pub use catalog::{Catalog, ClaimChange, ClaimChangeBroadcaster, ClaimInfo, StreamEntry};
pub use config::VaultConfig;
pub use error::{Error, Result};
pub use manager::StreamManager;
pub use manifest::{ChunkDescriptor, StreamManifest};
pub use record::{SourceContext, StreamRecord};
pub use registry::{CompareOp, SortField, SourceRegistry};
pub use source::{ManagedSource, SourceKind, SourceStatus};
pub use store::ChunkStore;
