//! Vault configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Read-only configuration surface for the stream manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Whether completed streams are replicated to reflector servers.
    pub reflect_streams: bool,
    /// Reflector (redundancy) servers as (host, port) pairs.
    pub reflector_servers: Vec<(String, u16)>,
    /// Maximum uploads in flight from the periodic replication scheduler.
    pub concurrent_reflector_uploads: usize,
    /// Base directory for materialized stream files.
    pub download_dir: PathBuf,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            reflect_streams: true,
            reflector_servers: Vec::new(),
            concurrent_reflector_uploads: 3,
            download_dir: PathBuf::from("downloads"),
        }
    }
}

impl VaultConfig {
    /// Validate user-supplied configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.concurrent_reflector_uploads == 0 {
            return Err(crate::Error::config(
                "concurrent_reflector_uploads must be at least 1",
            ));
        }
        Ok(())
    }
}
