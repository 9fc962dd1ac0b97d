//! Logging initialization.
//!
//! Thin wrapper over `tracing_subscriber` so binaries and tests embedding the
//! vault get consistent output. Filtering honors `RUST_LOG` when set,
//! otherwise falls back to the provided directive.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "streamvault=info";

/// Initialize the global tracing subscriber.
///
/// Safe to call once per process; returns an error string if a subscriber is
/// already installed or the directive is invalid.
pub fn init_logging(directive: &str) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .map_err(|e| crate::Error::config(format!("Invalid filter directive: {}", e)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .map_err(|e| crate::Error::Other(format!("Failed to set subscriber: {}", e)))?;

    Ok(())
}
