//! Logging setup based on `tracing-subscriber`.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,relic_core=debug,relic_assets=debug,notify=warn";

/// Install the global `fmt` subscriber.
///
/// Honours `RUST_LOG` and falls back to [`DEFAULT_FILTER`]. Calling this more
/// than once is harmless; later calls leave the first subscriber in place.
pub fn init() {
    if let Err(e) = try_init() {
        tracing::debug!("Logging already initialized: {}", e);
    }
}

/// Install the global `fmt` subscriber, reporting failure instead of ignoring it.
pub fn try_init() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).try_init()
}
