//! Profiling utilities based on the `puffin` crate.
//!
//! With the `profiling` feature disabled, `profile_function!` and
//! `profile_scope!` expand to nothing and the setup functions are no-ops.

#[cfg(feature = "profiling")]
use std::sync::OnceLock;

#[cfg(feature = "profiling")]
pub use puffin::{profile_function, profile_scope};

#[cfg(not(feature = "profiling"))]
pub use crate::{profile_function, profile_scope};

#[cfg(not(feature = "profiling"))]
#[doc(hidden)]
#[macro_export]
macro_rules! profile_function {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "profiling"))]
#[doc(hidden)]
#[macro_export]
macro_rules! profile_scope {
    ($($arg:tt)*) => {};
}

/// Profiling backend options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilingBackend {
    /// Send profiling data to puffin_viewer via HTTP.
    PuffinHttp,
}

/// Address the puffin server binds to.
pub const PUFFIN_ADDR: &str = "0.0.0.0:8585";

#[cfg(feature = "profiling")]
static PROFILING_SERVER: OnceLock<puffin_http::Server> = OnceLock::new();

/// Initialize profiling with the specified backend.
///
/// # Example
/// ```no_run
/// use relic_core::profiling::{init_profiling, ProfilingBackend};
///
/// init_profiling(ProfilingBackend::PuffinHttp);
/// ```
#[cfg(feature = "profiling")]
pub fn init_profiling(backend: ProfilingBackend) {
    match backend {
        ProfilingBackend::PuffinHttp => {
            if PROFILING_SERVER.get().is_some() {
                return;
            }
            puffin::set_scopes_on(true);

            match puffin_http::Server::new(PUFFIN_ADDR) {
                Ok(server) => {
                    tracing::info!("Puffin profiler server started on http://{}", PUFFIN_ADDR);
                    let _ = PROFILING_SERVER.set(server);
                }
                Err(e) => {
                    tracing::error!("Failed to start puffin server: {}", e);
                }
            }
        }
    }
}

#[cfg(not(feature = "profiling"))]
pub fn init_profiling(_backend: ProfilingBackend) {
    tracing::debug!("Profiling requested but the `profiling` feature is disabled");
}

/// Mark the start of a new frame for profiling.
///
/// Call this once per tick, typically right after draining the dispatch queue.
#[inline]
pub fn new_frame() {
    #[cfg(feature = "profiling")]
    puffin::GlobalProfiler::lock().new_frame();
}
