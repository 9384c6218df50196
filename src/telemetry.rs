//! Logging initialization.
//!
//! The teacher's own `telemetry.rs` wires an OpenTelemetry exporter pipeline around an
//! Axum HTTP server; this engine has no HTTP surface to trace, so that pipeline is dropped
//! (see DESIGN.md) and only the `tracing-subscriber` `fmt` layer with `EnvFilter` remains,
//! controlled by `RUST_LOG` the same way the teacher's own fallback path works.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs a `tracing-subscriber` `fmt` layer filtered by `RUST_LOG` (default `info`).
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish()
        .try_init()
        .ok();
}
