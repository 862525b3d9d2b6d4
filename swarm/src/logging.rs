//! Development-time tracing for debugging repair sessions.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Dev diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted, not part of product output.
//!
//! - **Experiment log (`io/experiment_log`)**: One JSON entry per repair stage,
//!   written to `logs/experiment_data.json`. Always written, unaffected by `RUST_LOG`.
//!
//! - **Console summary**: Per-file status lines and `MISSION_COMPLETE` on stdout.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber for development logging.
///
/// Reads `RUST_LOG` env var. Defaults to `warn` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=swarm=debug swarm --target-dir ./sandbox
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
