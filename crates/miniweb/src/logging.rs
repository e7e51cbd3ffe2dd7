// src/logging.rs
//! Logging initialization.
//!
//! `RUST_LOG` wins when set, e.g. `RUST_LOG=miniweb_core=trace,miniweb=debug`.
//! Otherwise the level is `info`, or `debug` with `-v` / `verbose yes`.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. A second call is a no-op.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .try_init();
}
