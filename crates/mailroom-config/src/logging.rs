//! Logging initialization for the mailroom agent.
//!
//! Unlike the daemon this agent was split out of, there is no central
//! JSONL sink or remote telemetry backend to wire up here — this agent's
//! only consumer of diagnostics is whoever is watching its stderr (spec.md
//! §7: "all diagnostic messages go to standard error with a timestamp").
//! `tracing-subscriber`'s `fmt` layer with an `EnvFilter` covers that on
//! its own.

use tracing_subscriber::{fmt, EnvFilter};

/// Initializes a `tracing` subscriber that writes timestamped, leveled
/// lines to stderr. `level` seeds the default filter directive; it is
/// still overridable by the `RUST_LOG` environment variable.
pub fn init_logging(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
