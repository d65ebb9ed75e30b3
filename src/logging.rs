//! Logging setup
//!
//! Installs a `tracing-subscriber` fmt layer on stderr, filtered by an
//! `EnvFilter`. The filter comes from `--log-level` / `INVENTORY_SYNC_LOG`,
//! falling back to `info`.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when none is given
pub const DEFAULT_FILTER: &str = "info";

/// Build the filter for `directives`, or the default
pub fn build_filter(directives: Option<&str>) -> Result<EnvFilter> {
    let directives = directives.unwrap_or(DEFAULT_FILTER);
    EnvFilter::try_new(directives).with_context(|| format!("Invalid log filter: {}", directives))
}

/// Install the global subscriber
///
/// # Errors
///
/// Fails if the filter is invalid or a global subscriber is already set.
pub fn init(directives: Option<&str>) -> Result<()> {
    let filter = build_filter(directives)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_names(true),
        )
        .try_init()
        .context("Failed to initialize logging")
}
