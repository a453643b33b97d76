//! Tracing setup for `tangle-node`.
//!
//! Everything is written to stderr: `tangle-node status` prints its report on
//! stdout and must stay pipeable. `RUST_LOG` wins over the built-in filters.

use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Colored, one event per line, with source locations.
    Pretty,
    /// One JSON object per event, for log shippers.
    Json,
}

/// Filter for `run`. Per-packet gossip events are logged at debug, so raise
/// `tangle_protocol::network` when chasing a neighbor problem.
pub const DEFAULT_FILTER: &str = "tangle_node=info,tangle_protocol=info,tower_http=warn";

/// Filter for the one-shot `init` command.
pub const INIT_FILTER: &str = "tangle_node=info";

/// Installs the global subscriber. Panics if one is already installed.
///
/// `fallback` applies only when `RUST_LOG` is unset or unparsable, e.g.
/// `RUST_LOG=tangle_protocol::network::gossip=trace`.
pub fn init_logging(fallback: &str, format: LogFormat) {
    let (filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::new(fallback), false),
    };

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr).with_target(true))
            .init(),
    }

    tracing::debug!(?format, from_env, "tracing subscriber installed");
}
