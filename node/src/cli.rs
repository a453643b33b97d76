//! # CLI Interface
//!
//! Defines the command-line argument structure for `tangle-node` using
//! `clap` derive. Supports four subcommands: `run`, `init`, `status`,
//! and `version`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use tangle_protocol::config::{DEFAULT_API_PORT, DEFAULT_METRICS_PORT, DEFAULT_UDP_PORT};

use crate::logging::LogFormat;

/// Tangle gossip node.
///
/// Stores and relays tangle transactions between a fixed set of UDP
/// neighbors, serves a small JSON API, and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "tangle-node",
    about = "Tangle gossip node",
    version,
    propagate_version = true
)]
pub struct TangleNodeCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the tangle node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Initialize a data directory with a default gossip configuration.
    Init(InitArgs),
    /// Query the status of a running node via its API.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Persistence backend behind the storage facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackend {
    /// Durable sled database under the data directory.
    Sled,
    /// In-memory maps, snapshotted to the data directory on shutdown.
    Memory,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Gossip configuration file (JSON).
    ///
    /// When omitted, the node looks for `gossip.json` in the data directory
    /// and falls back to built-in defaults. Flags below override the file.
    #[arg(long, short = 'c', env = "TANGLE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Node data directory. Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "TANGLE_DATA_DIR", default_value = "./tangle-data")]
    pub data_dir: PathBuf,

    /// Storage backend.
    #[arg(long, value_enum, env = "TANGLE_STORAGE", default_value_t = StorageBackend::Sled)]
    pub storage: StorageBackend,

    /// UDP port for gossip.
    #[arg(long, env = "TANGLE_UDP_PORT", default_value_t = DEFAULT_UDP_PORT)]
    pub udp_port: u16,

    /// Port for the JSON API.
    #[arg(long, env = "TANGLE_API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "TANGLE_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Neighbor URIs, e.g. `udp://node.example.org:14600`. Repeatable, or
    /// comma-separated in the environment variable.
    #[arg(long = "neighbor", short = 'n', env = "TANGLE_NEIGHBORS", value_delimiter = ',')]
    pub neighbors: Vec<String>,

    /// Probability of dropping an inbound transaction.
    #[arg(long, env = "TANGLE_P_DROP_TRANSACTION")]
    pub p_drop_transaction: Option<f64>,

    /// Probability of requesting the latest milestone on outbound packets.
    #[arg(long, env = "TANGLE_P_SELECT_MILESTONE")]
    pub p_select_milestone: Option<f64>,

    /// Probability of answering a random-tip request with the latest milestone.
    #[arg(long, env = "TANGLE_P_SEND_MILESTONE")]
    pub p_send_milestone: Option<f64>,

    /// Accept packets from unknown senders and add them as neighbors.
    /// Test networks only.
    #[arg(long, env = "TANGLE_PERMISSIVE")]
    pub permissive: bool,

    /// Reject transactions whose hash has fewer trailing zero trits.
    #[arg(long, env = "TANGLE_MIN_WEIGHT_MAGNITUDE", default_value_t = 0)]
    pub min_weight_magnitude: u32,

    /// Log output format.
    #[arg(long, value_enum, env = "TANGLE_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "TANGLE_DATA_DIR", default_value = "./tangle-data")]
    pub data_dir: PathBuf,

    /// Neighbor URIs to write into the generated configuration.
    #[arg(long = "neighbor", short = 'n', value_delimiter = ',')]
    pub neighbors: Vec<String>,

    /// Overwrite an existing configuration file.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// API endpoint of the running node.
    #[arg(long, env = "TANGLE_API_URL", default_value = "http://127.0.0.1:14265")]
    pub api_url: String,
}
