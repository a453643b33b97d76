// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Tangle Node
//!
//! Entry point for the `tangle-node` binary. Parses CLI arguments, opens
//! storage, starts the gossip engine and its UDP transport, and serves the
//! JSON API and Prometheus metrics.
//!
//! The binary supports four subcommands:
//!
//! - `run`     — start the node
//! - `init`    — create a data directory with a default gossip config
//! - `status`  — query a running node's status endpoint
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use tangle_protocol::ledger::{MilestoneIndex, TipIndex};
use tangle_protocol::network::{
    GossipComponents, GossipConfig, GossipEngine, PendingRequests, UdpTransport,
};
use tangle_protocol::storage::{
    MemoryProvider, MemoryProviderConfig, PersistenceProvider, Tangle, TangleDB,
};
use tangle_protocol::transaction::{StructuralValidator, TransactionRecord};

use cli::{Commands, StorageBackend, TangleNodeCli};
use logging::LogFormat;
use metrics::NodeMetrics;

/// Name of the gossip configuration file inside the data directory.
const GOSSIP_CONFIG_FILE: &str = "gossip.json";

/// How often engine state is copied into the Prometheus gauges.
const METRICS_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = TangleNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the full node: storage, gossip, API server and metrics endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(logging::DEFAULT_FILTER, args.log_format);

    tracing::info!(
        udp_port = args.udp_port,
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        storage = ?args.storage,
        data_dir = %args.data_dir.display(),
        "starting tangle-node"
    );

    std::fs::create_dir_all(&args.data_dir).with_context(|| {
        format!("failed to create data directory: {}", args.data_dir.display())
    })?;

    let config = gossip_config(&args)?;

    // --- Storage ---
    let provider = open_provider(args.storage, &args.data_dir)?;
    let tangle = Tangle::new(vec![provider]);
    tangle.init().await.context("failed to initialize storage")?;

    let tips = Arc::new(TipIndex::new());
    let loaded = tips
        .load_tip_hashes(&tangle)
        .await
        .context("failed to load tips")?;
    let milestones = Arc::new(MilestoneIndex::new(tangle.clone()));
    milestones
        .load_latest()
        .await
        .context("failed to load latest milestone")?;
    tracing::info!(tips = loaded, "ledger views restored");

    // --- Gossip ---
    let udp_addr = SocketAddr::from(([0, 0, 0, 0], args.udp_port));
    let transport = Arc::new(
        UdpTransport::bind(udp_addr)
            .await
            .with_context(|| format!("failed to bind gossip socket on {}", udp_addr))?,
    );
    let engine = Arc::new(GossipEngine::new(
        config,
        GossipComponents {
            tangle: tangle.clone(),
            tips: Arc::clone(&tips),
            milestones: Arc::clone(&milestones),
            requester: Arc::new(PendingRequests::default()),
            validator: Arc::new(StructuralValidator::new(args.min_weight_magnitude)),
            transport: transport.clone(),
        },
    ));
    engine.init_neighbors().await;
    engine.start();

    let receiver = {
        let transport = Arc::clone(&transport);
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { transport.run_receiver(engine).await })
    };

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to create metrics registry")?);
    let sampler = spawn_metrics_sampler(
        Arc::clone(&node_metrics),
        Arc::clone(&engine),
        Arc::clone(&tips),
        tangle.clone(),
    );

    // --- Application state ---
    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            tangle_protocol::config::PROTOCOL_VERSION,
        ),
        tangle: tangle.clone(),
        engine: Arc::clone(&engine),
        tips,
        milestones,
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, stopping gossip");
        }
    }

    engine.shutdown().await;
    if let Err(e) = receiver.await {
        tracing::warn!(error = %e, "udp receiver task failed");
    }
    sampler.abort();
    tangle
        .shutdown()
        .await
        .context("failed to shut down storage")?;
    tracing::info!("tangle-node stopped");
    Ok(())
}

/// Loads the gossip config file (explicit path, else `gossip.json` in the
/// data directory, else defaults) and applies CLI overrides.
fn gossip_config(args: &cli::RunArgs) -> Result<GossipConfig> {
    let path = args
        .config
        .clone()
        .unwrap_or_else(|| args.data_dir.join(GOSSIP_CONFIG_FILE));

    let mut config = if path.exists() {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str::<GossipConfig>(&raw)
            .with_context(|| format!("invalid gossip config in {}", path.display()))?
    } else if args.config.is_some() {
        anyhow::bail!("config file not found: {}", path.display());
    } else {
        GossipConfig::default()
    };

    if !args.neighbors.is_empty() {
        config.neighbors = args.neighbors.clone();
    }
    if let Some(p) = args.p_drop_transaction {
        config.p_drop_transaction = p;
    }
    if let Some(p) = args.p_select_milestone {
        config.p_select_milestone = p;
    }
    if let Some(p) = args.p_send_milestone {
        config.p_send_milestone = p;
    }
    config.permissive |= args.permissive;

    for (name, p) in [
        ("p_drop_transaction", config.p_drop_transaction),
        ("p_select_milestone", config.p_select_milestone),
        ("p_send_milestone", config.p_send_milestone),
    ] {
        if !(0.0..=1.0).contains(&p) {
            anyhow::bail!("{} must be between 0 and 1, got {}", name, p);
        }
    }
    if config.permissive {
        tracing::warn!("permissive mode: unknown senders become neighbors");
    }
    Ok(config)
}

fn open_provider(backend: StorageBackend, data_dir: &Path) -> Result<Arc<dyn PersistenceProvider>> {
    let provider: Arc<dyn PersistenceProvider> = match backend {
        StorageBackend::Sled => {
            let db_path = data_dir.join("db");
            let db = TangleDB::open(&db_path)
                .with_context(|| format!("failed to open database at {}", db_path.display()))?;
            tracing::info!(path = %db_path.display(), "database opened");
            Arc::new(db)
        }
        StorageBackend::Memory => {
            let backup_path: PathBuf = data_dir.join("memory.snapshot");
            tracing::info!(backup = %backup_path.display(), "using in-memory storage");
            Arc::new(MemoryProvider::new(MemoryProviderConfig {
                backup_path: Some(backup_path),
            }))
        }
    };
    Ok(provider)
}

fn spawn_metrics_sampler(
    node_metrics: Arc<NodeMetrics>,
    engine: Arc<GossipEngine>,
    tips: Arc<TipIndex>,
    tangle: Tangle,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(METRICS_SAMPLE_INTERVAL);
        loop {
            interval.tick().await;
            let stored = match TransactionRecord::count(&tangle).await {
                Ok(count) => count,
                Err(e) => {
                    tracing::debug!(error = %e, "metrics: cannot count transactions");
                    continue;
                }
            };
            node_metrics.observe(&engine.stats(), &engine.neighbor_stats(), &tips, stored);
        }
    })
}

/// Creates a data directory with a default `gossip.json`.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging(logging::INIT_FILTER, LogFormat::Pretty);

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "initializing node");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let config_path = data_dir.join(GOSSIP_CONFIG_FILE);
    if config_path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    let config = GossipConfig {
        neighbors: args.neighbors.clone(),
        ..GossipConfig::default()
    };
    let json = serde_json::to_string_pretty(&config).context("failed to serialize config")?;
    std::fs::write(&config_path, json)
        .with_context(|| format!("failed to write {}", config_path.display()))?;

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Gossip config  : {}", config_path.display());
    println!("  Neighbors      : {}", config.neighbors.len());

    Ok(())
}

/// Queries a running node's status endpoint and prints the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/status", args.api_url.trim_end_matches('/'));
    let body = http_get(&url).await?;
    println!("{}", body);
    Ok(())
}

/// Splits an `http://` URL into the socket address to dial and the raw
/// request to send.
fn get_request(url: &str) -> Result<(String, String)> {
    let parsed: url::Url = url
        .parse()
        .with_context(|| format!("invalid URL: {}", url))?;
    if parsed.scheme() != "http" {
        anyhow::bail!("unsupported scheme {:?}, only http is supported", parsed.scheme());
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("missing host in URL"))?;
    let addr = format!("{}:{}", host, parsed.port().unwrap_or(80));
    let path = match parsed.query() {
        Some(query) => format!("{}?{}", parsed.path(), query),
        None => parsed.path().to_string(),
    };
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, addr,
    );
    Ok((addr, request))
}

/// Minimal HTTP/1.1 GET over a raw tokio TCP stream. Plain `http://` only.
async fn http_get(url: &str) -> Result<String> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let (addr, request) = get_request(url)?;
    let mut stream = tokio::net::TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    stream.write_all(request.as_bytes()).await?;
    stream.shutdown().await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);

    // Everything after the first blank line is the body.
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_else(|| response.to_string());

    Ok(body)
}

/// Prints version information to stdout.
fn print_version() {
    println!("tangle-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol    {}", tangle_protocol::config::PROTOCOL_VERSION);
    println!("rustc       {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. If a handler cannot be
/// installed, that signal source is ignored.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
