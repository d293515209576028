//! Round-robin reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request      ┌────────────┐    ┌──────────────┐    ┌─────────────┐
//!     ───────────────────▶│    http    │───▶│ load_balancer│───▶│   backend   │────▶ Backend
//!                         │   server   │    │  round robin │    │  (forward)  │      Server
//!     Client Response     │            │    │   + failover │    │             │
//!     ◀───────────────────│            │◀───│              │◀───│  streaming  │◀────
//!                         └────────────┘    └──────────────┘    └─────────────┘
//!
//!     Cross-cutting: config, health (passive/active), observability, lifecycle
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::net::TcpListener;

use round_robin_proxy::config::{
    load_config, validate_config, BackendConfig, ConfigError, ProxyConfig, SelectionPolicy,
};
use round_robin_proxy::lifecycle::{shutdown_signal, Shutdown};
use round_robin_proxy::observability::{logging, metrics};
use round_robin_proxy::{HttpServer, ProxyError};

#[derive(Parser)]
#[command(name = "round-robin-proxy")]
#[command(about = "Round-robin HTTP reverse proxy", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the config file).
    #[arg(short, long)]
    listen: Option<String>,

    /// Port to listen on, on all interfaces.
    #[arg(short, long, conflicts_with = "listen")]
    port: Option<u16>,

    /// Backend base URL; repeat to build the pool in rotation order.
    #[arg(short, long = "backend")]
    backends: Vec<String>,

    /// How dead backends are skipped.
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    SingleSkip,
    Scan,
}

impl From<PolicyArg> for SelectionPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::SingleSkip => SelectionPolicy::SingleSkip,
            PolicyArg::Scan => SelectionPolicy::Scan,
        }
    }
}

/// Load the config file (if any), apply CLI overrides, then validate.
fn resolve_config(cli: &Cli) -> Result<ProxyConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    if let Some(listen) = &cli.listen {
        config.listener.bind_address = listen.clone();
    }
    if let Some(port) = cli.port {
        config.listener.bind_address = SocketAddr::from(([0, 0, 0, 0], port)).to_string();
    }
    if !cli.backends.is_empty() {
        config.backends = cli.backends.iter().map(BackendConfig::new).collect();
    }
    if let Some(policy) = cli.policy {
        config.balancer.policy = policy.into();
    }

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = resolve_config(&cli)?;

    logging::init_logging(&config.observability);

    tracing::info!("round-robin-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backends = config.backends.len(),
        policy = ?config.balancer.policy,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let bind_address = config.listener.bind_address.clone();
    let server = HttpServer::new(config)?;

    let listener = TcpListener::bind(&bind_address)
        .await
        .map_err(|source| ProxyError::Listen {
            address: bind_address.clone(),
            source,
        })?;

    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_shutdown.trigger();
    });

    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
