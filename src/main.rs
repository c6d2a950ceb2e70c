use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use hchdb::auth::AuthRegistry;
use hchdb::config::AppConfig;
use hchdb::manager::ConnectionManager;
use hchdb::responder::FallbackResponder;
use hchdb::server::HchDbServer;
use hchdb::{logging, metrics};

#[derive(Parser, Debug)]
#[command(author, version, about = "HchDB distributed database server", long_about = None)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "hchdb.yaml")]
    config: String,

    /// Overrides `server.host` from the config file.
    #[arg(long)]
    host: Option<String>,

    /// Overrides `server.ports.mysql` from the config file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Forces debug-level logging regardless of `logging.level`.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut app_config = AppConfig::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config))?;
    app_config.apply_env_overrides();

    if let Some(host) = args.host {
        app_config.server.host = host;
    }
    if let Some(port) = args.port {
        app_config.server.ports.mysql = port;
    }
    if args.debug {
        app_config.debug = true;
    }

    logging::init_logging(&app_config.logging.level, app_config.debug);
    metrics::init_metrics();

    let config = Arc::new(app_config);
    metrics::set_max_connections(config.connection.pool.max_connections);

    let users = config
        .authentication
        .users
        .iter()
        .map(|(name, user)| (name.clone(), user.password.clone()))
        .collect();
    let auth = AuthRegistry::new(users);

    let responder = Arc::new(FallbackResponder {
        server_version: config.server.server_version.clone(),
        max_connections: config.connection.pool.max_connections,
    });

    let manager = ConnectionManager::new(Arc::clone(&config), auth, responder);
    let mut server = HchDbServer::new(Arc::clone(&config), manager);

    server.start().await.context("failed to start HchDB servers")?;

    wait_for_shutdown_signal().await;

    server.stop().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("received Ctrl-C, shutting down");
}
