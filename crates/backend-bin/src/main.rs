// ============================
// crates/backend-bin/src/main.rs
// ============================
//! Tokio / Axum entry point for the Gatehouse server.

use anyhow::Context;
use clap::Parser;
use gatehouse_lib::{
    auth::{MemoryCredentialStore, SystemClock},
    config::{Settings, DEFAULT_CONFIG_PATH},
    router::create_router,
    AppState,
};
use rand::RngCore;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "gatehouse", version, about = "Request gatekeeping server")]
struct Cli {
    /// Configuration file
    #[arg(long, env = "GATEHOUSE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override `server.host`
    #[arg(long, env = "GATEHOUSE_HOST")]
    host: Option<String>,

    /// Override `server.port`
    #[arg(long, env = "GATEHOUSE_PORT")]
    port: Option<u16>,

    /// Default log filter when `RUST_LOG` is unset
    #[arg(long, env = "GATEHOUSE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, env = "GATEHOUSE_JSON_LOGS")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(level) = cli.log_level {
        settings.log_level = level;
    }

    init_tracing(&settings.log_level, cli.json_logs);

    if settings.tokens.secret.is_empty() {
        warn!("tokens.secret is not set; using an ephemeral key, tokens will not survive a restart");
        let mut key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut key);
        settings.tokens.secret = hex::encode(key);
    }

    let state = AppState::new(
        settings,
        Arc::new(MemoryCredentialStore::new()),
        Arc::new(SystemClock),
    )?;

    // Evict idle rate-limit buckets
    let sweeper = state
        .rate_limiter()
        .spawn_sweeper(state.settings.sweep_interval());

    let app = create_router(state.clone());

    let addr = state.settings.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.abort();
    info!("server stopped");
    Ok(())
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
