use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bouncer::config::{BouncerConfig, LogFormat, LoggingConfig, StoreBackend};
use bouncer::ratelimit::{CountingStore, MemoryStore, RateLimiter, RedisStore};
use bouncer::web::HttpServer;

/// How often the in-memory store drops expired counters and penalties.
const MEMORY_PURGE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "bouncer")]
#[command(about = "HTTP admission control with fixed-window rate limiting", version)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "BOUNCER_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides server.addr
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Keep counters in process memory instead of Redis
    #[arg(long)]
    memory_store: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let mut config = BouncerConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if args.memory_store {
        config.store.backend = StoreBackend::Memory;
    }

    init_tracing(&config.logging);

    info!("Starting Bouncer");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        addr = %config.server.addr,
        default_limit = config.rate_limiting.default_limit,
        api_keys = config.rate_limiting.api_keys.len(),
        blocked_time_secs = config.rate_limiting.blocked_time_secs,
        store = ?config.store.backend,
        "Configuration loaded"
    );

    let store: Arc<dyn CountingStore> = match config.store.backend {
        StoreBackend::Redis => Arc::new(RedisStore::connect(&config.store.redis_addr).await?),
        StoreBackend::Memory => {
            let store = Arc::new(MemoryStore::new());
            store.clone().spawn_purge_task(MEMORY_PURGE_INTERVAL);
            store
        }
    };

    let rate_limiter = Arc::new(RateLimiter::from_config(store, &config.rate_limiting));
    info!("Rate limiter initialized");

    HttpServer::new(config.server.addr, rate_limiter)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Bouncer stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match logging.format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
