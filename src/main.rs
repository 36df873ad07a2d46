use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use webinsight::config::{LoggingConfig, WebInsightConfig};
use webinsight::pipeline::QueuedPipeline;
use webinsight::ratelimit::{CounterStore, FailoverStore, MemoryStore, RateLimiter, RedisStore};
use webinsight::server::{AppState, HttpServer, StaticTokenIdentity};

/// How often expired in-memory counters are dropped.
const PURGE_INTERVAL: Duration = Duration::from_secs(300);

/// Website analysis gateway with anonymous rate limiting.
#[derive(Debug, Parser)]
#[command(name = "webinsight", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "WEBINSIGHT_CONFIG")]
    config: Option<String>,

    /// Override the HTTP listen address
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Override the Redis connection URL
    #[arg(long)]
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = WebInsightConfig::load(cli.config.as_deref())?;
    if let Some(addr) = cli.http_addr {
        config.server.http_addr = addr;
    }
    if let Some(url) = cli.redis_url {
        config.redis.url = Some(url);
    }

    init_tracing(&config.logging);

    info!("Starting WebInsight");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(http_addr = %config.server.http_addr, "Configuration loaded");

    let fallback = Arc::new(MemoryStore::new());
    let primary: Option<Arc<dyn CounterStore>> = match config.redis.url.as_deref() {
        Some(url) => match RedisStore::open(url, config.redis.timeout()) {
            Ok(store) => {
                info!("Rate limit counters stored in Redis");
                let store = store.with_reconnect_backoff(config.redis.reconnect_backoff());
                Some(Arc::new(store) as Arc<dyn CounterStore>)
            }
            Err(e) => {
                warn!(error = %e, "Invalid Redis URL, rate limit counters kept in memory");
                None
            }
        },
        None => {
            warn!("No Redis URL configured, rate limit counters kept in memory");
            None
        }
    };

    let store = Arc::new(FailoverStore::new(primary, fallback.clone()));
    let limiter = RateLimiter::new(store, config.rate_limiting)
        .with_key_prefix(config.redis.key_prefix.clone());
    info!(
        hourly_limit = config.rate_limiting.hourly.limit,
        daily_limit = config.rate_limiting.daily.limit,
        "Rate limiter initialized"
    );

    tokio::spawn(purge_expired(fallback));

    let state = AppState::new(
        Arc::new(limiter),
        Arc::new(StaticTokenIdentity::new(config.auth.tokens.clone())),
        Arc::new(QueuedPipeline),
    );

    HttpServer::new(config.server.http_addr, state)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("WebInsight stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }
}

/// Periodically drop expired counters from the in-memory store.
async fn purge_expired(store: Arc<MemoryStore>) {
    let mut interval = tokio::time::interval(PURGE_INTERVAL);
    loop {
        interval.tick().await;
        let removed = store.purge_expired();
        if removed > 0 {
            tracing::debug!(removed = removed, "Purged expired in-memory counters");
        }
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
