use clap::{Parser, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bouncer::config::{Settings, StoreBackend};
use bouncer::http::HttpServer;
use bouncer::ratelimit::{CounterStore, MemoryStore, RateLimiter, RedisStore};

/// How often the in-memory store drops lapsed entries.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Admission control service with per-IP and per-token rate limits.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Counter store backend, overriding the configuration file
    #[arg(long, value_enum)]
    store: Option<StoreBackend>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init(),
    }

    info!(version = env!("CARGO_PKG_VERSION"), "bouncer starting");

    let mut settings = match cli.config.as_deref() {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };
    // Process environment is applied last so it overrides .env entries
    settings.apply_env_file(".env")?;
    settings.apply_env(std::env::vars())?;
    if let Some(backend) = cli.store {
        settings.store.backend = backend;
    }
    settings.validate()?;

    let policy = settings.policy();
    info!(
        http_addr = %settings.server.http_addr,
        store = ?settings.store.backend,
        default_ip_limit = policy.default_ip_limit,
        default_token_limit = policy.default_token_limit,
        block_duration_secs = policy.block_duration.as_secs(),
        token_overrides = policy.token_overrides.len(),
        "Configuration loaded"
    );

    let store: Arc<dyn CounterStore> = match settings.store.backend {
        StoreBackend::Memory => {
            let memory = Arc::new(MemoryStore::new());
            let sweeper = memory.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(PURGE_INTERVAL);
                loop {
                    interval.tick().await;
                    sweeper.purge_expired();
                }
            });
            memory
        }
        StoreBackend::Redis => {
            let redis = &settings.store.redis;
            let url = RedisStore::url(&redis.host, redis.port, &redis.password, redis.db);
            Arc::new(RedisStore::connect(&url, settings.store.timeout()).await?)
        }
    };

    let rate_limiter = Arc::new(RateLimiter::new(store, policy));
    info!("Rate limiter initialized");

    let server = HttpServer::new(settings.server.http_addr, rate_limiter.clone());

    let served = server
        .serve_with_shutdown(async {
            let signal = wait_for_signal().await;
            info!(signal = signal, "Draining in-flight requests");
        })
        .await;

    // The store is released even when the server failed
    match rate_limiter.close().await {
        Ok(()) => info!("Counter store released"),
        Err(e) => warn!(error = %e, "Failed to release counter store"),
    }
    served?;

    info!("bouncer stopped");
    Ok(())
}

/// Resolve once the process is asked to stop, naming the signal received.
///
/// A handler that cannot be installed is logged and never resolves, so the
/// other signal still stops the service.
async fn wait_for_signal() -> &'static str {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => "SIGINT",
        () = terminate => "SIGTERM",
    }
}
