//! Market Cache - admin server
//!
//! Hosts the cache namespaces, the rate limiter and the maintenance worker
//! behind a small HTTP admin surface.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use market_cache::api::{create_router, AppState};
use market_cache::cache::envelope::generate_key;
use market_cache::cache::CacheManager;
use market_cache::clock::{SharedClock, SystemClock};
use market_cache::config::Config;
use market_cache::ratelimit::RateLimiter;
use market_cache::storage::{FileStore, MemoryStore, PersistentStore};
use market_cache::tasks::{IntervalTicker, MaintenanceWorker};

/// Main entry point for the admin server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables and the overrides file
/// 3. Open the durable store and build every namespace
/// 4. Start the maintenance worker
/// 5. Serve the admin router until SIGINT/SIGTERM
/// 6. Stop the worker and flush pending writes
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "market_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Market Cache");

    let mut config = Config::from_env();
    if let Ok(path) = std::env::var("CACHE_CONFIG_FILE") {
        config.apply_overrides_file(&path)?;
        info!(path = %path, "Configuration overrides applied");
    }
    config.validate()?;
    info!(
        port = config.server_port,
        namespaces = config.namespaces.len(),
        tick_ms = config.maintenance_tick_ms,
        batch_size = config.sweep_batch_size,
        schema_version = config.schema_version,
        "Configuration loaded"
    );

    let store: Arc<dyn PersistentStore> = match &config.cache_file {
        Some(path) => Arc::new(
            FileStore::open(path)
                .await
                .with_context(|| format!("opening cache file {}", path.display()))?,
        ),
        None => {
            warn!("CACHE_FILE not set, durable tier is in-process only");
            Arc::new(MemoryStore::new())
        }
    };

    let key = match config.encryption_key()? {
        Some(key) => key,
        None => {
            warn!("CACHE_ENCRYPTION_KEY not set, encrypted namespaces use an ephemeral key");
            generate_key()
        }
    };

    let clock: SharedClock = Arc::new(SystemClock);
    let caches = Arc::new(CacheManager::from_config(
        &config,
        store,
        clock.clone(),
        Some(key),
    )?);
    let limiter = Arc::new(RateLimiter::new(config.limits.clone(), clock.clone()));

    let maintenance = MaintenanceWorker::new(caches.caches(), clock, config.sweep_batch_size);
    maintenance.start(IntervalTicker::new(Duration::from_millis(
        config.maintenance_tick_ms,
    )));

    let state = AppState::new(
        caches.clone(),
        limiter,
        maintenance.clone(),
        config.sweep_batch_size,
    );
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    maintenance.stop().await;
    for cache in caches.caches() {
        cache.flush().await;
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
