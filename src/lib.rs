//! sitepulse -- fixed-interval HTTP(S) uptime prober.
//!
//! This crate provides the probe-and-persist loop (site list, prober,
//! scheduler), the SQLite outcome log, and the read-side query facade the
//! JSON API is built on.

pub mod api;
pub mod config;
pub mod probes;
pub mod query;
pub mod scheduler;
pub mod sites;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::config::{LogFormat, LoggingConfig, MonitorConfig};

fn env_filter(default_level: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level))
}

/// Run `f` under a temporary stderr subscriber (`RUST_LOG`, else `info`).
///
/// Used while the configuration that decides the real subscriber is still
/// being loaded, so its warnings are not lost.
pub fn with_startup_logging<T>(f: impl FnOnce() -> T) -> T {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter("info"))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::with_default(subscriber, f)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(logging: &LoggingConfig) {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter(&logging.level));
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };
}

/// Start the sitepulse daemon: scheduler loop plus the JSON API.
///
/// Returns when `shutdown` is cancelled; failing to open the store is fatal.
pub async fn serve(config: MonitorConfig, shutdown: CancellationToken) -> Result<()> {
    // 1. Initialize Storage
    let db_path = config.storage.db_path.display().to_string();
    tracing::info!(%db_path, "Initializing database");
    let store = Arc::new(
        storage::Store::open(&config.storage.db_path)
            .with_context(|| format!("cannot initialize store at {}", db_path))?,
    );

    // 2. Initialize Scheduler
    let prober = probes::HttpProber::new(config.probe.timeout(), &config.probe.user_agent)?;
    let source = sites::FileSiteSource::new(&config.sites.path);
    let site_list = sites::SiteList::new();
    let scheduler = scheduler::Scheduler::new(
        Arc::new(source),
        Arc::new(prober),
        store.clone(),
        site_list.clone(),
    )
    .with_interval(config.scheduler.interval());
    let scheduler_state = scheduler.subscribe_state();

    // 3. Bind the API before anything runs in the background
    let addr: std::net::SocketAddr = config
        .api
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.api.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {}", addr))?;

    // 4. Start Scheduler Engine (background task)
    let engine = tokio::spawn(scheduler::run_scheduler_loop(scheduler, shutdown.clone()));

    // 5. Start API Server
    let query = query::QueryFacade::new(store, site_list);
    let state = api::state::AppState::new(query, config.api.history_points)
        .with_scheduler(scheduler_state);
    let app = api::router(state);
    tracing::info!(%addr, sites = %config.sites.path.display(), "sitepulse listening");

    let api_shutdown = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { api_shutdown.cancelled().await })
        .await;

    // The API may stop on its own (listener error); take the scheduler down too.
    shutdown.cancel();
    engine.await.context("scheduler task panicked")?;
    served?;
    Ok(())
}
