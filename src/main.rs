//! newsfeed-relay — Binary Entrypoint
//! Loads config, opens the store, runs a warm-up ingestion pass and then
//! either serves cron triggers until SIGINT/SIGTERM or, in one-shot mode,
//! performs a single ingest + delivery pass and exits.

use std::sync::Arc;

use anyhow::Context;
use tokio_cron_scheduler::JobScheduler;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use newsfeed_relay::config::{config_path, AppConfig};
use newsfeed_relay::ingest::providers::http::HttpFeedClient;
use newsfeed_relay::metrics::Metrics;
use newsfeed_relay::schedule::{schedule_delivery, schedule_ingest};
use newsfeed_relay::{DeliveryJob, ItemStore, Pipeline, SqliteStore, TelegramPublisher};

const ENV_RUN_ONCE: &str = "RELAY_RUN_ONCE";
const ENV_LOG_FORMAT: &str = "RELAY_LOG_FORMAT";

/// Compact logs by default, JSON lines when RELAY_LOG_FORMAT=json.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("newsfeed_relay=info,ingest=info,delivery=info,warn"));

    let json = std::env::var(ENV_LOG_FORMAT)
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

fn run_once_requested() -> bool {
    std::env::var(ENV_RUN_ONCE)
        .ok()
        .is_some_and(|v| matches!(v.trim(), "1" | "true" | "yes"))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("ctrl-c handler: {e:#}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler: {e:#}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let path = config_path();
    let mut cfg = AppConfig::load_from_file(&path)?;
    cfg.resolve_credentials()?;

    let store: Arc<dyn ItemStore> = Arc::new(
        SqliteStore::open(&cfg.db_path)
            .with_context(|| format!("opening store at {}", cfg.db_path.display()))?,
    );

    if let Some(addr) = cfg.metrics_addr {
        let metrics = Metrics::init()?;
        tokio::spawn(async move {
            if let Err(e) = metrics.serve(addr).await {
                tracing::error!("metrics listener stopped: {e:#}");
            }
        });
    }

    let publisher = Arc::new(TelegramPublisher::from_config(&cfg.telegram)?);
    let client = Arc::new(HttpFeedClient::new()?);

    let pipeline = Arc::new(Pipeline::new(
        cfg.sources.clone(),
        &cfg.filters,
        &cfg.keywords,
        client,
        Arc::clone(&store),
    ));
    let delivery = Arc::new(
        DeliveryJob::new(
            Arc::clone(&store),
            publisher,
            cfg.filters.min_score,
            cfg.scheduler.batch_size,
        )
        .with_shuffle(cfg.scheduler.shuffle_batch),
    );

    // warm run on startup
    pipeline.run_once().await;

    if run_once_requested() {
        delivery.run_once().await;
        tracing::info!("one-shot run finished");
        return Ok(());
    }

    let mut sched = JobScheduler::new().await.context("creating scheduler")?;
    schedule_delivery(&sched, &cfg.scheduler.cron_spec, delivery).await?;
    schedule_ingest(&sched, &cfg.scheduler.ingest_cron_spec, pipeline).await?;
    sched.start().await.context("starting scheduler")?;
    tracing::info!(config = %path.display(), sources = cfg.sources.len(), "relay started");

    shutdown_signal().await;
    tracing::info!("shutting down...");
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}
