use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_runs_total", "Completed ingestion passes.");
        describe_counter!("ingest_entries_total", "Raw entries returned by feed clients.");
        describe_counter!(
            "ingest_stale_total",
            "Entries dropped for being older than max_age_days."
        );
        describe_counter!(
            "ingest_discarded_total",
            "Entries dropped for an empty title or link."
        );
        describe_counter!("ingest_inserted_total", "New items persisted.");
        describe_counter!(
            "ingest_duplicates_total",
            "Entries whose content hash was already stored."
        );
        describe_counter!(
            "ingest_source_errors_total",
            "Sources skipped because of fetch/parse errors or unsupported type."
        );
        describe_counter!("ingest_store_errors_total", "Failed item inserts.");
        describe_histogram!("ingest_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!(
            "ingest_pipeline_last_run_ts",
            "Unix ts when the ingest pipeline last ran."
        );
        describe_counter!(
            "ingest_skipped_total",
            "Ingest triggers skipped because a pass was still running."
        );
        describe_counter!("delivery_runs_total", "Completed delivery passes.");
        describe_counter!(
            "delivery_skipped_total",
            "Delivery triggers skipped because a pass was still running."
        );
        describe_counter!("delivery_sent_total", "Items published to the channel.");
        describe_counter!("delivery_failed_total", "Failed publish attempts.");
        describe_gauge!("delivery_last_run_ts", "Unix ts when delivery last ran.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder. Call at most once per process.
    pub fn init() -> Result<Self> {
        // Use default buckets to avoid API differences across crate versions.
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }

    /// Serve `/metrics` on `addr` until the task is dropped.
    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding metrics listener on {addr}"))?;
        tracing::info!(%addr, "metrics listener up");
        axum::serve(listener, self.router())
            .await
            .context("metrics listener")
    }
}
