//! Delivery pass and cron wiring.
//!
//! A delivery pass selects the best undelivered items, publishes them one by
//! one and flags the ones that went through. Failures stay in the queue and
//! are naturally picked up again by the next pass.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use metrics::{counter, gauge};
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::ingest::Pipeline;
use crate::metrics::ensure_metrics_described;
use crate::notify::Publisher;
use crate::store::ItemStore;

/// Outcome counters of one delivery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub selected: usize,
    pub sent: usize,
    pub failed: usize,
    pub mark_errors: usize,
}

/// Drains the delivery queue. Overlapping passes would select the same
/// batch, so a pass started while another is in flight is skipped.
pub struct DeliveryJob {
    store: Arc<dyn ItemStore>,
    publisher: Arc<dyn Publisher>,
    min_score: f64,
    batch_size: usize,
    shuffle: bool,
    running: Mutex<()>,
}

impl DeliveryJob {
    pub fn new(
        store: Arc<dyn ItemStore>,
        publisher: Arc<dyn Publisher>,
        min_score: f64,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            publisher,
            min_score,
            batch_size,
            shuffle: false,
            running: Mutex::new(()),
        }
    }

    /// Randomize the order inside each selected batch.
    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub async fn run_once(&self) -> DeliveryReport {
        let Ok(_running) = self.running.try_lock() else {
            tracing::warn!(target: "delivery", "previous delivery pass still running, skipping");
            counter!("delivery_skipped_total").increment(1);
            return DeliveryReport::default();
        };
        ensure_metrics_described();
        let mut report = DeliveryReport::default();

        let mut batch = match self.store.select_next_batch(self.min_score, self.batch_size) {
            Ok(b) => b,
            Err(e) => {
                self.store.log_error("schedule:select", &e.to_string());
                return report;
            }
        };
        if self.shuffle {
            batch.shuffle(&mut rand::rng());
        }
        report.selected = batch.len();

        for item in &batch {
            tracing::info!(id = item.id, title = %item.item.title, url = %item.item.url, "publishing item");
            if let Err(e) = self.publisher.publish(item).await {
                self.store
                    .log_error("delivery:send", &format!("{} : {e:#}", item.item.url));
                report.failed += 1;
                continue;
            }
            report.sent += 1;
            // Sent is sent: a failed mark only risks a repeat after restart.
            if let Err(e) = self.store.mark_delivered(item.id) {
                tracing::error!(id = item.id, error = %e, "mark delivered failed");
                self.store
                    .log_error("schedule:mark", &format!("item {} : {e}", item.id));
                report.mark_errors += 1;
            }
        }

        counter!("delivery_runs_total").increment(1);
        counter!("delivery_sent_total").increment(report.sent as u64);
        counter!("delivery_failed_total").increment(report.failed as u64);
        gauge!("delivery_last_run_ts").set(Utc::now().timestamp() as f64);

        tracing::info!(
            target: "delivery",
            selected = report.selected,
            sent = report.sent,
            failed = report.failed,
            "delivery pass finished"
        );
        report
    }
}

/// Cron expressions in the config have five fields; the scheduler wants a
/// leading seconds field.
pub fn with_seconds(spec: &str) -> String {
    let spec = spec.trim();
    if spec.split_whitespace().count() == 5 {
        format!("0 {spec}")
    } else {
        spec.to_string()
    }
}

/// Register the delivery pass on `sched` under `cron_spec`.
pub async fn schedule_delivery(
    sched: &JobScheduler,
    cron_spec: &str,
    job: Arc<DeliveryJob>,
) -> Result<()> {
    let spec = with_seconds(cron_spec);
    tracing::info!(cron = %spec, "scheduling delivery");
    let cron_job = Job::new_async(spec.as_str(), move |_uuid, _lock| {
        let job = Arc::clone(&job);
        Box::pin(async move {
            job.run_once().await;
        })
    })
    .with_context(|| format!("creating delivery job for cron {spec}"))?;
    sched.add(cron_job).await.context("adding delivery job")?;
    Ok(())
}

/// Register the ingestion pass on `sched` under `cron_spec`.
pub async fn schedule_ingest(
    sched: &JobScheduler,
    cron_spec: &str,
    pipeline: Arc<Pipeline>,
) -> Result<()> {
    let spec = with_seconds(cron_spec);
    tracing::info!(cron = %spec, "scheduling ingestion");
    let cron_job = Job::new_async(spec.as_str(), move |_uuid, _lock| {
        let pipeline = Arc::clone(&pipeline);
        Box::pin(async move {
            pipeline.run_once().await;
        })
    })
    .with_context(|| format!("creating ingest job for cron {spec}"))?;
    sched.add(cron_job).await.context("adding ingest job")?;
    Ok(())
}
