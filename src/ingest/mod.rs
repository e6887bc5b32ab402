// src/ingest/mod.rs
pub mod providers;
pub mod types;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::canonical::canonicalize;
use crate::ingest::types::{FeedClient, RawEntry, Source, SourceConfig};
use crate::metrics::ensure_metrics_described;
use crate::scoring::{KeywordConfig, Scorer};
use crate::store::ItemStore;

fn default_max_age_days() -> u32 {
    1000
}

/// Selection filters. `min_score` gates delivery, `max_age_days` gates ingestion.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Filters {
    pub max_age_days: u32,
    pub min_score: f64,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
            min_score: 0.0,
        }
    }
}

/// Outcome counters of one ingestion pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub sources: usize,
    pub source_errors: usize,
    pub entries: usize,
    pub stale: usize,
    pub discarded: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub store_errors: usize,
}

/// Ingestion pass over a fixed set of sources. Holds no per-run state, so the
/// same instance can serve the startup warm-up, the recurring trigger and
/// one-shot invocations. At most one pass runs at a time.
pub struct Pipeline {
    sources: Vec<SourceConfig>,
    max_age_days: u32,
    scorer: Scorer,
    client: Arc<dyn FeedClient>,
    store: Arc<dyn ItemStore>,
    running: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        sources: Vec<SourceConfig>,
        filters: &Filters,
        keywords: &KeywordConfig,
        client: Arc<dyn FeedClient>,
        store: Arc<dyn ItemStore>,
    ) -> Self {
        Self {
            sources,
            max_age_days: filters.max_age_days,
            scorer: Scorer::new(keywords),
            client,
            store,
            running: Mutex::new(()),
        }
    }

    /// Run one pass against the wall clock. Never fails: every per-source and
    /// per-item problem lands in the store's error log.
    pub async fn run_once(&self) -> RunReport {
        self.run_at(Utc::now()).await
    }

    /// Same as [`Pipeline::run_once`] with an explicit "now" for the age cutoff.
    /// Returns an empty report without doing anything while another pass is
    /// still in flight.
    pub async fn run_at(&self, now: DateTime<Utc>) -> RunReport {
        let Ok(_running) = self.running.try_lock() else {
            tracing::warn!(target: "ingest", "previous ingest pass still running, skipping");
            counter!("ingest_skipped_total").increment(1);
            return RunReport::default();
        };
        ensure_metrics_described();

        let cutoff = Duration::try_days(i64::from(self.max_age_days))
            .and_then(|age| now.checked_sub_signed(age));
        let mut report = RunReport::default();

        for cfg in &self.sources {
            report.sources += 1;
            let source = match Source::try_from(cfg) {
                Ok(s) => s,
                Err(e) => {
                    self.store.log_error("fetch", &e.to_string());
                    report.source_errors += 1;
                    continue;
                }
            };

            let entries = match self.client.fetch(&source).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = ?e, source = %source.name, "feed fetch failed");
                    self.store.log_error(
                        &format!("fetch:{}", source.kind),
                        &format!("{} : {e:#}", source.name),
                    );
                    report.source_errors += 1;
                    continue;
                }
            };

            tracing::debug!(source = %source.name, entries = entries.len(), "feed fetched");
            for entry in &entries {
                self.ingest_entry(entry, cutoff, &mut report);
            }
        }

        counter!("ingest_runs_total").increment(1);
        counter!("ingest_entries_total").increment(report.entries as u64);
        counter!("ingest_stale_total").increment(report.stale as u64);
        counter!("ingest_discarded_total").increment(report.discarded as u64);
        counter!("ingest_inserted_total").increment(report.inserted as u64);
        counter!("ingest_duplicates_total").increment(report.duplicates as u64);
        counter!("ingest_source_errors_total").increment(report.source_errors as u64);
        counter!("ingest_store_errors_total").increment(report.store_errors as u64);
        gauge!("ingest_pipeline_last_run_ts").set(now.timestamp() as f64);

        tracing::info!(
            target: "ingest",
            sources = report.sources,
            source_errors = report.source_errors,
            inserted = report.inserted,
            duplicates = report.duplicates,
            stale = report.stale,
            "ingest pass finished"
        );
        report
    }

    fn ingest_entry(
        &self,
        entry: &RawEntry,
        cutoff: Option<DateTime<Utc>>,
        report: &mut RunReport,
    ) {
        report.entries += 1;
        if cutoff.is_some_and(|c| entry.published_at < c) {
            report.stale += 1;
            return;
        }
        let Some(item) = canonicalize(entry, &self.scorer) else {
            report.discarded += 1;
            return;
        };
        match self.store.insert_if_absent(&item) {
            Ok(true) => {
                report.inserted += 1;
                tracing::debug!(title = %item.title, score = item.score, "new item");
            }
            Ok(false) => report.duplicates += 1,
            Err(e) => {
                self.store.log_error("db:insert", &e.to_string());
                report.store_errors += 1;
            }
        }
    }
}
