// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod canonical;
pub mod config;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod schedule;
pub mod scoring;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::canonical::{canonicalize, CanonicalItem};
pub use crate::config::AppConfig;
pub use crate::ingest::{Filters, Pipeline, RunReport};
pub use crate::notify::{ParseMode, Publisher, TelegramPublisher};
pub use crate::schedule::{DeliveryJob, DeliveryReport};
pub use crate::scoring::{KeywordConfig, Scorer};
pub use crate::store::{ItemStore, SqliteStore, StoreError, StoredItem};
