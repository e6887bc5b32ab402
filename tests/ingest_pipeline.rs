// tests/ingest_pipeline.rs
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use newsfeed_relay::canonical::{content_hash, CanonicalItem};
use newsfeed_relay::ingest::types::{FeedClient, RawEntry, Source, SourceConfig};
use newsfeed_relay::store::{ItemStore, SqliteStore, StoreError, StoredItem};
use newsfeed_relay::{Filters, KeywordConfig, Pipeline};

const RSS_URL: &str = "https://weekly.test/feed.xml";
const ATOM_URL: &str = "https://notes.test/atom.xml";

/// Serves the fixture documents by URL and fails for anything else.
#[derive(Default)]
struct FixtureClient {
    calls: AtomicUsize,
}

#[async_trait]
impl FeedClient for FixtureClient {
    async fn fetch(&self, source: &Source) -> Result<Vec<RawEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let doc = match source.url.as_str() {
            RSS_URL => include_str!("fixtures/sample_rss.xml"),
            ATOM_URL => include_str!("fixtures/sample_atom.xml"),
            other => bail!("connection refused: {other}"),
        };
        source.kind.parse_document(source, doc)
    }
}

/// Same documents as `FixtureClient`, served slowly.
#[derive(Default)]
struct SlowClient(FixtureClient);

#[async_trait]
impl FeedClient for SlowClient {
    async fn fetch(&self, source: &Source) -> Result<Vec<RawEntry>> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.0.fetch(source).await
    }
}

/// Delegates to SQLite but refuses every insert.
struct ReadOnlyStore(SqliteStore);

impl ItemStore for ReadOnlyStore {
    fn insert_if_absent(&self, _item: &CanonicalItem) -> Result<bool, StoreError> {
        Err(StoreError::Poisoned)
    }
    fn select_next_batch(&self, min_score: f64, limit: usize) -> Result<Vec<StoredItem>, StoreError> {
        self.0.select_next_batch(min_score, limit)
    }
    fn mark_delivered(&self, id: i64) -> Result<(), StoreError> {
        self.0.mark_delivered(id)
    }
    fn log_error(&self, component: &str, message: &str) {
        self.0.log_error(component, message)
    }
}

fn source(name: &str, kind: &str, url: &str, weight: f64) -> SourceConfig {
    SourceConfig {
        name: name.to_string(),
        kind: kind.to_string(),
        url: url.to_string(),
        weight,
        tags: vec!["platform".to_string(), "cloud".to_string()],
    }
}

fn keywords() -> KeywordConfig {
    KeywordConfig {
        positive: vec!["Kubernetes".to_string(), "terraform".to_string()],
        negative: vec!["sponsor".to_string()],
    }
}

fn fixture_sources() -> Vec<SourceConfig> {
    vec![
        source("weekly", "rss", RSS_URL, 0.5),
        source("notes", "atom", ATOM_URL, 0.5),
    ]
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 8, 20, 0, 0, 0).unwrap()
}

fn pipeline(
    sources: Vec<SourceConfig>,
    filters: Filters,
    client: Arc<FixtureClient>,
    store: Arc<dyn ItemStore>,
) -> Pipeline {
    Pipeline::new(sources, &filters, &keywords(), client, store)
}

#[tokio::test]
async fn fixtures_are_ingested_once() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let client = Arc::new(FixtureClient::default());
    let p = pipeline(fixture_sources(), Filters::default(), client, store.clone());

    let first = p.run_at(now()).await;
    assert_eq!(first.sources, 2);
    assert_eq!(first.source_errors, 0);
    assert_eq!(first.entries, 6);
    assert_eq!(first.discarded, 1, "the untitled rss item is dropped");
    assert_eq!(first.inserted, 5);
    assert_eq!(store.count_items().unwrap(), 5);

    let second = p.run_at(now()).await;
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, 5);
    assert_eq!(store.count_items().unwrap(), 5);
}

#[tokio::test]
async fn stored_items_are_canonical_and_scored() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let p = pipeline(
        fixture_sources(),
        Filters::default(),
        Arc::new(FixtureClient::default()),
        store.clone(),
    );
    p.run_at(now()).await;

    let url = "https://weekly.test/posts/k8s-131?id=7";
    let k8s = store
        .get_by_hash(&content_hash(url, "Kubernetes 1.31 released"))
        .unwrap()
        .expect("kubernetes item stored");
    assert_eq!(k8s.item.url, url);
    assert_eq!(
        k8s.item.summary,
        "The new release is out. It ships sidecar containers by default! Upgrade notes follow."
    );
    assert_eq!(k8s.item.score, 1.0);
    assert_eq!(k8s.item.tags, "cloud,platform");
    assert_eq!(
        k8s.item.published_at,
        Utc.with_ymd_and_hms(2024, 8, 13, 10, 0, 0).unwrap()
    );
    assert!(!k8s.delivered);

    let sponsor = store
        .get_by_hash(&content_hash(
            "https://weekly.test/posts/sponsor",
            "Weekly sponsor message",
        ))
        .unwrap()
        .expect("guid is used as the link");
    assert_eq!(sponsor.item.score, 0.0);

    let notes = store
        .get_by_hash(&content_hash(
            "https://weekly.test/posts/tf-19",
            "Terraform 1.9 notes",
        ))
        .unwrap()
        .expect("item with only content:encoded stored");
    assert_eq!(
        notes.item.summary,
        "Input validation got smarter. Upgrade today."
    );
    assert_eq!(notes.item.score, 1.0);

    let tf_url = "https://notes.test/terraform-state";
    let tf = store
        .get_by_hash(&content_hash(tf_url, "Terraform state in practice"))
        .unwrap()
        .expect("alternate link wins over self link");
    assert_eq!(tf.item.summary, "Remote state keeps teams in sync.");
    assert_eq!(
        tf.item.published_at,
        Utc.with_ymd_and_hms(2024, 8, 14, 8, 0, 0).unwrap(),
        "updated overrides published"
    );

    let obs = store
        .get_by_hash(&content_hash(
            "https://notes.test/observability",
            "Observability without the buzzwords",
        ))
        .unwrap()
        .expect("id is used as the link");
    assert!((obs.item.score - 0.1).abs() < 1e-9, "no keyword hit keeps the base score");
}

#[tokio::test]
async fn entries_older_than_max_age_are_skipped() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let filters = Filters {
        max_age_days: 7,
        min_score: 0.0,
    };
    let p = pipeline(
        fixture_sources(),
        filters,
        Arc::new(FixtureClient::default()),
        store.clone(),
    );

    let report = p.run_at(now()).await;
    assert_eq!(report.stale, 2);
    assert_eq!(report.inserted, 3);
    assert_eq!(store.count_items().unwrap(), 3);
}

#[tokio::test]
async fn failing_source_does_not_stop_the_run() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let mut sources = vec![source("down", "rss", "https://down.test/feed", 1.0)];
    sources.extend(fixture_sources());
    let p = pipeline(
        sources,
        Filters::default(),
        Arc::new(FixtureClient::default()),
        store.clone(),
    );

    let report = p.run_at(now()).await;
    assert_eq!(report.source_errors, 1);
    assert_eq!(report.inserted, 5);

    let errors = store.recent_errors(10).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].component, "fetch:rss");
    assert!(errors[0].message.starts_with("down : "), "{}", errors[0].message);
}

#[tokio::test]
async fn unsupported_source_type_is_logged_and_skipped() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let client = Arc::new(FixtureClient::default());
    let sources = vec![
        source("api", "json", "https://api.test/items", 1.0),
        source("weekly", "RSS", RSS_URL, 0.5),
    ];
    let p = pipeline(sources, Filters::default(), client.clone(), store.clone());

    let report = p.run_at(now()).await;
    assert_eq!(report.source_errors, 1);
    assert_eq!(report.inserted, 3);
    assert_eq!(client.calls.load(Ordering::SeqCst), 1, "unsupported source is never fetched");

    let errors = store.recent_errors(10).unwrap();
    assert_eq!(errors[0].component, "fetch");
    assert_eq!(errors[0].message, "unsupported source type: json");
}

#[tokio::test]
async fn insert_failures_are_logged_per_item() {
    let inner = SqliteStore::open_in_memory().unwrap();
    let store = Arc::new(ReadOnlyStore(inner));
    let p = pipeline(
        vec![source("weekly", "rss", RSS_URL, 0.5)],
        Filters::default(),
        Arc::new(FixtureClient::default()),
        store.clone(),
    );

    let report = p.run_at(now()).await;
    assert_eq!(report.inserted, 0);
    assert_eq!(report.store_errors, 3);

    let errors = store.0.recent_errors(10).unwrap();
    assert_eq!(errors.len(), 3);
    assert!(errors.iter().all(|e| e.component == "db:insert"));
}

#[tokio::test]
async fn empty_source_list_is_a_quiet_pass() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let p = pipeline(
        Vec::new(),
        Filters::default(),
        Arc::new(FixtureClient::default()),
        store.clone(),
    );
    let report = p.run_once().await;
    assert_eq!(report, Default::default());
    assert!(store.recent_errors(1).unwrap().is_empty());
}

#[tokio::test]
async fn rss_source_serving_atom_is_ingested() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let p = pipeline(
        vec![source("notes", "rss", ATOM_URL, 0.5)],
        Filters::default(),
        Arc::new(FixtureClient::default()),
        store.clone(),
    );

    let report = p.run_at(now()).await;
    assert_eq!(report.source_errors, 0);
    assert_eq!(report.inserted, 2);
    assert!(store.recent_errors(1).unwrap().is_empty());
}

#[tokio::test]
async fn overlapping_ingest_passes_are_skipped() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let client = Arc::new(SlowClient::default());
    let p = Pipeline::new(
        fixture_sources(),
        &Filters::default(),
        &keywords(),
        client.clone(),
        store.clone(),
    );

    let (first, second) = tokio::join!(p.run_at(now()), p.run_at(now()));
    assert_eq!(first.inserted + second.inserted, 5);
    assert_eq!(first.duplicates + second.duplicates, 0);
    assert_eq!(client.0.calls.load(Ordering::SeqCst), 2, "each source fetched once");

    let again = p.run_at(now()).await;
    assert_eq!(again.duplicates, 5);
}
