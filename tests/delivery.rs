// tests/delivery.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use newsfeed_relay::canonical::{content_hash, CanonicalItem};
use newsfeed_relay::store::{ItemStore, SqliteStore, StoreError, StoredItem};
use newsfeed_relay::{DeliveryJob, DeliveryReport, Publisher};

/// Records every published title; refuses titles containing "broken".
#[derive(Default)]
struct RecordingPublisher {
    sent: Mutex<Vec<String>>,
}

impl RecordingPublisher {
    fn titles(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, item: &StoredItem) -> Result<()> {
        if item.item.title.contains("broken") {
            bail!("channel said no");
        }
        self.sent.lock().unwrap().push(item.item.title.clone());
        Ok(())
    }
}

/// Takes a while per message, like a slow channel API.
#[derive(Default)]
struct SlowPublisher {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl Publisher for SlowPublisher {
    async fn publish(&self, item: &StoredItem) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.sent.lock().unwrap().push(item.item.title.clone());
        Ok(())
    }
}

/// SQLite store with switchable failures for the read and mark paths.
struct FlakyStore {
    inner: SqliteStore,
    fail_select: AtomicBool,
    fail_mark: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            fail_select: AtomicBool::new(false),
            fail_mark: AtomicBool::new(false),
        }
    }
}

impl ItemStore for FlakyStore {
    fn insert_if_absent(&self, item: &CanonicalItem) -> Result<bool, StoreError> {
        self.inner.insert_if_absent(item)
    }
    fn select_next_batch(&self, min_score: f64, limit: usize) -> Result<Vec<StoredItem>, StoreError> {
        if self.fail_select.load(Ordering::SeqCst) {
            return Err(StoreError::Poisoned);
        }
        self.inner.select_next_batch(min_score, limit)
    }
    fn mark_delivered(&self, id: i64) -> Result<(), StoreError> {
        if self.fail_mark.load(Ordering::SeqCst) {
            return Err(StoreError::Poisoned);
        }
        self.inner.mark_delivered(id)
    }
    fn log_error(&self, component: &str, message: &str) {
        self.inner.log_error(component, message)
    }
}

fn item(title: &str, score: f64, day: u32) -> CanonicalItem {
    let url = format!("https://news.test/{}", title.replace(' ', "-"));
    CanonicalItem {
        source: "news".into(),
        title: title.into(),
        hash: content_hash(&url, title),
        url,
        summary: format!("About {title}."),
        published_at: Utc.with_ymd_and_hms(2024, 8, day, 12, 0, 0).unwrap(),
        tags: String::new(),
        score,
    }
}

fn seeded(store: &dyn ItemStore, items: &[CanonicalItem]) {
    for it in items {
        assert!(store.insert_if_absent(it).unwrap());
    }
}

#[tokio::test]
async fn drains_queue_in_rank_order_across_passes() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    seeded(
        store.as_ref(),
        &[
            item("old top", 1.0, 1),
            item("new top", 1.0, 9),
            item("middle", 0.15, 5),
            item("low", 0.05, 7),
            item("zero", 0.0, 8),
        ],
    );
    let publisher = Arc::new(RecordingPublisher::default());
    let job = DeliveryJob::new(store.clone(), publisher.clone(), 0.0, 3);

    let first = job.run_once().await;
    assert_eq!(
        first,
        DeliveryReport {
            selected: 3,
            sent: 3,
            failed: 0,
            mark_errors: 0
        }
    );
    assert_eq!(publisher.titles(), vec!["new top", "old top", "middle"]);

    let second = job.run_once().await;
    assert_eq!(second.sent, 2);
    assert_eq!(&publisher.titles()[3..], &["low", "zero"]);

    let third = job.run_once().await;
    assert_eq!(third, DeliveryReport::default());
}

#[tokio::test]
async fn items_below_min_score_are_never_selected() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    seeded(
        store.as_ref(),
        &[item("keep", 1.0, 2), item("skip", 0.1, 3)],
    );
    let publisher = Arc::new(RecordingPublisher::default());
    let job = DeliveryJob::new(store.clone(), publisher.clone(), 0.5, 10);

    let report = job.run_once().await;
    assert_eq!(report.selected, 1);
    assert_eq!(publisher.titles(), vec!["keep"]);

    let skip = store
        .get_by_hash(&content_hash("https://news.test/skip", "skip"))
        .unwrap()
        .unwrap();
    assert!(!skip.delivered);
}

#[tokio::test]
async fn failed_publish_stays_queued_and_others_go_through() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    seeded(
        store.as_ref(),
        &[
            item("first", 1.0, 3),
            item("broken link", 1.0, 2),
            item("third", 1.0, 1),
        ],
    );
    let publisher = Arc::new(RecordingPublisher::default());
    let job = DeliveryJob::new(store.clone(), publisher.clone(), 0.0, 4);

    let report = job.run_once().await;
    assert_eq!(report.sent, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(publisher.titles(), vec!["first", "third"]);

    let errors = store.recent_errors(5).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].component, "delivery:send");
    assert!(errors[0].message.contains("channel said no"));

    // The failed item is picked up again, and only it.
    let retry = job.run_once().await;
    assert_eq!(retry.selected, 1);
    assert_eq!(retry.failed, 1);
}

#[tokio::test]
async fn mark_failure_is_logged_but_counts_as_sent() {
    let store = Arc::new(FlakyStore::new());
    seeded(store.as_ref(), &[item("once", 1.0, 4)]);
    store.fail_mark.store(true, Ordering::SeqCst);

    let publisher = Arc::new(RecordingPublisher::default());
    let job = DeliveryJob::new(store.clone(), publisher.clone(), 0.0, 4);

    let report = job.run_once().await;
    assert_eq!(report.sent, 1);
    assert_eq!(report.mark_errors, 1);

    let errors = store.inner.recent_errors(5).unwrap();
    assert_eq!(errors[0].component, "schedule:mark");

    // Unmarked means still queued: the next pass sends it again.
    store.fail_mark.store(false, Ordering::SeqCst);
    let again = job.run_once().await;
    assert_eq!(again.sent, 1);
    assert_eq!(publisher.titles(), vec!["once", "once"]);
    assert_eq!(job.run_once().await.selected, 0);
}

#[tokio::test]
async fn select_failure_skips_the_pass() {
    let store = Arc::new(FlakyStore::new());
    seeded(store.as_ref(), &[item("waiting", 1.0, 4)]);
    store.fail_select.store(true, Ordering::SeqCst);

    let publisher = Arc::new(RecordingPublisher::default());
    let job = DeliveryJob::new(store.clone(), publisher.clone(), 0.0, 4);

    assert_eq!(job.run_once().await, DeliveryReport::default());
    assert!(publisher.titles().is_empty());
    assert_eq!(store.inner.recent_errors(1).unwrap()[0].component, "schedule:select");
}

#[tokio::test]
async fn shuffled_batches_deliver_the_same_selection() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let items: Vec<_> = (1..=6)
        .map(|d| item(&format!("story {d}"), if d > 2 { 1.0 } else { 0.1 }, d))
        .collect();
    seeded(store.as_ref(), &items);

    let publisher = Arc::new(RecordingPublisher::default());
    let job = DeliveryJob::new(store.clone(), publisher.clone(), 0.0, 4).with_shuffle(true);

    let report = job.run_once().await;
    assert_eq!(report.sent, 4);

    let mut got = publisher.titles();
    got.sort();
    assert_eq!(got, vec!["story 3", "story 4", "story 5", "story 6"]);
}

#[tokio::test]
async fn overlapping_passes_do_not_send_twice() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    seeded(store.as_ref(), &[item("a", 1.0, 2), item("b", 1.0, 1)]);

    let publisher = Arc::new(SlowPublisher::default());
    let job = DeliveryJob::new(store.clone(), publisher.clone(), 0.0, 4);

    let (first, second) = tokio::join!(job.run_once(), job.run_once());
    assert_eq!(first.sent + second.sent, 2);
    assert!(
        first == DeliveryReport::default() || second == DeliveryReport::default(),
        "one of the passes is skipped"
    );
    assert_eq!(*publisher.sent.lock().unwrap(), vec!["a", "b"]);

    // The guard is released once the pass ends.
    seeded(store.as_ref(), &[item("c", 1.0, 3)]);
    assert_eq!(job.run_once().await.sent, 1);
}
