// src/ingest/providers/http.rs
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::histogram;

use crate::ingest::types::{FeedClient, RawEntry, Source};

const USER_AGENT: &str = concat!("newsfeed-relay/", env!("CARGO_PKG_VERSION"));

/// Fetches a source over HTTP and hands the document to the source kind's parser.
#[derive(Clone)]
pub struct HttpFeedClient {
    client: reqwest::Client,
}

impl HttpFeedClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(15))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("building feed http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedClient for HttpFeedClient {
    async fn fetch(&self, source: &Source) -> Result<Vec<RawEntry>> {
        let body = self
            .client
            .get(&source.url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .with_context(|| format!("{} http get", source.kind))?
            .text()
            .await
            .with_context(|| format!("{} http .text()", source.kind))?;

        let t0 = Instant::now();
        let entries = source.kind.parse_document(source, &body)?;
        histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(entries)
    }
}
