// src/ingest/types.rs
use std::collections::BTreeSet;
use std::fmt;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::ingest::providers;

/// One feed entry as handed over by a feed client. Lives for a single pipeline pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntry {
    pub source: String,
    pub title: String,
    pub link: String,
    /// Published or updated time; feed clients substitute "now" when the feed has none.
    pub published_at: DateTime<Utc>,
    /// HTML or plain text, uncleaned.
    pub body: String,
    pub tags: BTreeSet<String>,
    pub weight: f64,
}

/// Supported feed formats. Each variant owns its parser adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Rss,
    Atom,
}

impl SourceKind {
    /// Case-insensitive lookup of a configured `type` string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rss" => Some(Self::Rss),
            "atom" => Some(Self::Atom),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rss => "rss",
            Self::Atom => "atom",
        }
    }

    /// Turn a fetched document into raw entries using this kind's adapter.
    pub fn parse_document(&self, source: &Source, document: &str) -> Result<Vec<RawEntry>> {
        match self {
            // `rss` sources may serve Atom; the root element decides.
            Self::Rss => match providers::document_root(document).as_deref() {
                Some("feed") => providers::atom::parse_entries(source, document),
                _ => providers::rss::parse_entries(source, document),
            },
            Self::Atom => providers::atom::parse_entries(source, document),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_kind() -> String {
    "rss".to_string()
}

fn default_weight() -> f64 {
    1.0
}

/// Source record as written in the config file. `kind` stays free text until
/// the pipeline resolves it, so an unknown type is reported per run instead of
/// failing the whole config load.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SourceConfig {
    pub name: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A configured source with a resolved kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub name: String,
    pub kind: SourceKind,
    pub url: String,
    pub weight: f64,
    pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported source type: {0}")]
pub struct UnsupportedSource(pub String);

impl TryFrom<&SourceConfig> for Source {
    type Error = UnsupportedSource;

    fn try_from(cfg: &SourceConfig) -> Result<Self, Self::Error> {
        let kind = SourceKind::parse(&cfg.kind).ok_or_else(|| UnsupportedSource(cfg.kind.clone()))?;
        let weight = if cfg.weight.is_finite() {
            cfg.weight.clamp(0.0, 1.0)
        } else {
            default_weight()
        };
        let tags = cfg
            .tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self {
            name: cfg.name.trim().to_string(),
            kind,
            url: cfg.url.trim().to_string(),
            weight,
            tags,
        })
    }
}

/// Retrieval seam: turns a source into raw entries.
#[async_trait::async_trait]
pub trait FeedClient: Send + Sync {
    async fn fetch(&self, source: &Source) -> Result<Vec<RawEntry>>;
}
