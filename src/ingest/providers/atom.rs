// src/ingest/providers/atom.rs
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;

use super::{first_non_empty, parse_timestamp, scrub_html_entities_for_xml, TextNode};
use crate::ingest::types::{RawEntry, Source};

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    title: Option<TextNode>,
    #[serde(rename = "link", default)]
    links: Vec<Link>,
    id: Option<String>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<TextNode>,
    content: Option<TextNode>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@href", default)]
    href: String,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

impl Entry {
    /// `rel="alternate"` (or no rel) wins; otherwise the first link.
    fn best_link(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .or_else(|| self.links.first())
            .map(|l| l.href.as_str())
    }
}

/// Parse an Atom 1.0 document into raw entries for `source`.
pub fn parse_entries(source: &Source, xml: &str) -> Result<Vec<RawEntry>> {
    let xml_clean = scrub_html_entities_for_xml(xml);
    let feed: Feed = quick_xml::de::from_str(&xml_clean)
        .with_context(|| format!("parsing atom xml for {}", source.name))?;

    let now = Utc::now();
    let entries = feed
        .entry
        .into_iter()
        .map(|e| {
            // An update time takes precedence over the original publication time.
            let published_at = e
                .updated
                .as_deref()
                .and_then(parse_timestamp)
                .or_else(|| e.published.as_deref().and_then(parse_timestamp))
                .unwrap_or(now);
            let summary = e.summary.as_ref().map(|t| t.value.as_str());
            let content = e.content.as_ref().map(|t| t.value.as_str());
            RawEntry {
                source: source.name.clone(),
                title: e
                    .title
                    .as_ref()
                    .map(|t| t.value.trim().to_string())
                    .unwrap_or_default(),
                link: first_non_empty(&[e.best_link(), e.id.as_deref()]).to_string(),
                published_at,
                body: first_non_empty(&[summary, content]).to_string(),
                tags: source.tags.clone(),
                weight: source.weight,
            }
        })
        .collect();
    Ok(entries)
}
