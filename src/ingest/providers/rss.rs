// src/ingest/providers/rss.rs
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;

use super::{first_non_empty, parse_timestamp, scrub_html_entities_for_xml, TextNode};
use crate::ingest::types::{RawEntry, Source};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<TextNode>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    /// `<content:encoded>`; the deserializer matches on the local name.
    #[serde(rename = "encoded")]
    content: Option<String>,
}

/// Parse an RSS 2.0 document into raw entries for `source`.
pub fn parse_entries(source: &Source, xml: &str) -> Result<Vec<RawEntry>> {
    let xml_clean = scrub_html_entities_for_xml(xml);
    let rss: Rss = quick_xml::de::from_str(&xml_clean)
        .with_context(|| format!("parsing rss xml for {}", source.name))?;

    let now = Utc::now();
    let entries = rss
        .channel
        .item
        .into_iter()
        .map(|it| {
            let guid = it.guid.as_ref().map(|g| g.value.as_str());
            RawEntry {
                source: source.name.clone(),
                title: it.title.as_deref().unwrap_or_default().trim().to_string(),
                link: first_non_empty(&[it.link.as_deref(), guid]).to_string(),
                published_at: it
                    .pub_date
                    .as_deref()
                    .and_then(parse_timestamp)
                    .unwrap_or(now),
                body: first_non_empty(&[it.description.as_deref(), it.content.as_deref()])
                    .to_string(),
                tags: source.tags.clone(),
                weight: source.weight,
            }
        })
        .collect();
    Ok(entries)
}
