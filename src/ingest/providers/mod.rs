// src/ingest/providers/mod.rs
//! Feed format adapters (one per `SourceKind`) and the HTTP feed client.

pub mod atom;
pub mod http;
pub mod rss;

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

/// Text content of an element that may carry attributes (`<guid isPermaLink="false">`,
/// `<title type="html">`).
#[derive(Debug, Default, Deserialize)]
pub(crate) struct TextNode {
    #[serde(rename = "$text", default)]
    pub value: String,
}

/// Feed dates come as RFC 2822 (RSS) or RFC 3339 (Atom); try both.
pub(crate) fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    let odt = OffsetDateTime::parse(ts, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(ts, &Rfc3339))
        .ok()?;
    DateTime::from_timestamp(odt.unix_timestamp(), odt.nanosecond())
}

pub(crate) fn first_non_empty<'a>(candidates: &[Option<&'a str>]) -> &'a str {
    candidates
        .iter()
        .flatten()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

/// Local name of the document's root element, e.g. `rss` or `feed`.
pub(crate) fn document_root(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                return Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

/// Feeds in the wild embed HTML-only entities that are not valid XML.
pub(crate) fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", "&#160;")
        .replace("&ndash;", "&#8211;")
        .replace("&mdash;", "&#8212;")
        .replace("&ldquo;", "&#8220;")
        .replace("&rdquo;", "&#8221;")
        .replace("&lsquo;", "&#8216;")
        .replace("&rsquo;", "&#8217;")
        .replace("&hellip;", "&#8230;")
}
