//! Canonicalization of raw feed entries.
//!
//! - URL cleanup: fragment and tracking parameters removed, remaining query
//!   parameters kept in their original order.
//! - Excerpt: markup stripped, first few sentences kept, hard character budget.
//! - Content hash: SHA-256 over `canonical_url|title`, the dedup key of the store.

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use sha2::{Digest, Sha256};
use url::Url;

use crate::ingest::types::RawEntry;
use crate::scoring::Scorer;

/// Sentences kept in an excerpt.
pub const MAX_SENTENCES: usize = 3;
/// Character budget of an excerpt, continuation marker included.
pub const MAX_EXCERPT_CHARS: usize = 650;
pub const CONTINUATION_MARKER: char = '…';

const TRACKING_PARAMS: [&str; 6] = [
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "utm_id",
];

/// A normalized, scored entry ready for the store.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalItem {
    pub source: String,
    pub title: String,
    pub url: String,
    pub summary: String,
    pub published_at: DateTime<Utc>,
    /// Sorted, comma-joined tag set.
    pub tags: String,
    pub hash: String,
    pub score: f64,
}

/// Best-effort URL canonicalization. Unparseable input is returned unchanged.
pub fn canonical_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw.trim()) else {
        return raw.to_string();
    };
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept.iter());
    }
    url.to_string()
}

/// Deterministic dedup key: hex SHA-256 of `url|title`.
pub fn content_hash(url: &str, title: &str) -> String {
    use std::fmt::Write as _;

    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b"|");
    hasher.update(title.as_bytes());
    let digest = hasher.finalize();

    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

fn script_style_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>")
            .expect("script/style regex")
    })
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"))
}

/// Strip markup from an HTML or plain-text body and return its character data.
pub fn clean_text(raw: &str) -> String {
    let flat = raw.replace(['\r', '\n'], " ");
    let without_blocks = script_style_re().replace_all(&flat, "");

    // Anything between '<' and '>' is markup; an unterminated tag swallows the rest.
    let mut text = String::with_capacity(without_blocks.len());
    let mut in_tag = false;
    for ch in without_blocks.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }

    let decoded = html_escape::decode_html_entities(&text);
    whitespace_re().replace_all(&decoded, " ").trim().to_string()
}

/// Split at `.`, `!` and `?`, keeping the terminator on the preceding sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for (i, ch) in text.char_indices() {
        if matches!(ch, '.' | '!' | '?') {
            let end = i + ch.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            start = end;
        }
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

/// Cut `text` to `budget` characters (marker included) so that the last kept
/// character is a letter, then append the continuation marker.
pub fn truncate_excerpt(text: String, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text;
    }
    let mut out: String = text.chars().take(budget.saturating_sub(1)).collect();
    while let Some(last) = out.chars().last() {
        if last.is_alphabetic() {
            break;
        }
        out.pop();
    }
    out.push(CONTINUATION_MARKER);
    out
}

/// Clean a raw body into an excerpt of at most `max_sentences` sentences.
pub fn summarize(raw: &str, max_sentences: usize) -> String {
    let text = clean_text(raw);
    if text.is_empty() {
        return String::new();
    }
    let joined = split_sentences(&text)
        .into_iter()
        .take(max_sentences)
        .collect::<Vec<_>>()
        .join(" ");
    truncate_excerpt(joined, MAX_EXCERPT_CHARS)
}

/// Canonicalize and score one raw entry. `None` means the entry has no usable
/// title or link and is dropped without being treated as an error.
pub fn canonicalize(entry: &RawEntry, scorer: &Scorer) -> Option<CanonicalItem> {
    let url = canonical_url(&entry.link);
    let url = url.trim();
    let title = entry.title.trim();
    if title.is_empty() || url.is_empty() {
        return None;
    }

    let summary = summarize(&entry.body, MAX_SENTENCES);
    let score = scorer.score(&format!("{title} {summary}"), entry.weight);
    let tags = entry
        .tags
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(",");

    Some(CanonicalItem {
        source: entry.source.clone(),
        title: title.to_string(),
        url: url.to_string(),
        summary,
        published_at: entry.published_at,
        tags,
        hash: content_hash(url, title),
        score,
    })
}
