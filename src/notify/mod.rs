// src/notify/mod.rs
pub mod telegram;

use anyhow::Result;
use serde::Deserialize;

use crate::store::StoredItem;

pub use telegram::TelegramPublisher;

/// Delivery seam: hands one item to the external channel.
#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, item: &StoredItem) -> Result<()>;
}

/// Message markup understood by the channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum ParseMode {
    #[default]
    #[serde(rename = "MarkdownV2", alias = "markdownv2", alias = "markdown")]
    MarkdownV2,
    #[serde(rename = "HTML", alias = "html")]
    Html,
    #[serde(rename = "plain", alias = "Plain", alias = "none")]
    Plain,
}

impl ParseMode {
    /// Value of the Bot API `parse_mode` field; plain text sends none.
    pub fn api_value(&self) -> Option<&'static str> {
        match self {
            Self::MarkdownV2 => Some("MarkdownV2"),
            Self::Html => Some("HTML"),
            Self::Plain => None,
        }
    }
}

const MARKDOWN_V2_RESERVED: [char; 19] = [
    '\\', '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.',
    '!',
];

/// Backslash-escape every MarkdownV2 reserved character.
pub fn escape_markdown_v2(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + s.len() / 4);
    for ch in s.chars() {
        if MARKDOWN_V2_RESERVED.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Title as a link, then the excerpt, then source attribution.
pub fn render_message(item: &StoredItem, mode: ParseMode) -> String {
    let it = &item.item;
    let (head, summary, footer) = match mode {
        ParseMode::MarkdownV2 => (
            format!(
                "[*{}*]({})",
                escape_markdown_v2(&it.title),
                escape_markdown_v2(&it.url)
            ),
            escape_markdown_v2(&it.summary),
            format!("_Source:_ {}", escape_markdown_v2(&it.source)),
        ),
        ParseMode::Html => (
            format!(
                "<a href=\"{}\"><b>{}</b></a>",
                html_escape::encode_double_quoted_attribute(&it.url),
                html_escape::encode_text(&it.title)
            ),
            html_escape::encode_text(&it.summary).into_owned(),
            format!("<i>Source:</i> {}", html_escape::encode_text(&it.source)),
        ),
        ParseMode::Plain => (
            format!("{}\n{}", it.title, it.url),
            it.summary.clone(),
            format!("Source: {}", it.source),
        ),
    };

    if summary.is_empty() {
        format!("{head}\n\n{footer}")
    } else {
        format!("{head}\n\n{summary}\n\n{footer}")
    }
}
