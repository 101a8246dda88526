//! Text and timestamp normalization for feed records.
//!
//! Feed titles and summaries arrive as HTML fragments, sometimes escaped
//! twice. [`Normalizer::normalize`] turns them into plain, speakable text:
//!
//! 1. Strip markup and decode entities until the text stops changing
//! 2. Collapse all whitespace (including non-breaking spaces) to single spaces
//! 3. Insert a space after a period that runs straight into the next sentence
//! 4. Cap the summary at a fixed word budget
//!
//! Every step is idempotent, so normalizing a normalized record is a no-op.

use crate::error::MalformedTimestamp;
use crate::models::FeedRecord;
use chrono::{DateTime, NaiveDateTime, Utc};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;

/// Default cap on summary length, in words.
pub const DEFAULT_WORD_BUDGET: usize = 500;

static RE_DROP_BLOCKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>").unwrap());
static RE_COMMENTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static RE_BLOCK_TAGS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)<\s*/?\s*(p|br|div|li|ul|ol|h[1-6]|blockquote|tr|td|figure|figcaption|section|article|hr)\b[^>]*>",
    )
    .unwrap()
});
static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)</?[a-zA-Z][^>]*>").unwrap());
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Pure record normalizer.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    word_budget: usize,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_WORD_BUDGET)
    }
}

impl Normalizer {
    pub fn new(word_budget: usize) -> Self {
        Self { word_budget }
    }

    /// Produce the normalized form of `record`.
    ///
    /// Never fails: missing authors or tags stay empty, and the timestamp is
    /// already a UTC instant by the time a record exists.
    pub fn normalize(&self, record: &FeedRecord) -> FeedRecord {
        let summary = cap_words(&clean_text(&record.summary_text), self.word_budget);
        FeedRecord {
            id: record.id.clone(),
            source: record.source.trim().to_string(),
            title: clean_text(&record.title),
            authors: clean_list(&record.authors),
            tags: clean_list(&record.tags),
            summary_text: summary,
            url: record.url.trim().to_string(),
            published_at: record.published_at,
        }
    }
}

/// Normalize with the default word budget.
pub fn normalize(record: &FeedRecord) -> FeedRecord {
    Normalizer::default().normalize(record)
}

/// Markup-free, whitespace-collapsed, sentence-spaced text.
pub fn clean_text(s: &str) -> String {
    space_after_periods(&collapse_whitespace(&strip_markup(s)))
}

/// Remove tags and decode entities until the text stops changing.
///
/// Every pass that changes something makes the text shorter, so nested
/// escaping of any depth is unwound.
pub fn strip_markup(s: &str) -> String {
    let mut current = s.to_string();
    loop {
        let next = strip_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn strip_once(s: &str) -> String {
    let out = RE_DROP_BLOCKS.replace_all(s, " ");
    let out = RE_COMMENTS.replace_all(&out, "");
    let out = RE_BLOCK_TAGS.replace_all(&out, " ");
    let out = RE_TAGS.replace_all(&out, "");
    html_escape::decode_html_entities(&out).into_owned()
}

pub fn collapse_whitespace(s: &str) -> String {
    RE_WS.replace_all(s, " ").trim().to_string()
}

/// Insert a space where a period runs directly into a capitalized word
/// (`"ended.Next"` becomes `"ended. Next"`). Decimals and domains are left alone.
pub fn space_after_periods(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if c == '.' {
            if let Some(next) = chars.peek() {
                if next.is_uppercase() {
                    out.push(' ');
                }
            }
        }
    }
    out
}

/// Keep at most `budget` whitespace-separated words.
pub fn cap_words(s: &str, budget: usize) -> String {
    s.split_whitespace().take(budget).join(" ")
}

fn clean_list(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|s| collapse_whitespace(&strip_markup(s)))
        .filter(|s| !s.is_empty())
        .unique()
        .collect()
}

/// Parse a feed timestamp into a UTC instant.
///
/// Accepts RFC 2822 (RSS `pubDate`), RFC 3339 (Atom `published`), offsets
/// without a colon, and naive ISO-8601 which is taken to be UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, MalformedTimestamp> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(MalformedTimestamp {
        raw: raw.to_string(),
    })
}
