//! Data models for feed entries and extracted articles.
//!
//! - [`FeedRecord`]: one entry of a provider's feed, before page extraction
//! - [`ExtractedArticle`]: a record plus the full text of its live page
//!
//! Identity is derived from the canonical article URL, so fetching the same
//! article twice (from the same or another poll) always yields the same id.
//! Both types serialize with camelCase field names, which is also the
//! on-disk format of the durable cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

/// One entry from a provider's feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedRecord {
    /// Hex SHA-256 of the canonical URL. See [`record_id`].
    pub id: String,
    /// Provider name, e.g. `"Ars Technica"`.
    pub source: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub summary_text: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
}

impl FeedRecord {
    /// Build a record, deriving `id` from `url`.
    pub fn new(
        source: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        let url = url.into();
        Self {
            id: record_id(&url),
            source: source.into(),
            title: title.into(),
            authors: Vec::new(),
            tags: Vec::new(),
            summary_text: String::new(),
            url,
            published_at,
        }
    }

    pub fn with_authors(mut self, authors: Vec<String>) -> Self {
        self.authors = authors;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary_text = summary.into();
        self
    }
}

/// A [`FeedRecord`] plus the content extracted from its page.
///
/// `body_text` is never empty: an extraction that yields no text is a failure
/// and the article never reaches the cache or the output queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedArticle {
    #[serde(flatten)]
    pub record: FeedRecord,
    pub body_text: String,
    #[serde(default)]
    pub favicon_url: Option<String>,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractedArticle {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn source(&self) -> &str {
        &self.record.source
    }
}

/// Canonical form of an article URL used for identity.
///
/// Drops the fragment and `utm_*` tracking parameters. Strings that do not
/// parse as URLs are only trimmed.
pub fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_"))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.to_string()
}

/// Stable identity of an article: hex SHA-256 of its canonical URL.
pub fn record_id(url: &str) -> String {
    hex::encode(Sha256::digest(canonical_url(url).as_bytes()))
}
