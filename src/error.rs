//! Error taxonomy for the ingestion pipeline.
//!
//! Every error here is recovered locally by the component that sees it:
//!
//! | Error | Raised by | Recovery |
//! |-------|-----------|----------|
//! | [`FetchError`] | source adapters | poll cycle skipped, adapter sleeps |
//! | [`EntryError`] / [`MalformedTimestamp`] | feed parsing | single entry dropped |
//! | [`LoadError`] | page loaders | attempt retried with backoff |
//! | [`ExtractionError`] | extractor | article dropped |
//! | [`PersistError`] | cache | duplicates ignored, others logged |
//!
//! None of them terminates an adapter task or a worker.

use std::time::Duration;
use thiserror::Error;

/// A feed could not be fetched or was not a feed at all.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error fetching {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with HTTP {status}")]
    Status { status: u16, url: String },
    #[error("malformed feed payload: {0}")]
    Malformed(String),
}

/// A feed timestamp that none of the supported formats accept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unparseable timestamp {raw:?}")]
pub struct MalformedTimestamp {
    pub raw: String,
}

/// One feed entry could not be turned into a record.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error("entry is missing `{0}`")]
    MissingField(&'static str),
    #[error(transparent)]
    Timestamp(#[from] MalformedTimestamp),
    #[error("entry xml: {0}")]
    Xml(String),
}

/// A single page-load attempt failed.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("page load exceeded {0:?}")]
    Timeout(Duration),
    #[error("browser unavailable: {0}")]
    Browser(String),
    #[error("selector `{0}` matched no text")]
    EmptyBody(String),
    #[error("invalid content selector `{0}`")]
    InvalidSelector(String),
}

/// Page extraction gave up after the whole retry budget.
#[derive(Debug, Error)]
#[error("extraction of {url} failed after {attempts} attempt(s): {last}")]
pub struct ExtractionError {
    pub url: String,
    pub attempts: usize,
    #[source]
    pub last: LoadError,
}

/// Durable cache failures.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Uniqueness conflict: another writer stored this id first.
    #[error("article {0} already cached")]
    Duplicate(String),
    #[error("cache io: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Configuration could not be loaded or is inconsistent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
