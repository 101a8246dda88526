//! Source adapters: one per feed provider.
//!
//! An adapter turns a provider's live feed into an ordered batch of
//! [`FeedRecord`]s and names the CSS selector of that provider's article body.
//! Adapters are held in an [`AdapterRegistry`] keyed by provider name.
//!
//! # Failure model
//!
//! - Transport errors, non-2xx responses and documents that are not feeds
//!   fail the whole fetch with [`FetchError`]
//! - A single malformed entry is logged and skipped; the rest of the batch is
//!   still returned

pub mod feed;
pub mod providers;

use crate::error::{EntryError, FetchError};
use crate::models::FeedRecord;
use async_trait::async_trait;
use feed::{FeedFormat, parse_atom, parse_rss};
use providers::{ALL_PROVIDERS, Provider};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Capability shared by every feed provider.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Provider name; also the registry key and `FeedRecord::source`.
    fn name(&self) -> &str;

    /// CSS selector of the article body on this provider's pages.
    fn content_selector(&self) -> &str;

    /// Fetch the feed and parse it into records, in feed order.
    async fn fetch(&self) -> Result<Vec<FeedRecord>, FetchError>;
}

/// HTTP client for feed documents.
///
/// Sends an explicit `User-Agent` and treats any non-2xx status as a
/// [`FetchError::Status`].
#[derive(Debug, Clone)]
pub struct FeedClient {
    client: reqwest::Client,
}

impl FeedClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|source| FetchError::Transport {
                url: String::new(),
                source,
            })?;
        Ok(Self { client })
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };
        let resp = self.client.get(url).send().await.map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        resp.text().await.map_err(transport)
    }
}

/// [`SourceAdapter`] for a built-in [`Provider`].
#[derive(Debug, Clone)]
pub struct FeedAdapter {
    provider: Provider,
    feed_url: String,
    selector: String,
    client: FeedClient,
}

impl FeedAdapter {
    pub fn new(provider: Provider, client: FeedClient) -> Self {
        Self {
            provider,
            feed_url: provider.feed_url().to_string(),
            selector: provider.content_selector().to_string(),
            client,
        }
    }

    pub fn with_feed_url(mut self, url: impl Into<String>) -> Self {
        self.feed_url = url.into();
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = selector.into();
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Parse a feed document with this provider's rules.
    pub fn parse(&self, xml: &str) -> Result<Vec<FeedRecord>, FetchError> {
        let provider = self.provider;
        let mapped: Vec<Result<Option<FeedRecord>, EntryError>> = match provider.format() {
            FeedFormat::Rss => parse_rss(xml)?
                .into_iter()
                .map(|item| item.and_then(|i| provider.record_from_rss(&i)))
                .collect(),
            FeedFormat::Atom => parse_atom(xml)?
                .into_iter()
                .map(|entry| entry.and_then(|e| provider.record_from_atom(&e)))
                .collect(),
        };

        let total = mapped.len();
        let mut records = Vec::with_capacity(total);
        let mut skipped = 0usize;
        for (index, result) in mapped.into_iter().enumerate() {
            match result {
                Ok(Some(record)) => records.push(record),
                Ok(None) => debug!(index, source = provider.name(), "Entry filtered by provider"),
                Err(e) => {
                    skipped += 1;
                    warn!(index, source = provider.name(), error = %e, "Skipping malformed feed entry");
                }
            }
        }
        debug!(total, kept = records.len(), skipped, source = provider.name(), "Parsed feed");
        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for FeedAdapter {
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn content_selector(&self) -> &str {
        &self.selector
    }

    #[instrument(level = "info", skip(self), fields(source = self.provider.name()))]
    async fn fetch(&self) -> Result<Vec<FeedRecord>, FetchError> {
        let xml = self.client.get_text(&self.feed_url).await?;
        let records = self.parse(&xml)?;
        info!(count = records.len(), url = %self.feed_url, "Fetched feed");
        Ok(records)
    }
}

/// Adapters keyed by provider name.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in provider, with per-source overrides applied and
    /// disabled sources left out.
    pub fn builtin(client: &FeedClient, sources: &crate::config::SourceOverrides) -> Self {
        let mut registry = Self::new();
        for provider in ALL_PROVIDERS {
            let overrides = sources.get(provider.name());
            if overrides.is_some_and(|o| !o.enabled) {
                info!(source = provider.name(), "Source disabled by config");
                continue;
            }
            let mut adapter = FeedAdapter::new(provider, client.clone());
            if let Some(o) = overrides {
                if let Some(url) = &o.feed_url {
                    adapter = adapter.with_feed_url(url.clone());
                }
                if let Some(selector) = &o.content_selector {
                    adapter = adapter.with_selector(selector.clone());
                }
            }
            registry.register(Arc::new(adapter));
        }
        registry
    }

    /// Insert an adapter, replacing any previous one with the same name.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.insert(adapter.name().to_string(), adapter)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn SourceAdapter>> {
        self.adapters.values()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.adapters.keys()).finish()
    }
}
