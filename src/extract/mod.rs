//! Page Content Extractor.
//!
//! Loads an article's live page, pulls the body text out of the provider's
//! content container and finds the site favicon. Loading goes through a
//! [`PageLoader`] under a [`RetryPolicy`]; a page whose selector yields no
//! text counts as a failed attempt, since the document may not have settled.
//!
//! Favicon lookup never fails an extraction: no icon simply means `None`.

pub mod loader;
pub mod retry;

use crate::error::{ExtractionError, LoadError};
use crate::models::{ExtractedArticle, FeedRecord};
use crate::normalize::{collapse_whitespace, space_after_periods};
use chrono::Utc;
use loader::PageLoader;
use once_cell::sync::Lazy;
use retry::RetryPolicy;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use tracing::{info, instrument};
use url::Url;

static ICON_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("link[rel][href]").unwrap());

/// Elements whose text is never part of an article body.
const HIDDEN: &[&str] = &["script", "style", "noscript", "template", "svg"];

/// Elements that start a new paragraph.
const BLOCKS: &[&str] = &[
    "p", "div", "li", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "pre", "br", "tr",
    "figcaption", "section",
];

/// Text and favicon pulled from one rendered page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageContent {
    pub body_text: String,
    pub favicon_url: Option<String>,
}

/// Extract body text and favicon from rendered `html`.
///
/// Paragraphs of every element matching `selector` are joined with blank
/// lines. Fails with [`LoadError::EmptyBody`] when nothing matched or the
/// matches hold no text.
pub fn extract_page(html: &str, page_url: &str, selector: &str) -> Result<PageContent, LoadError> {
    let body_selector =
        Selector::parse(selector).map_err(|_| LoadError::InvalidSelector(selector.to_string()))?;
    let document = Html::parse_document(html);

    let paragraphs: Vec<String> = document
        .select(&body_selector)
        .flat_map(paragraphs_of)
        .collect();
    if paragraphs.is_empty() {
        return Err(LoadError::EmptyBody(selector.to_string()));
    }

    Ok(PageContent {
        body_text: paragraphs.join("\n\n"),
        favicon_url: favicon_url(&document, page_url),
    })
}

fn paragraphs_of(element: ElementRef<'_>) -> Vec<String> {
    let mut raw = String::new();
    for node in element.descendants() {
        if let Some(el) = node.value().as_element() {
            if BLOCKS.contains(&el.name()) {
                raw.push('\n');
            }
        } else if let Some(text) = node.value().as_text() {
            let hidden = node
                .ancestors()
                .filter_map(|a| a.value().as_element())
                .any(|e| HIDDEN.contains(&e.name()));
            if !hidden {
                raw.push_str(text);
            }
        }
    }
    raw.split('\n')
        .map(|line| space_after_periods(&collapse_whitespace(line)))
        .filter(|line| !line.is_empty())
        .collect()
}

/// First `<link rel="... icon ...">`, resolved against the page URL.
fn favicon_url(document: &Html, page_url: &str) -> Option<String> {
    let href = document
        .select(&ICON_SELECTOR)
        .find(|link| {
            link.value()
                .attr("rel")
                .is_some_and(|rel| rel.split_ascii_whitespace().any(|t| t.eq_ignore_ascii_case("icon")))
        })
        .and_then(|link| link.value().attr("href"))?;
    let base = Url::parse(page_url).ok()?;
    base.join(href.trim()).ok().map(|u| u.to_string())
}

/// Turns feed records into extracted articles.
#[derive(Clone)]
pub struct Extractor {
    loader: Arc<dyn PageLoader>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor").field("policy", &self.policy).finish()
    }
}

impl Extractor {
    pub fn new(loader: Arc<dyn PageLoader>, policy: RetryPolicy) -> Self {
        Self { loader, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Load `record.url` and extract its content, retrying transient failures.
    #[instrument(level = "info", skip_all, fields(source = %record.source, url = %record.url))]
    pub async fn extract(
        &self,
        record: FeedRecord,
        selector: &str,
    ) -> Result<ExtractedArticle, ExtractionError> {
        let url = record.url.clone();
        let outcome = self
            .policy
            .run(&url, |_attempt| {
                let loader = Arc::clone(&self.loader);
                let url = url.clone();
                async move {
                    let html = loader.load(&url).await?;
                    extract_page(&html, &url, selector)
                }
            })
            .await;

        match outcome {
            Ok(content) => {
                info!(
                    chars = content.body_text.len(),
                    favicon = content.favicon_url.is_some(),
                    "Extracted article"
                );
                Ok(ExtractedArticle {
                    record,
                    body_text: content.body_text,
                    favicon_url: content.favicon_url,
                    extracted_at: Utc::now(),
                })
            }
            Err(exhausted) => Err(ExtractionError {
                url,
                attempts: exhausted.attempts,
                last: exhausted.last,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const PAGE: &str = r#"<!doctype html>
<html><head>
  <link rel="stylesheet" href="/site.css">
  <link rel="shortcut icon" href="/favicon.ico">
  <title>Story</title>
</head><body>
  <nav>Home | Tech</nav>
  <div class="post-content">
    <p>First paragraph.It continues.</p>
    <script>trackReader();</script>
    <p>Second <b>bold</b> paragraph.</p>
  </div>
  <footer>Copyright</footer>
</body></html>"#;

    #[test]
    fn extracts_paragraphs_under_selector() {
        let content = extract_page(PAGE, "https://arstechnica.com/a/b", ".post-content").unwrap();
        assert_eq!(
            content.body_text,
            "First paragraph. It continues.\n\nSecond bold paragraph."
        );
        assert_eq!(content.favicon_url.as_deref(), Some("https://arstechnica.com/favicon.ico"));
    }

    #[test]
    fn missing_container_is_empty_body() {
        let err = extract_page(PAGE, "https://arstechnica.com/a", ".entry-content").unwrap_err();
        assert!(matches!(err, LoadError::EmptyBody(_)));
    }

    #[test]
    fn bad_selector_is_reported() {
        let err = extract_page(PAGE, "https://arstechnica.com/a", "[[nope").unwrap_err();
        assert!(matches!(err, LoadError::InvalidSelector(_)));
    }

    #[test]
    fn favicon_is_optional() {
        let html = r#"<html><body><article><p>Text</p></article></body></html>"#;
        let content = extract_page(html, "https://example.com/x", "article").unwrap();
        assert_eq!(content.favicon_url, None);
    }

    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl PageLoader for Flaky {
        async fn load(&self, _url: &str) -> Result<String, LoadError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                return Err(LoadError::Navigation(format!("attempt {n}")));
            }
            Ok(PAGE.to_string())
        }
    }

    fn extractor(failures: usize) -> (Extractor, Arc<Flaky>) {
        let loader = Arc::new(Flaky {
            failures,
            calls: AtomicUsize::new(0),
        });
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
            attempt_timeout: Duration::from_secs(5),
        };
        (Extractor::new(loader.clone(), policy), loader)
    }

    fn record() -> FeedRecord {
        let published = chrono::TimeZone::with_ymd_and_hms(&Utc, 2025, 5, 6, 12, 0, 0).unwrap();
        FeedRecord::new("Ars Technica", "Story", "https://arstechnica.com/a/b", published)
    }

    #[tokio::test]
    async fn retried_extraction_matches_clean_run() {
        let (steady, _) = extractor(0);
        let (flaky, calls) = extractor(2);
        let clean = steady.extract(record(), ".post-content").await.unwrap();
        let retried = flaky.extract(record(), ".post-content").await.unwrap();
        assert_eq!(calls.calls.load(Ordering::SeqCst), 3);
        assert_eq!(retried.body_text, clean.body_text);
        assert_eq!(retried.record, clean.record);
    }

    #[tokio::test]
    async fn exhausted_budget_is_an_extraction_error() {
        let (down, calls) = extractor(usize::MAX);
        let err = down.extract(record(), ".post-content").await.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.url, "https://arstechnica.com/a/b");
        assert_eq!(calls.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn absolute_favicon_is_kept() {
        let html = r#"<html><head><link rel="icon" href="https://cdn.example.com/i.png"></head>
            <body><main>Body</main></body></html>"#;
        let content = extract_page(html, "https://example.com/x", "main").unwrap();
        assert_eq!(content.favicon_url.as_deref(), Some("https://cdn.example.com/i.png"));
    }
}
