// tests/pipeline_scenarios.rs
//
// End-to-end runs of the pipeline against scripted feeds and pages. Nothing
// here touches the network or a browser.

use async_trait::async_trait;
use awful_news_ingest::adapters::{AdapterRegistry, SourceAdapter};
use awful_news_ingest::cache::{ArticleStore, DirStore, MemoryStore};
use awful_news_ingest::config::{ExtractionConfig, PipelineConfig, PollInterval};
use awful_news_ingest::error::{FetchError, LoadError};
use awful_news_ingest::extract::Extractor;
use awful_news_ingest::extract::loader::PageLoader;
use awful_news_ingest::models::{ExtractedArticle, FeedRecord};
use awful_news_ingest::pipeline::Pipeline;
use awful_news_ingest::pool::{ExtractionJob, WorkerPool};
use awful_news_ingest::queue::{ArticleSink, OutputQueue};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

struct ScriptedFeed {
    records: Vec<FeedRecord>,
    fetches: AtomicUsize,
}

impl ScriptedFeed {
    fn new(records: Vec<FeedRecord>) -> Self {
        Self {
            records,
            fetches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SourceAdapter for ScriptedFeed {
    fn name(&self) -> &str {
        "Scripted"
    }

    fn content_selector(&self) -> &str {
        "article"
    }

    async fn fetch(&self) -> Result<Vec<FeedRecord>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.clone())
    }
}

/// Serves a fixed page per URL, failing the first `failures` loads of each.
#[derive(Default)]
struct ScriptedPages {
    failures: usize,
    delay: Duration,
    loads: Mutex<HashMap<String, usize>>,
}

impl ScriptedPages {
    fn failing(failures: usize) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn loads_of(&self, url: &str) -> usize {
        self.loads.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    fn total_loads(&self) -> usize {
        self.loads.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl PageLoader for ScriptedPages {
    async fn load(&self, url: &str) -> Result<String, LoadError> {
        let attempt = {
            let mut loads = self.loads.lock().unwrap();
            let n = loads.entry(url.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if attempt <= self.failures {
            return Err(LoadError::Navigation(format!("flaky attempt {attempt}")));
        }
        Ok(format!(
            r#"<html><head><link rel="icon" href="/favicon.ico"></head>
<body><nav>Menu</nav><article><p>Body of {url}</p><p>Second paragraph.</p></article></body></html>"#
        ))
    }
}

fn minutes_ago(m: i64) -> DateTime<Utc> {
    Utc::now() - ChronoDuration::minutes(m)
}

fn record(path: &str, published_at: DateTime<Utc>) -> FeedRecord {
    FeedRecord::new(
        "Scripted",
        format!("<b>Story</b> {path}"),
        format!("https://news.example.com/{path}"),
        published_at,
    )
    .with_summary("<p>Summary.With no space</p>")
}

fn config(start_after: DateTime<Utc>) -> PipelineConfig {
    PipelineConfig {
        start_after: Some(start_after),
        workers: 2,
        initial_jitter_secs: 0,
        poll_interval: PollInterval {
            min_secs: 3600,
            max_secs: 3600,
        },
        extraction: ExtractionConfig {
            max_attempts: 3,
            base_delay_secs: 0,
            max_delay_secs: 0,
            jitter_secs: 0,
            attempt_timeout_secs: 5,
        },
        ..PipelineConfig::default()
    }
}

fn pipeline(
    config: PipelineConfig,
    feed: Arc<ScriptedFeed>,
    pages: Arc<ScriptedPages>,
    store: Arc<dyn ArticleStore>,
) -> Pipeline {
    let mut registry = AdapterRegistry::new();
    registry.register(feed);
    Pipeline::new(config, registry, pages, store)
}

async fn next(p: &Pipeline) -> ExtractedArticle {
    timeout(WAIT, p.get_next_article())
        .await
        .expect("article within deadline")
        .expect("queue open")
}

async fn assert_quiet(p: &Pipeline) {
    assert!(
        timeout(QUIET, p.get_next_article()).await.is_err(),
        "no further article expected"
    );
}

#[tokio::test]
async fn stale_entry_is_not_dispatched() {
    let feed = Arc::new(ScriptedFeed::new(vec![
        record("newer", minutes_ago(10)),
        record("older-than-watermark", minutes_ago(120)),
        record("new", minutes_ago(30)),
    ]));
    let pages = Arc::new(ScriptedPages::default());
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(
        config(minutes_ago(60)),
        Arc::clone(&feed),
        Arc::clone(&pages),
        store.clone(),
    );

    assert_eq!(p.start().await, 1);
    let got: BTreeSet<String> = [next(&p).await, next(&p).await]
        .into_iter()
        .map(|a| a.record.url)
        .collect();
    assert_quiet(&p).await;
    p.shutdown().await;

    let expected: BTreeSet<String> = ["https://news.example.com/newer", "https://news.example.com/new"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(got, expected);
    assert_eq!(pages.loads_of("https://news.example.com/older-than-watermark"), 0);
    assert_eq!(store.len().await, 2);
    assert_eq!(feed.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn delivered_article_is_normalized_and_extracted() {
    let feed = Arc::new(ScriptedFeed::new(vec![record("one", minutes_ago(5))]));
    let pages = Arc::new(ScriptedPages::default());
    let p = pipeline(
        config(minutes_ago(60)),
        feed,
        pages,
        Arc::new(MemoryStore::new()),
    );

    p.start().await;
    let article = next(&p).await;
    p.shutdown().await;

    assert_eq!(article.record.title, "Story one");
    assert_eq!(article.record.summary_text, "Summary. With no space");
    assert_eq!(
        article.body_text,
        "Body of https://news.example.com/one\n\nSecond paragraph."
    );
    assert_eq!(
        article.favicon_url.as_deref(),
        Some("https://news.example.com/favicon.ico")
    );
}

#[tokio::test]
async fn far_future_entry_is_dropped() {
    let future = Utc::now() + ChronoDuration::days(3650);
    let feed = Arc::new(ScriptedFeed::new(vec![
        record("from-the-future", future),
        record("today", minutes_ago(15)),
    ]));
    let pages = Arc::new(ScriptedPages::default());
    let p = pipeline(
        config(minutes_ago(60)),
        feed,
        Arc::clone(&pages),
        Arc::new(MemoryStore::new()),
    );

    p.start().await;
    assert_eq!(next(&p).await.record.url, "https://news.example.com/today");
    assert_quiet(&p).await;
    p.shutdown().await;

    assert_eq!(pages.loads_of("https://news.example.com/from-the-future"), 0);
}

#[tokio::test]
async fn flaky_page_is_retried_and_cached_once() {
    let feed = Arc::new(ScriptedFeed::new(vec![record("flaky", minutes_ago(5))]));
    let pages = Arc::new(ScriptedPages::failing(2));
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(
        config(minutes_ago(60)),
        feed,
        Arc::clone(&pages),
        store.clone(),
    );

    p.start().await;
    let article = next(&p).await;
    assert_quiet(&p).await;
    p.shutdown().await;

    assert_eq!(article.record.url, "https://news.example.com/flaky");
    assert_eq!(pages.loads_of("https://news.example.com/flaky"), 3);
    assert_eq!(store.get_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn exhausted_page_is_dropped() {
    let feed = Arc::new(ScriptedFeed::new(vec![record("down", minutes_ago(5))]));
    let pages = Arc::new(ScriptedPages::failing(usize::MAX));
    let store = Arc::new(MemoryStore::new());
    let p = pipeline(
        config(minutes_ago(60)),
        feed,
        Arc::clone(&pages),
        store.clone(),
    );

    p.start().await;
    assert_quiet(&p).await;
    p.shutdown().await;

    assert_eq!(pages.total_loads(), 3);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn racing_workers_store_one_article() {
    let tmp = tempfile::tempdir().unwrap();
    let store: Arc<dyn ArticleStore> = Arc::new(DirStore::open(tmp.path()).await.unwrap());
    let queue = Arc::new(OutputQueue::new(8));
    let sink = Arc::new(ArticleSink::new(Arc::clone(&store), Arc::clone(&queue)));
    let pages = Arc::new(ScriptedPages::slow(Duration::from_millis(100)));
    let extractor = Arc::new(Extractor::new(pages.clone(), Default::default()));
    let cancel = CancellationToken::new();

    let pool = WorkerPool::spawn(2, 4, extractor, sink, cancel.clone());
    let job = ExtractionJob {
        record: record("raced", minutes_ago(5)),
        selector: "article".into(),
    };
    assert!(pool.submitter().submit(job.clone()).await);
    assert!(pool.submitter().submit(job).await);

    let first = timeout(WAIT, queue.get_next()).await.unwrap().unwrap();
    assert_eq!(first.record.url, "https://news.example.com/raced");
    assert!(timeout(QUIET, queue.get_next()).await.is_err());

    cancel.cancel();
    pool.join().await;

    assert_eq!(pages.loads_of("https://news.example.com/raced"), 2);
    assert_eq!(store.get_all().await.unwrap().len(), 1);
    let files = std::fs::read_dir(tmp.path()).unwrap().count();
    assert_eq!(files, 1);
}

#[tokio::test]
async fn replay_delivers_cache_in_file_order_without_extraction() {
    let tmp = tempfile::tempdir().unwrap();
    let seeded = DirStore::open(tmp.path()).await.unwrap();
    for i in 0..5 {
        let article = ExtractedArticle {
            record: record(&format!("cached-{i}"), minutes_ago(60 + i)),
            body_text: format!("cached body {i}"),
            favicon_url: None,
            extracted_at: Utc::now(),
        };
        seeded.put(&article).await.unwrap();
    }
    let expected: Vec<String> = seeded
        .get_all()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.record.id)
        .collect();
    let mut sorted = expected.clone();
    sorted.sort();
    assert_eq!(expected, sorted);

    let store = Arc::new(DirStore::open(tmp.path()).await.unwrap());
    let feed = Arc::new(ScriptedFeed::new(vec![record("live", minutes_ago(1))]));
    let pages = Arc::new(ScriptedPages::default());
    let mut cfg = config(minutes_ago(600));
    cfg.output_queue_capacity = 2;
    let p = pipeline(cfg, Arc::clone(&feed), Arc::clone(&pages), store);

    assert_eq!(p.replay().await.unwrap(), 5);
    let mut delivered = Vec::new();
    for _ in 0..5 {
        delivered.push(next(&p).await.record.id);
    }
    assert_quiet(&p).await;
    p.shutdown().await;

    assert_eq!(delivered, expected);
    assert_eq!(pages.total_loads(), 0);
    assert_eq!(feed.fetches.load(Ordering::SeqCst), 0);
    assert_eq!(p.list_all_articles().await.unwrap().len(), 5);
}

#[tokio::test]
async fn restart_does_not_redeliver_cached_articles() {
    let tmp = tempfile::tempdir().unwrap();
    let records = vec![record("a", minutes_ago(20)), record("b", minutes_ago(10))];

    {
        let store = Arc::new(DirStore::open(tmp.path()).await.unwrap());
        let feed = Arc::new(ScriptedFeed::new(records.clone()));
        let p = pipeline(config(minutes_ago(60)), feed, Arc::new(ScriptedPages::default()), store);
        p.start().await;
        next(&p).await;
        next(&p).await;
        p.shutdown().await;
    }

    let store = Arc::new(DirStore::open(tmp.path()).await.unwrap());
    let feed = Arc::new(ScriptedFeed::new(records));
    let pages = Arc::new(ScriptedPages::default());
    let p = pipeline(config(minutes_ago(60)), feed, Arc::clone(&pages), store);
    p.start().await;
    assert_quiet(&p).await;
    p.shutdown().await;

    assert_eq!(pages.total_loads(), 0);
    assert_eq!(p.list_all_articles().await.unwrap().len(), 2);
}

#[tokio::test]
async fn shutdown_ends_consumers() {
    let p = pipeline(
        config(minutes_ago(60)),
        Arc::new(ScriptedFeed::new(Vec::new())),
        Arc::new(ScriptedPages::default()),
        Arc::new(MemoryStore::new()),
    );
    p.start().await;
    p.shutdown().await;
    let ended = timeout(WAIT, p.get_next_article()).await.unwrap();
    assert!(ended.is_none());
}
