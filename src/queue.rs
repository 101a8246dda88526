//! Output side of the pipeline: the bounded article queue and the sink that
//! feeds it.
//!
//! Workers hand every extracted article to [`ArticleSink::deliver`], which
//! stores it and enqueues it only when the store accepted it as new. That
//! single rule gives at-most-once delivery per id within a process, even when
//! two workers race on the same article.

use crate::cache::{ArticleStore, PutOutcome};
use crate::models::ExtractedArticle;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Bounded FIFO between the workers and the external consumer.
///
/// `push` waits while the queue is full; `get_next` waits while it is empty.
#[derive(Debug)]
pub struct OutputQueue {
    tx: mpsc::Sender<ExtractedArticle>,
    rx: Mutex<mpsc::Receiver<ExtractedArticle>>,
    capacity: usize,
    closed: CancellationToken,
}

impl OutputQueue {
    /// `capacity` must be at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
            closed: CancellationToken::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of articles waiting for the consumer.
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue, waiting for room. Returns `false` once the queue is closed.
    pub async fn push(&self, article: ExtractedArticle) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => false,
            sent = self.tx.send(article) => sent.is_ok(),
        }
    }

    /// Next article, waiting until one is available.
    ///
    /// Returns `None` only after [`close`](Self::close) once the remaining
    /// articles have been drained.
    pub async fn get_next(&self) -> Option<ExtractedArticle> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            article = rx.recv() => article,
            _ = self.closed.cancelled() => rx.try_recv().ok(),
        }
    }

    /// Refuse further pushes and release waiting pushers; queued articles
    /// stay readable.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// What happened to one delivered article.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Stored and enqueued.
    Enqueued,
    /// Already stored; nothing enqueued.
    Duplicate,
    /// Store failed, or the queue is closed.
    Dropped,
}

/// Stores extracted articles and enqueues the new ones.
#[derive(Clone)]
pub struct ArticleSink {
    store: Arc<dyn ArticleStore>,
    queue: Arc<OutputQueue>,
}

impl std::fmt::Debug for ArticleSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArticleSink")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl ArticleSink {
    pub fn new(store: Arc<dyn ArticleStore>, queue: Arc<OutputQueue>) -> Self {
        Self { store, queue }
    }

    pub fn store(&self) -> &Arc<dyn ArticleStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<OutputQueue> {
        &self.queue
    }

    /// Already stored?
    pub async fn contains(&self, id: &str) -> bool {
        self.store.has(id).await
    }

    /// Persist `article`; enqueue it only if this call inserted it.
    #[instrument(level = "info", skip_all, fields(id = %article.id(), source = %article.source()))]
    pub async fn deliver(&self, article: ExtractedArticle) -> Delivery {
        match self.store.put(&article).await {
            Ok(PutOutcome::Inserted) => {
                if self.queue.push(article).await {
                    info!("Article enqueued");
                    Delivery::Enqueued
                } else {
                    warn!("Output queue closed; article kept in cache only");
                    Delivery::Dropped
                }
            }
            Ok(PutOutcome::Duplicate) => {
                debug!("Article already cached; not enqueued again");
                Delivery::Duplicate
            }
            Err(e) => {
                error!(error = %e, "Failed to persist article");
                Delivery::Dropped
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::models::FeedRecord;
    use chrono::Utc;
    use std::time::Duration;

    fn article(url: &str) -> ExtractedArticle {
        ExtractedArticle {
            record: FeedRecord::new("OS News", "t", url, Utc::now()),
            body_text: "body".into(),
            favicon_url: None,
            extracted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn queue_is_fifo() {
        let q = OutputQueue::new(4);
        assert!(q.push(article("https://osnews.com/1")).await);
        assert!(q.push(article("https://osnews.com/2")).await);
        assert_eq!(q.len(), 2);
        assert_eq!(q.get_next().await.unwrap().record.url, "https://osnews.com/1");
        assert_eq!(q.get_next().await.unwrap().record.url, "https://osnews.com/2");
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn push_waits_when_full() {
        let q = Arc::new(OutputQueue::new(1));
        q.push(article("https://osnews.com/1")).await;

        let pusher = {
            let q = Arc::clone(&q);
            tokio::spawn(async move { q.push(article("https://osnews.com/2")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pusher.is_finished());

        q.get_next().await.unwrap();
        assert!(pusher.await.unwrap());
        assert_eq!(q.get_next().await.unwrap().record.url, "https://osnews.com/2");
    }

    #[tokio::test]
    async fn closed_queue_drains_then_ends() {
        let q = OutputQueue::new(2);
        q.push(article("https://osnews.com/1")).await;
        q.close();
        assert!(!q.push(article("https://osnews.com/2")).await);
        assert!(q.get_next().await.is_some());
        assert!(q.get_next().await.is_none());
    }

    #[tokio::test]
    async fn sink_enqueues_each_id_once() {
        let queue = Arc::new(OutputQueue::new(8));
        let sink = ArticleSink::new(Arc::new(MemoryStore::new()), Arc::clone(&queue));

        assert_eq!(sink.deliver(article("https://osnews.com/a")).await, Delivery::Enqueued);
        assert_eq!(sink.deliver(article("https://osnews.com/a")).await, Delivery::Duplicate);
        assert!(sink.contains(&crate::models::record_id("https://osnews.com/a")).await);
        assert_eq!(queue.len(), 1);
    }
}
