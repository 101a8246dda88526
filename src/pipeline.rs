//! The pipeline owner.
//!
//! A [`Pipeline`] wires the adapters, the extraction pool, the durable cache
//! and the output queue together and exposes the two egress operations:
//!
//! | Operation | Semantics |
//! |-----------|-----------|
//! | [`get_next_article`](Pipeline::get_next_article) | blocking pull from the output queue |
//! | [`list_all_articles`](Pipeline::list_all_articles) | snapshot of everything cached |
//!
//! It runs in one of two modes:
//!
//! - **live** ([`start`](Pipeline::start)): one polling task per adapter plus
//!   the shared worker pool
//! - **replay** ([`replay`](Pipeline::replay)): cached articles are fed to the
//!   output queue in cache order; nothing is fetched or extracted
//!
//! [`shutdown`](Pipeline::shutdown) cancels every task, closes the queue and
//! waits for in-flight extractions to finish.

use crate::adapters::AdapterRegistry;
use crate::cache::ArticleStore;
use crate::config::PipelineConfig;
use crate::dedup::{Deduplicator, SeenSet, SeenSetMode};
use crate::error::PersistError;
use crate::extract::Extractor;
use crate::extract::loader::PageLoader;
use crate::models::ExtractedArticle;
use crate::normalize::Normalizer;
use crate::pool::WorkerPool;
use crate::queue::{ArticleSink, OutputQueue};
use crate::scheduler::AdapterTask;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

#[derive(Debug, Default)]
struct Tasks {
    pool: Option<WorkerPool>,
    adapters: Vec<JoinHandle<()>>,
    replay: Option<JoinHandle<()>>,
}

impl Tasks {
    fn is_running(&self) -> bool {
        self.pool.is_some() || self.replay.is_some()
    }
}

/// The ingestion pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    registry: AdapterRegistry,
    extractor: Arc<Extractor>,
    store: Arc<dyn ArticleStore>,
    queue: Arc<OutputQueue>,
    sink: Arc<ArticleSink>,
    cancel: CancellationToken,
    tasks: Mutex<Tasks>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("registry", &self.registry)
            .field("extractor", &self.extractor)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        registry: AdapterRegistry,
        loader: Arc<dyn PageLoader>,
        store: Arc<dyn ArticleStore>,
    ) -> Self {
        let extractor = Arc::new(Extractor::new(loader, config.extraction.retry_policy()));
        let queue = Arc::new(OutputQueue::new(config.output_queue_capacity));
        let sink = Arc::new(ArticleSink::new(Arc::clone(&store), Arc::clone(&queue)));
        Self {
            config,
            registry,
            extractor,
            store,
            queue,
            sink,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Tasks::default()),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn deduplicator(&self) -> Deduplicator {
        let seen = match self.config.seen_set {
            SeenSetMode::Bounded => SeenSet::bounded(self.config.lookback()),
            SeenSetMode::Unbounded => SeenSet::unbounded(),
        };
        Deduplicator::new(
            self.config.initial_watermark(Utc::now()),
            self.config.watermark_policy,
            seen,
            self.config.future_tolerance(),
        )
    }

    /// Start live ingestion. Returns the number of adapter tasks started.
    ///
    /// Calling it on a pipeline that is already running does nothing.
    #[instrument(level = "info", skip_all)]
    pub async fn start(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_running() {
            warn!("Pipeline already running");
            return 0;
        }

        let pool = WorkerPool::spawn(
            self.config.workers,
            self.config.job_queue_capacity,
            Arc::clone(&self.extractor),
            Arc::clone(&self.sink),
            self.cancel.child_token(),
        );
        let normalizer = Normalizer::new(self.config.summary_word_budget);

        for adapter in self.registry.iter() {
            let name = adapter.name().to_string();
            let task = AdapterTask::new(
                Arc::clone(adapter),
                normalizer,
                self.deduplicator(),
                pool.submitter(),
                self.cancel.child_token(),
            )
            .with_poll_interval(self.config.poll_interval_for(&name))
            .with_initial_jitter(self.config.initial_jitter());
            info!(source = %name, watermark = %task.watermark(), "Starting adapter");
            tasks.adapters.push(tokio::spawn(task.run()));
        }
        tasks.pool = Some(pool);

        let started = tasks.adapters.len();
        info!(
            adapters = started,
            workers = self.config.workers,
            policy = ?self.config.watermark_policy,
            "Pipeline started"
        );
        started
    }

    /// Feed every cached article to the output queue, in cache order, without
    /// fetching or extracting anything. Returns the number of articles queued
    /// for delivery.
    ///
    /// # Errors
    ///
    /// The cache could not be read.
    #[instrument(level = "info", skip_all)]
    pub async fn replay(&self) -> Result<usize, PersistError> {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_running() {
            warn!("Pipeline already running");
            return Ok(0);
        }

        let articles = self.store.get_all().await?;
        let count = articles.len();
        let queue = Arc::clone(&self.queue);
        tasks.replay = Some(tokio::spawn(async move {
            for article in articles {
                if !queue.push(article).await {
                    warn!("Output queue closed during replay");
                    return;
                }
            }
            info!("Replay complete");
        }));
        info!(count, "Replaying cached articles");
        Ok(count)
    }

    /// Next delivered article, waiting until one is available.
    ///
    /// `None` once the pipeline has shut down and the queue is drained.
    pub async fn get_next_article(&self) -> Option<ExtractedArticle> {
        self.queue.get_next().await
    }

    /// Snapshot of every cached article.
    pub async fn list_all_articles(&self) -> Result<Vec<ExtractedArticle>, PersistError> {
        self.store.get_all().await
    }

    /// Stop all tasks and close the output queue.
    ///
    /// In-flight extractions run to completion; their results are cached but
    /// no longer enqueued.
    #[instrument(level = "info", skip_all)]
    pub async fn shutdown(&self) {
        info!("Shutting down pipeline");
        self.cancel.cancel();
        self.queue.close();

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for handle in tasks.adapters {
            if let Err(e) = handle.await {
                warn!(error = %e, "Adapter task panicked");
            }
        }
        if let Some(pool) = tasks.pool {
            pool.join().await;
        }
        if let Some(replay) = tasks.replay {
            if let Err(e) = replay.await {
                warn!(error = %e, "Replay task panicked");
            }
        }
        info!("Pipeline stopped");
    }
}
