//! Fixed-size extraction worker pool shared by every adapter.
//!
//! Adapters submit [`ExtractionJob`]s through a bounded channel; `submit`
//! waits while the channel is full, which is how a slow browser pushes back
//! on the pollers. Each worker takes one job at a time:
//!
//! 1. skip it if the cache already holds the id
//! 2. extract the page under the retry policy
//! 3. hand the article to the [`ArticleSink`]
//!
//! A failed extraction is logged and the job dropped; the worker moves on.

use crate::extract::Extractor;
use crate::models::FeedRecord;
use crate::queue::ArticleSink;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// One record to extract, with the selector of its provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionJob {
    pub record: FeedRecord,
    pub selector: String,
}

/// Handle adapters use to enqueue jobs.
#[derive(Debug, Clone)]
pub struct JobSubmitter {
    tx: mpsc::Sender<ExtractionJob>,
}

impl JobSubmitter {
    /// A submitter and the receiving end of its job channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ExtractionJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue a job, waiting for room. Returns `false` once the pool is gone.
    pub async fn submit(&self, job: ExtractionJob) -> bool {
        self.tx.send(job).await.is_ok()
    }
}

/// Running workers.
#[derive(Debug)]
pub struct WorkerPool {
    submitter: JobSubmitter,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `size` workers reading from a job channel of `capacity`.
    ///
    /// Workers stop when `cancel` fires (after finishing their current job)
    /// or once every [`JobSubmitter`] has been dropped and the channel drained.
    pub fn spawn(
        size: usize,
        capacity: usize,
        extractor: Arc<Extractor>,
        sink: Arc<ArticleSink>,
        cancel: CancellationToken,
    ) -> Self {
        let (submitter, rx) = JobSubmitter::channel(capacity);
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..size.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let extractor = Arc::clone(&extractor);
                let sink = Arc::clone(&sink);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    run_worker(worker, rx, extractor, sink, cancel).await;
                })
            })
            .collect::<Vec<_>>();
        info!(workers = workers.len(), capacity, "Extraction pool started");

        Self { submitter, workers }
    }

    pub fn submitter(&self) -> JobSubmitter {
        self.submitter.clone()
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Drop the pool's own submitter and wait for every worker to exit.
    pub async fn join(self) {
        drop(self.submitter);
        for handle in self.workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "Extraction worker panicked");
            }
        }
    }
}

async fn next_job(
    rx: &Mutex<mpsc::Receiver<ExtractionJob>>,
    cancel: &CancellationToken,
) -> Option<ExtractionJob> {
    let mut rx = rx.lock().await;
    tokio::select! {
        _ = cancel.cancelled() => None,
        job = rx.recv() => job,
    }
}

#[instrument(level = "info", skip(rx, extractor, sink, cancel))]
async fn run_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<ExtractionJob>>>,
    extractor: Arc<Extractor>,
    sink: Arc<ArticleSink>,
    cancel: CancellationToken,
) {
    debug!("Worker ready");
    while let Some(job) = next_job(&rx, &cancel).await {
        let ExtractionJob { record, selector } = job;
        if sink.contains(&record.id).await {
            debug!(id = %record.id, url = %record.url, "Already cached; skipping extraction");
            continue;
        }
        match extractor.extract(record, &selector).await {
            Ok(article) => {
                sink.deliver(article).await;
            }
            Err(e) => warn!(error = %e, "Dropping article after failed extraction"),
        }
    }
    debug!("Worker stopped");
}
