//! Per-adapter polling state machine.
//!
//! ```text
//! Idle -> Polling -> Dispatching -> Sleeping -> Idle -> ...
//!            |                        ^
//!            +------ FetchError ------+
//! ```
//!
//! Each [`AdapterTask`] owns its adapter's watermark and seen-set outright, so
//! no locking is needed for deduplication. Records are normalized, admitted
//! and submitted in feed order; submission waits on the shared job channel
//! rather than dropping work. A failed poll is logged and the task sleeps as
//! usual. Sleep lengths are drawn uniformly from the adapter's poll range so
//! adapters sharing an upstream drift apart.

use crate::adapters::SourceAdapter;
use crate::config::PollInterval;
use crate::dedup::{Admission, Deduplicator};
use crate::error::FetchError;
use crate::normalize::Normalizer;
use crate::pool::{ExtractionJob, JobSubmitter};
use chrono::{DateTime, Utc};
use rand::{Rng, rng};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Idle,
    Polling,
    Dispatching,
    Sleeping,
}

/// Counts from one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub admitted: usize,
    pub stale: usize,
    pub duplicate: usize,
    pub future: usize,
    /// Admitted records actually handed to the pool.
    pub submitted: usize,
}

/// One adapter's polling loop.
pub struct AdapterTask {
    adapter: Arc<dyn SourceAdapter>,
    normalizer: Normalizer,
    dedup: Deduplicator,
    submitter: JobSubmitter,
    poll_interval: PollInterval,
    initial_jitter: Duration,
    cancel: CancellationToken,
    state: AdapterState,
}

impl std::fmt::Debug for AdapterTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterTask")
            .field("adapter", &self.adapter.name())
            .field("state", &self.state)
            .field("watermark", &self.dedup.watermark())
            .finish_non_exhaustive()
    }
}

impl AdapterTask {
    pub fn new(
        adapter: Arc<dyn SourceAdapter>,
        normalizer: Normalizer,
        dedup: Deduplicator,
        submitter: JobSubmitter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            adapter,
            normalizer,
            dedup,
            submitter,
            poll_interval: PollInterval::default(),
            initial_jitter: Duration::ZERO,
            cancel,
            state: AdapterState::Idle,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: PollInterval) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Upper bound of the random delay before the first poll.
    pub fn with_initial_jitter(mut self, jitter: Duration) -> Self {
        self.initial_jitter = jitter;
        self
    }

    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    pub fn watermark(&self) -> DateTime<Utc> {
        self.dedup.watermark()
    }

    fn set_state(&mut self, next: AdapterState) {
        debug!(source = self.adapter.name(), from = ?self.state, to = ?next, "Adapter state change");
        self.state = next;
    }

    /// Run one `Polling -> Dispatching` pass and advance the watermark.
    ///
    /// `now` is the reference time for future-date checks and for the
    /// time-driven watermark policy.
    ///
    /// # Errors
    ///
    /// The adapter's [`FetchError`]; the watermark is left untouched.
    #[instrument(level = "info", skip_all, fields(source = %self.adapter.name()))]
    pub async fn poll_once(&mut self, now: DateTime<Utc>) -> Result<CycleReport, FetchError> {
        self.set_state(AdapterState::Polling);
        let records = self.adapter.fetch().await?;

        self.set_state(AdapterState::Dispatching);
        let selector = self.adapter.content_selector().to_string();
        let mut report = CycleReport {
            fetched: records.len(),
            ..CycleReport::default()
        };
        let mut observed = Vec::with_capacity(records.len());
        let mut pool_open = true;

        for raw in &records {
            let record = self.normalizer.normalize(raw);
            observed.push(record.published_at);
            match self.dedup.admit(&record, now) {
                Admission::Admitted => report.admitted += 1,
                Admission::Stale => {
                    report.stale += 1;
                    continue;
                }
                Admission::Duplicate => {
                    report.duplicate += 1;
                    continue;
                }
                Admission::FromTheFuture => {
                    report.future += 1;
                    warn!(url = %record.url, published_at = %record.published_at, "Dropping future-dated entry");
                    continue;
                }
            }
            if !pool_open {
                continue;
            }
            debug!(url = %record.url, "Submitting for extraction");
            let job = ExtractionJob {
                record,
                selector: selector.clone(),
            };
            if self.submitter.submit(job).await {
                report.submitted += 1;
            } else {
                warn!("Extraction pool closed; not submitting further records");
                pool_open = false;
            }
        }

        let before = self.dedup.watermark();
        self.dedup.end_cycle(observed, now);
        info!(
            fetched = report.fetched,
            admitted = report.admitted,
            stale = report.stale,
            duplicate = report.duplicate,
            future = report.future,
            watermark_before = %before,
            watermark = %self.dedup.watermark(),
            seen = self.dedup.seen_len(),
            "Poll cycle complete"
        );
        Ok(report)
    }

    fn next_sleep(&self) -> Duration {
        let min = self.poll_interval.min().as_millis() as u64;
        let max = self.poll_interval.max().as_millis() as u64;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rng().random_range(min..=max))
    }

    /// Sleep for `delay` unless cancelled first. Returns `false` on cancel.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Poll until cancelled.
    #[instrument(level = "info", skip_all, fields(source = %self.adapter.name()))]
    pub async fn run(mut self) {
        let jitter_ms = self.initial_jitter.as_millis() as u64;
        let first = Duration::from_millis(if jitter_ms == 0 {
            0
        } else {
            rng().random_range(0..=jitter_ms)
        });
        info!(?first, "Adapter task started");
        if !self.pause(first).await {
            return;
        }

        let cancel = self.cancel.clone();
        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.poll_once(Utc::now()) => outcome,
            };
            if let Err(e) = outcome {
                warn!(error = %e, "Poll failed; skipping cycle");
            }

            self.set_state(AdapterState::Sleeping);
            let delay = self.next_sleep();
            debug!(?delay, "Sleeping until next poll");
            if !self.pause(delay).await {
                break;
            }
            self.set_state(AdapterState::Idle);
        }
        info!("Adapter task stopped");
    }
}
