//! Per-adapter admission control: watermark plus seen-set.
//!
//! A record is admitted iff its `published_at` is strictly after the
//! adapter's watermark **and** its id has not been admitted before. Records
//! dated further in the future than the clock-skew tolerance are treated as
//! malformed and never admitted.
//!
//! Each adapter task owns its own [`Deduplicator`]; nothing here is shared or
//! locked. Cross-task duplicates (for example after a restart) are caught by
//! the idempotent cache write instead.

use crate::models::FeedRecord;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How the watermark moves after a poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatermarkPolicy {
    /// Advance to the newest `published_at` observed in the cycle.
    #[default]
    ContentDriven,
    /// Advance to the current instant regardless of what was observed.
    TimeDriven,
}

/// Retention of admitted ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeenSetMode {
    /// Forget ids published more than the look-back window before the watermark.
    #[default]
    Bounded,
    Unbounded,
}

/// Monotonically non-decreasing cursor over `published_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark(DateTime<Utc>);

impl Watermark {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    pub fn at(&self) -> DateTime<Utc> {
        self.0
    }

    /// Move forward to `to`; moving backwards is ignored.
    pub fn advance(&mut self, to: DateTime<Utc>) {
        if to > self.0 {
            self.0 = to;
        }
    }

    pub fn admits(&self, published_at: DateTime<Utc>) -> bool {
        published_at > self.0
    }
}

/// Identity index of records already dispatched for extraction.
#[derive(Debug, Clone)]
pub struct SeenSet {
    entries: HashMap<String, DateTime<Utc>>,
    horizon: Option<Duration>,
}

impl SeenSet {
    pub fn unbounded() -> Self {
        Self {
            entries: HashMap::new(),
            horizon: None,
        }
    }

    /// Evict entries published more than `horizon` before the pruning cutoff.
    pub fn bounded(horizon: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            horizon: Some(horizon),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Returns `false` if the id was already present.
    pub fn insert(&mut self, id: &str, published_at: DateTime<Utc>) -> bool {
        if self.entries.contains_key(id) {
            return false;
        }
        self.entries.insert(id.to_string(), published_at);
        true
    }

    /// Drop entries older than `reference - horizon`. No-op when unbounded.
    pub fn prune(&mut self, reference: DateTime<Utc>) -> usize {
        let Some(horizon) = self.horizon else {
            return 0;
        };
        let Some(cutoff) = reference.checked_sub_signed(horizon) else {
            return 0;
        };
        let before = self.entries.len();
        self.entries.retain(|_, published| *published >= cutoff);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Outcome of [`Deduplicator::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// `published_at` is not after the watermark.
    Stale,
    /// Id already admitted earlier.
    Duplicate,
    /// `published_at` lies beyond `now + tolerance`.
    FromTheFuture,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Watermark plus seen-set for one adapter.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    watermark: Watermark,
    seen: SeenSet,
    policy: WatermarkPolicy,
    future_tolerance: Duration,
}

impl Deduplicator {
    pub fn new(
        start_after: DateTime<Utc>,
        policy: WatermarkPolicy,
        seen: SeenSet,
        future_tolerance: Duration,
    ) -> Self {
        Self {
            watermark: Watermark::new(start_after),
            seen,
            policy,
            future_tolerance,
        }
    }

    pub fn watermark(&self) -> DateTime<Utc> {
        self.watermark.at()
    }

    pub fn policy(&self) -> WatermarkPolicy {
        self.policy
    }

    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    /// Is `published_at` implausibly far ahead of `now`?
    pub fn is_from_the_future(&self, published_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.checked_add_signed(self.future_tolerance)
            .is_some_and(|limit| published_at > limit)
    }

    /// Decide whether `record` should be dispatched, recording it if so.
    pub fn admit(&mut self, record: &FeedRecord, now: DateTime<Utc>) -> Admission {
        if self.is_from_the_future(record.published_at, now) {
            return Admission::FromTheFuture;
        }
        if !self.watermark.admits(record.published_at) {
            return Admission::Stale;
        }
        if !self.seen.insert(&record.id, record.published_at) {
            return Admission::Duplicate;
        }
        Admission::Admitted
    }

    /// Advance the watermark after a completed poll cycle.
    ///
    /// `observed` are the `published_at` values of every well-formed record
    /// seen in the cycle, admitted or not. Future-dated values are ignored so a
    /// bogus entry cannot drag the watermark ahead of real content.
    pub fn end_cycle<I>(&mut self, observed: I, now: DateTime<Utc>)
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        match self.policy {
            WatermarkPolicy::ContentDriven => {
                let newest = observed
                    .into_iter()
                    .filter(|ts| !self.is_from_the_future(*ts, now))
                    .max();
                if let Some(newest) = newest {
                    self.watermark.advance(newest);
                }
            }
            WatermarkPolicy::TimeDriven => self.watermark.advance(now),
        }
        self.seen.prune(self.watermark.at());
    }
}
