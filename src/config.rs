//! Pipeline configuration.
//!
//! Loaded from an optional YAML file; every field has a default, so an empty
//! file (or no file) yields a working configuration. Command-line flags are
//! applied on top by the binary.
//!
//! ```yaml
//! lookback_secs: 86400
//! workers: 5
//! poll_interval: { min_secs: 300, max_secs: 600 }
//! watermark_policy: content_driven
//! extraction:
//!   max_attempts: 3
//!   attempt_timeout_secs: 60
//! sources:
//!   TechRadar:
//!     enabled: false
//!   Hackaday:
//!     content_selector: "article .entry-content"
//!     poll_interval: { min_secs: 900, max_secs: 1200 }
//! ```

use crate::dedup::{SeenSetMode, WatermarkPolicy};
use crate::error::ConfigError;
use crate::extract::retry::RetryPolicy;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

/// Upper bound on `lookback_secs` and `future_tolerance_secs` (ten years).
pub const MAX_WINDOW_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Per-source overrides keyed by provider name.
pub type SourceOverrides = BTreeMap<String, SourceOverride>;

/// Range an adapter's inter-poll sleep is drawn from, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollInterval {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl Default for PollInterval {
    fn default() -> Self {
        Self {
            min_secs: 5 * 60,
            max_secs: 10 * 60,
        }
    }
}

impl PollInterval {
    pub fn min(&self) -> Duration {
        Duration::from_secs(self.min_secs)
    }

    pub fn max(&self) -> Duration {
        Duration::from_secs(self.max_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceOverride {
    pub enabled: bool,
    pub poll_interval: Option<PollInterval>,
    pub content_selector: Option<String>,
    pub feed_url: Option<String>,
}

impl Default for SourceOverride {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: None,
            content_selector: None,
            feed_url: None,
        }
    }
}

/// Retry and timeout budget for page extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub max_attempts: usize,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub jitter_secs: u64,
    pub attempt_timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 30,
            max_delay_secs: 300,
            jitter_secs: 30,
            attempt_timeout_secs: 60,
        }
    }
}

impl ExtractionConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_secs(self.base_delay_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
            jitter: Duration::from_secs(self.jitter_secs),
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
        }
    }
}

/// Which page loader performs extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderKind {
    /// Headless Chromium.
    #[default]
    Chrome,
    /// Plain HTTP GET, no script execution.
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Initial watermark is `now - lookback_secs` unless `start_after` is set.
    pub lookback_secs: u64,
    pub start_after: Option<DateTime<Utc>>,
    pub workers: usize,
    pub job_queue_capacity: usize,
    pub output_queue_capacity: usize,
    pub poll_interval: PollInterval,
    pub initial_jitter_secs: u64,
    pub sources: SourceOverrides,
    pub watermark_policy: WatermarkPolicy,
    pub seen_set: SeenSetMode,
    pub future_tolerance_secs: u64,
    pub extraction: ExtractionConfig,
    pub loader: LoaderKind,
    pub cache_dir: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub summary_word_budget: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lookback_secs: 24 * 60 * 60,
            start_after: None,
            workers: 5,
            job_queue_capacity: 64,
            output_queue_capacity: 256,
            poll_interval: PollInterval::default(),
            initial_jitter_secs: 10,
            sources: SourceOverrides::new(),
            watermark_policy: WatermarkPolicy::default(),
            seen_set: SeenSetMode::default(),
            future_tolerance_secs: 10 * 60,
            extraction: ExtractionConfig::default(),
            loader: LoaderKind::default(),
            cache_dir: "/tmp/articles".to_string(),
            user_agent: format!("awful_news_ingest/{}", env!("CARGO_PKG_VERSION")),
            http_timeout_secs: 30,
            summary_word_budget: crate::normalize::DEFAULT_WORD_BUDGET,
        }
    }
}

impl PipelineConfig {
    /// Read and validate a YAML config file.
    #[instrument(level = "info")]
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(Path::new(path)).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        let config = Self::from_yaml(&raw)?;
        info!(path, sources = config.sources.len(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg)) };
        if self.workers == 0 {
            return invalid("workers must be at least 1".into());
        }
        if self.job_queue_capacity == 0 || self.output_queue_capacity == 0 {
            return invalid("queue capacities must be at least 1".into());
        }
        if self.extraction.max_attempts == 0 {
            return invalid("extraction.max_attempts must be at least 1".into());
        }
        for (name, secs) in [
            ("lookback_secs", self.lookback_secs),
            ("future_tolerance_secs", self.future_tolerance_secs),
        ] {
            if secs > MAX_WINDOW_SECS {
                return invalid(format!("{name} {secs} exceeds {MAX_WINDOW_SECS}"));
            }
        }
        let ranges = std::iter::once(("default", &self.poll_interval)).chain(
            self.sources
                .iter()
                .filter_map(|(name, o)| o.poll_interval.as_ref().map(|p| (name.as_str(), p))),
        );
        for (name, range) in ranges {
            if range.min_secs > range.max_secs {
                return invalid(format!(
                    "poll_interval for {name}: min_secs {} > max_secs {}",
                    range.min_secs, range.max_secs
                ));
            }
        }
        Ok(())
    }

    /// Starting watermark: explicit override, else `now - lookback`.
    pub fn initial_watermark(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.start_after.unwrap_or_else(|| {
            now.checked_sub_signed(self.lookback())
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        })
    }

    pub fn lookback(&self) -> ChronoDuration {
        window(self.lookback_secs)
    }

    pub fn future_tolerance(&self) -> ChronoDuration {
        window(self.future_tolerance_secs)
    }

    /// Poll range for `source`, falling back to the default range.
    pub fn poll_interval_for(&self, source: &str) -> PollInterval {
        self.sources
            .get(source)
            .and_then(|o| o.poll_interval)
            .unwrap_or(self.poll_interval)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn initial_jitter(&self) -> Duration {
        Duration::from_secs(self.initial_jitter_secs)
    }
}

/// Seconds as a chrono duration, saturating instead of panicking.
fn window(secs: u64) -> ChronoDuration {
    i64::try_from(secs)
        .ok()
        .and_then(ChronoDuration::try_seconds)
        .unwrap_or(ChronoDuration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn empty_yaml_gives_defaults() {
        let config = PipelineConfig::from_yaml("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.workers, 5);
        assert_eq!(config.watermark_policy, WatermarkPolicy::ContentDriven);
    }

    #[test]
    fn yaml_overrides_and_source_map() {
        let yaml = r#"
workers: 2
watermark_policy: time_driven
seen_set: unbounded
start_after: 2025-05-06T00:00:00Z
extraction:
  max_attempts: 5
sources:
  TechRadar:
    enabled: false
  Hackaday:
    poll_interval: { min_secs: 60, max_secs: 90 }
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.watermark_policy, WatermarkPolicy::TimeDriven);
        assert_eq!(config.seen_set, SeenSetMode::Unbounded);
        assert_eq!(config.extraction.max_attempts, 5);
        assert_eq!(config.extraction.attempt_timeout_secs, 60);
        assert!(!config.sources["TechRadar"].enabled);
        assert_eq!(config.poll_interval_for("Hackaday").max_secs, 90);
        assert_eq!(config.poll_interval_for("Engadget"), PollInterval::default());

        let start = Utc.with_ymd_and_hms(2025, 5, 6, 0, 0, 0).unwrap();
        assert_eq!(config.initial_watermark(Utc::now()), start);
    }

    #[test]
    fn lookback_sets_initial_watermark() {
        let config = PipelineConfig::default();
        let now = Utc.with_ymd_and_hms(2025, 5, 6, 12, 0, 0).unwrap();
        assert_eq!(
            config.initial_watermark(now),
            Utc.with_ymd_and_hms(2025, 5, 5, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            PipelineConfig::from_yaml("workers: 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PipelineConfig::from_yaml("poll_interval: { min_secs: 10, max_secs: 5 }"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            PipelineConfig::from_yaml("workers: [oops"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn oversized_windows_are_rejected() {
        for yaml in [
            "future_tolerance_secs: 100000000000000",
            "lookback_secs: 10000000000000000",
            "lookback_secs: 18446744073709551615",
        ] {
            assert!(
                matches!(PipelineConfig::from_yaml(yaml), Err(ConfigError::Invalid(_))),
                "{yaml} should be rejected"
            );
        }
        let edge = format!("lookback_secs: {MAX_WINDOW_SECS}\nfuture_tolerance_secs: {MAX_WINDOW_SECS}");
        assert!(PipelineConfig::from_yaml(&edge).is_ok());
    }

    #[test]
    fn unvalidated_windows_saturate() {
        let config = PipelineConfig {
            lookback_secs: u64::MAX,
            future_tolerance_secs: u64::MAX,
            ..PipelineConfig::default()
        };
        assert_eq!(config.lookback(), ChronoDuration::MAX);
        assert_eq!(config.initial_watermark(Utc::now()), DateTime::<Utc>::MIN_UTC);
    }
}
