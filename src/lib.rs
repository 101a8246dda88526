//! # Awful News Ingest
//!
//! Continuous ingestion of tech-news feeds into clean, deduplicated,
//! fully extracted articles for downstream analysis and speech synthesis.
//!
//! ## Architecture
//!
//! ```text
//! SourceAdapter ──> Normalizer ──> Deduplicator ──> WorkerPool ──> ArticleSink
//!   (per adapter task, feed order)                  (Extractor)     │
//!                                                                   ├─> ArticleStore (durable cache)
//!                                                                   └─> OutputQueue ──> consumer
//! ```
//!
//! 1. **Polling**: one [`scheduler::AdapterTask`] per provider fetches its feed
//!    on a randomized interval
//! 2. **Admission**: records are normalized and admitted past a per-adapter
//!    watermark and seen-set
//! 3. **Extraction**: a fixed pool loads each article page (headless Chromium
//!    or plain HTTP) under a retry policy and pulls out the body text
//! 4. **Delivery**: each article is cached once by id and, if new, enqueued
//!    for the consumer
//!
//! A [`pipeline::Pipeline`] can also replay an existing cache directory into
//! the output queue without touching the network.

pub mod adapters;
pub mod cache;
pub mod config;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod scheduler;
pub mod utils;

pub use config::PipelineConfig;
pub use models::{ExtractedArticle, FeedRecord};
pub use pipeline::Pipeline;
