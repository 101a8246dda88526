//! # Awful News Ingest
//!
//! Long-running daemon that polls tech-news feeds, extracts each new article
//! from its live page and prints every delivered article as one JSON line on
//! stdout. Logs go to stderr.
//!
//! ## Usage
//!
//! ```sh
//! awful_news_ingest -c ./ingest.yaml -d ./articles
//! awful_news_ingest -d ./articles --replay
//! ```
//!
//! ## Lifecycle
//!
//! 1. **Configure**: YAML file (optional) overlaid with CLI flags
//! 2. **Open cache**: create/validate the cache directory and index it
//! 3. **Run**: live polling, or replay of the cache directory
//! 4. **Consume**: pull articles until interrupted (or the replay is drained)
//! 5. **Shutdown**: cancel tasks, close the queue, wait for in-flight work

use awful_news_ingest::adapters::{AdapterRegistry, FeedClient};
use awful_news_ingest::cache::{ArticleStore, DirStore};
use awful_news_ingest::config::{LoaderKind, PipelineConfig};
use awful_news_ingest::extract::loader::{ChromeLoader, HttpLoader, PageLoader};
use awful_news_ingest::pipeline::Pipeline;
use awful_news_ingest::utils::truncate_for_log;
use chrono::{DateTime, Utc};
use clap::Parser;
use std::error::Error;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;

use cli::Cli;

/// Time given to page scripts after navigation before the DOM is read.
const BROWSER_SETTLE: Duration = Duration::from_secs(1);

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init (stderr; stdout carries articles) ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let start_time = std::time::Instant::now();
    info!("awful_news_ingest starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e);
        }
    };

    let store: Arc<dyn ArticleStore> = match DirStore::open(&config.cache_dir).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(
                path = %config.cache_dir,
                error = %e,
                "Cache directory is not usable (fix perms or choose a different path)"
            );
            return Err(e.into());
        }
    };

    let loader: Arc<dyn PageLoader> = match config.loader {
        LoaderKind::Chrome => Arc::new(ChromeLoader::new(BROWSER_SETTLE)),
        LoaderKind::Http => Arc::new(HttpLoader::new(&config.user_agent, config.http_timeout())?),
    };
    let client = FeedClient::new(&config.user_agent, config.http_timeout())?;
    let registry = AdapterRegistry::builtin(&client, &config.sources);
    info!(sources = ?registry.names().collect::<Vec<_>>(), "Sources registered");

    let pipeline = Arc::new(Pipeline::new(config, registry, loader, store));

    let limit = if args.replay {
        let count = pipeline.replay().await?;
        info!(count, "Replay mode: delivering cached articles");
        Some(count)
    } else {
        pipeline.start().await;
        None
    };

    let mut consumer = tokio::spawn(consume(Arc::clone(&pipeline), limit));
    let finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Failed to listen for interrupt");
            }
            info!("Interrupt received");
            None
        }
        delivered = &mut consumer => Some(delivered),
    };

    pipeline.shutdown().await;
    let delivered = match finished {
        Some(delivered) => delivered,
        None => consumer.await,
    }
    .unwrap_or_else(|e| {
        warn!(error = %e, "Consumer task failed");
        0
    });

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        delivered,
        "Execution complete"
    );

    Ok(())
}

/// Load the config file (if any) and apply command-line overrides.
fn build_config(args: &Cli) -> Result<PipelineConfig, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(dir) = &args.cache_dir {
        config.cache_dir = dir.clone();
    }
    if let Some(after) = &args.after {
        config.start_after = Some(parse_after(after)?);
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(capacity) = args.output_queue_capacity {
        config.output_queue_capacity = capacity;
    }
    match args.loader.as_deref() {
        Some("http") => config.loader = LoaderKind::Http,
        Some("chrome") => config.loader = LoaderKind::Chrome,
        _ => {}
    }

    config.validate()?;
    Ok(config)
}

fn parse_after(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    if raw.eq_ignore_ascii_case("now") {
        return Ok(Utc::now());
    }
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

/// Print delivered articles as JSON lines until the queue closes or `limit`
/// articles have been printed. Returns the number printed.
async fn consume(pipeline: Arc<Pipeline>, limit: Option<usize>) -> usize {
    let mut delivered = 0usize;
    while limit.is_none_or(|limit| delivered < limit) {
        let Some(article) = pipeline.get_next_article().await else {
            break;
        };
        let line = match serde_json::to_string(&article) {
            Ok(line) => line,
            Err(e) => {
                error!(id = %article.id(), error = %e, "Failed to serialize article");
                continue;
            }
        };
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{line}").and_then(|_| out.flush()) {
            error!(error = %e, "Failed to write to stdout; stopping consumer");
            break;
        }
        delivered += 1;
        debug!(
            id = %article.id(),
            title = %truncate_for_log(&article.record.title, 80),
            "Delivered article"
        );
    }
    delivered
}
