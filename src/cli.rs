//! Command-line interface definitions for Awful News Ingest.
//!
//! Flags override values from the YAML config file. Most can also be given
//! through environment variables.

use clap::Parser;

/// Command-line arguments for the ingestion daemon.
///
/// # Examples
///
/// ```sh
/// # Live ingestion with defaults, articles as JSON lines on stdout
/// awful_news_ingest
///
/// # Custom config and cache, only articles published from now on
/// awful_news_ingest -c ./ingest.yaml -d ./articles --after now
///
/// # Replay a cache directory without touching the network
/// awful_news_ingest -d ./articles --replay
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a YAML config file
    #[arg(short, long, env = "INGEST_CONFIG")]
    pub config: Option<String>,

    /// Durable cache directory
    #[arg(short = 'd', long, env = "INGEST_CACHE_DIR")]
    pub cache_dir: Option<String>,

    /// Initial watermark: an RFC 3339 instant, or `now`
    #[arg(long)]
    pub after: Option<String>,

    /// Deliver cached articles instead of polling feeds
    #[arg(long)]
    pub replay: bool,

    /// Extraction worker count
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Output queue capacity
    #[arg(long)]
    pub output_queue_capacity: Option<usize>,

    /// Page loader: `chrome` or `http`
    #[arg(long, value_parser = ["chrome", "http"])]
    pub loader: Option<String>,
}
