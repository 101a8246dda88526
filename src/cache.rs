//! Durable Cache: every extracted article, keyed by id.
//!
//! # Contract
//!
//! - `put` is idempotent: storing an id that is already present is a silent
//!   no-op reported as [`PutOutcome::Duplicate`]
//! - concurrent `put`s of the same id leave exactly one stored value
//! - `get_all` returns a snapshot in a stable order
//!
//! # Stores
//!
//! | Store | Backing | Order of `get_all` |
//! |-------|---------|--------------------|
//! | [`DirStore`] | one `<id>.json` file per article | file name |
//! | [`MemoryStore`] | `HashMap` behind a lock | insertion |
//!
//! [`DirStore`] writes each article to a private temp file and publishes it
//! with a hard link. The link either creates `<id>.json` with complete
//! contents or fails with `AlreadyExists`, so readers never see a partial
//! file and the filesystem arbitrates racing writers.

use crate::error::PersistError;
use crate::models::ExtractedArticle;
use crate::utils::ensure_writable_dir;
use async_trait::async_trait;
use rand::{Rng, rng};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

const EXTENSION: &str = "json";

/// Result of a successful [`ArticleStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    /// The id was already stored; nothing was written.
    Duplicate,
}

/// Storage for extracted articles shared by all workers.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Whether an article with `id` has been stored.
    async fn has(&self, id: &str) -> bool;

    /// Store `article` unless its id is already present.
    async fn put(&self, article: &ExtractedArticle) -> Result<PutOutcome, PersistError>;

    /// Every stored article.
    async fn get_all(&self) -> Result<Vec<ExtractedArticle>, PersistError>;
}

/// Directory-backed store, one JSON file per article.
#[derive(Debug)]
pub struct DirStore {
    dir: PathBuf,
    index: RwLock<HashSet<String>>,
}

impl DirStore {
    /// Open (creating if needed) a cache directory and index its contents.
    ///
    /// # Errors
    ///
    /// [`PersistError::Io`] when the directory cannot be created, written or
    /// listed.
    #[instrument(level = "info", skip_all, fields(dir = %dir.as_ref().display()))]
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, PersistError> {
        let dir = dir.as_ref().to_path_buf();
        ensure_writable_dir(&dir).await?;

        let ids: HashSet<String> = list_entries(&dir)
            .await?
            .into_iter()
            .filter_map(|path| id_of(&path))
            .collect();
        info!(cached = ids.len(), "Rehydrated cache index");

        Ok(Self {
            dir,
            index: RwLock::new(ids),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.read().await.is_empty()
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{EXTENSION}"))
    }

    /// Publish `bytes` as `<id>.json`, failing with `Duplicate` if it exists.
    async fn write_exclusive(&self, id: &str, bytes: &[u8]) -> Result<(), PersistError> {
        let suffix: u64 = rng().random();
        let tmp = self.dir.join(format!(".{id}.{suffix:016x}.tmp"));
        write_temp(&tmp, bytes).await?;

        let linked = fs::hard_link(&tmp, self.path_for(id)).await;
        if let Err(e) = fs::remove_file(&tmp).await {
            debug!(tmp = %tmp.display(), error = %e, "Failed to remove temp file");
        }
        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(PersistError::Duplicate(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ArticleStore for DirStore {
    async fn has(&self, id: &str) -> bool {
        self.index.read().await.contains(id)
    }

    #[instrument(level = "debug", skip_all, fields(id = %article.id()))]
    async fn put(&self, article: &ExtractedArticle) -> Result<PutOutcome, PersistError> {
        let id = article.id();
        if self.has(id).await {
            return Ok(PutOutcome::Duplicate);
        }

        let bytes = serde_json::to_vec_pretty(article)?;
        match self.write_exclusive(id, &bytes).await {
            Ok(()) => {
                self.index.write().await.insert(id.to_string());
                debug!(bytes = bytes.len(), "Cached article");
                Ok(PutOutcome::Inserted)
            }
            Err(PersistError::Duplicate(_)) => {
                self.index.write().await.insert(id.to_string());
                Ok(PutOutcome::Duplicate)
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(level = "info", skip_all, fields(dir = %self.dir.display()))]
    async fn get_all(&self) -> Result<Vec<ExtractedArticle>, PersistError> {
        let mut paths = list_entries(&self.dir).await?;
        paths.sort();

        let mut articles = Vec::with_capacity(paths.len());
        for path in paths {
            let raw = fs::read(&path).await?;
            match serde_json::from_slice::<ExtractedArticle>(&raw) {
                Ok(article) => articles.push(article),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable cache entry"),
            }
        }
        info!(count = articles.len(), "Loaded cached articles");
        Ok(articles)
    }
}

/// Write `bytes` to `tmp`, removing whatever was written if the write fails.
async fn write_temp(tmp: &Path, bytes: &[u8]) -> io::Result<()> {
    let written = fs::write(tmp, bytes).await;
    if written.is_err() {
        if let Err(e) = fs::remove_file(tmp).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(tmp = %tmp.display(), error = %e, "Failed to remove partial temp file");
            }
        }
    }
    written
}

/// Visible `*.json` files directly under `dir`.
async fn list_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_none_or(|n| n.starts_with('.'));
        let is_json = path.extension().and_then(|e| e.to_str()) == Some(EXTENSION);
        if !hidden && is_json && entry.file_type().await?.is_file() {
            paths.push(path);
        }
    }
    Ok(paths)
}

fn id_of(path: &Path) -> Option<String> {
    path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
}

/// In-process store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    articles: HashMap<String, ExtractedArticle>,
    order: Vec<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.order.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.order.is_empty()
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn has(&self, id: &str) -> bool {
        self.inner.read().await.articles.contains_key(id)
    }

    async fn put(&self, article: &ExtractedArticle) -> Result<PutOutcome, PersistError> {
        let mut inner = self.inner.write().await;
        if inner.articles.contains_key(article.id()) {
            return Ok(PutOutcome::Duplicate);
        }
        inner.order.push(article.id().to_string());
        inner
            .articles
            .insert(article.id().to_string(), article.clone());
        Ok(PutOutcome::Inserted)
    }

    async fn get_all(&self) -> Result<Vec<ExtractedArticle>, PersistError> {
        let inner = self.inner.read().await;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.articles.get(id).cloned())
            .collect())
    }
}
