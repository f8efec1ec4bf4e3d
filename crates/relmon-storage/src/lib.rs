//! Record/settings store collaborators + HTTP fetch for relmon.
//!
//! The pipeline never touches storage through ambient globals; it takes a
//! [`RecordStore`] / [`SettingsStore`] as an injected dependency, which keeps
//! the whole thing runnable against [`MemoryStore`] in tests.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use relmon_core::TrackedListing;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info_span;
use uuid::Uuid;

/// Settings keys the orchestration layer recognizes.
pub mod settings_keys {
    pub const AUTO_REFRESH_ENABLED: &str = "auto_refresh_enabled";
    pub const REFRESH_INTERVAL_DAYS: &str = "refresh_interval_days";
    pub const LAST_REFRESH: &str = "last_refresh";
    pub const VIEW_MODE: &str = "view_mode";
}

/// Durable storage keyed by listing id. Calls are atomic per-call; the
/// pipeline performs no cross-call transactions.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<TrackedListing>>;

    /// Upsert. A record with a nil id is an insert: the store assigns a
    /// fresh id and returns it. Otherwise the record replaces the stored
    /// one with the same id.
    async fn put(&self, record: TrackedListing) -> Result<Uuid>;

    /// Deleting an unknown id is a no-op.
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// All listings, creation time descending.
    async fn list_all(&self) -> Result<Vec<TrackedListing>>;

    async fn clear(&self) -> Result<()>;
}

/// Scalar key/value configuration consulted by the orchestration layer to
/// decide whether to run a batch — never by the pipeline internals.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str, default: &str) -> Result<String>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

fn sorted_desc(mut listings: Vec<TrackedListing>) -> Vec<TrackedListing> {
    listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    listings
}

/// In-memory store; the test fake for both collaborator traits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    listings: Mutex<Vec<TrackedListing>>,
    settings: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<TrackedListing>> {
        let listings = self.listings.lock().await;
        Ok(listings.iter().find(|l| l.id == id).cloned())
    }

    async fn put(&self, mut record: TrackedListing) -> Result<Uuid> {
        let mut listings = self.listings.lock().await;
        if record.id.is_nil() {
            record.id = Uuid::new_v4();
        }
        let id = record.id;
        match listings.iter_mut().find(|l| l.id == id) {
            Some(slot) => *slot = record,
            None => listings.push(record),
        }
        Ok(id)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let mut listings = self.listings.lock().await;
        listings.retain(|l| l.id != id);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<TrackedListing>> {
        let listings = self.listings.lock().await;
        Ok(sorted_desc(listings.clone()))
    }

    async fn clear(&self) -> Result<()> {
        self.listings.lock().await.clear();
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get(&self, key: &str, default: &str) -> Result<String> {
        let settings = self.settings.lock().await;
        Ok(settings.get(key).cloned().unwrap_or_else(|| default.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut settings = self.settings.lock().await;
        settings.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    listings: Vec<TrackedListing>,
    #[serde(default)]
    settings: BTreeMap<String, String>,
}

/// Durable single-file JSON store. Every mutation is a read-modify-write
/// under one lock, persisted with a temp-file + atomic rename so a crash
/// mid-write never leaves a torn document.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<StoreDocument> {
        if !fs::try_exists(&self.path)
            .await
            .with_context(|| format!("checking store path {}", self.path.display()))?
        {
            return Ok(StoreDocument::default());
        }
        let text = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", self.path.display()))
    }

    async fn save(&self, doc: &StoreDocument) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating store directory {}", parent.display()))?;

        let bytes = serde_json::to_vec_pretty(doc).context("serializing store document")?;
        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp store file {}", temp_path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp store file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp store file {}", temp_path.display()))?;
        drop(file);

        match fs::rename(&temp_path, &self.path).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "atomically renaming {} -> {}",
                        temp_path.display(),
                        self.path.display()
                    )
                })
            }
        }
    }
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn get(&self, id: Uuid) -> Result<Option<TrackedListing>> {
        let _guard = self.lock.lock().await;
        let doc = self.load().await?;
        Ok(doc.listings.into_iter().find(|l| l.id == id))
    }

    async fn put(&self, mut record: TrackedListing) -> Result<Uuid> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        if record.id.is_nil() {
            record.id = Uuid::new_v4();
        }
        let id = record.id;
        match doc.listings.iter_mut().find(|l| l.id == id) {
            Some(slot) => *slot = record,
            None => doc.listings.push(record),
        }
        self.save(&doc).await?;
        Ok(id)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        let before = doc.listings.len();
        doc.listings.retain(|l| l.id != id);
        if doc.listings.len() != before {
            self.save(&doc).await?;
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<TrackedListing>> {
        let _guard = self.lock.lock().await;
        let doc = self.load().await?;
        Ok(sorted_desc(doc.listings))
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        doc.listings.clear();
        self.save(&doc).await
    }
}

#[async_trait]
impl SettingsStore for JsonFileStore {
    async fn get(&self, key: &str, default: &str) -> Result<String> {
        let _guard = self.lock.lock().await;
        let doc = self.load().await?;
        Ok(doc
            .settings
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.load().await?;
        doc.settings.insert(key.to_string(), value.to_string());
        self.save(&doc).await
    }
}

/// Identifying client agent sent with every page request.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("{0}")]
    Request(reqwest::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Request(err)
        }
    }
}

/// Fetch seam: the pipeline talks to this trait so tests can serve canned
/// pages instead of the network.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Single-shot page fetcher. Issues one GET per call and maps transport
/// faults to [`FetchError`]; retry policy belongs to the batch orchestrator,
/// not here.
#[derive(Debug)]
pub struct PageFetcher {
    client: reqwest::Client,
}

impl PageFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let span = info_span!("page_fetch", url);
        let _guard = span.enter();

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();

        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        Ok(resp.text().await?)
    }
}

#[async_trait]
impl Fetcher for PageFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        PageFetcher::fetch(self, url).await
    }
}
