//! Content-addressed raw storage with a JSON metadata index.
//!
//! Files land at `<base>/<hash>.{html,json}`; the index at
//! `<base>/metadata.json` maps hash to record. Both content and index are
//! written through a temp-file + rename step, and the index entry only lands
//! after its content file has been renamed into place, so an index entry
//! always points at a complete file.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::urlkey;

/// Kind of payload stored for a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Html,
    Json,
}

impl ContentKind {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Json => "json",
        }
    }

    /// Classify from a `Content-Type` header value.
    pub fn from_content_type(value: &str) -> Self {
        match value.parse::<mime::Mime>() {
            Ok(parsed) if parsed.subtype() == mime::JSON => Self::Json,
            Ok(parsed) if parsed.suffix() == Some(mime::JSON) => Self::Json,
            _ => Self::Html,
        }
    }
}

/// Index record for one stored payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub url: String,
    pub url_hash: String,
    pub filename: String,
    pub content_type: ContentKind,
    /// Unix seconds.
    pub stored_at: f64,
    pub size_bytes: u64,
    pub status_code: u16,
}

#[derive(Default)]
struct StoreInner {
    index: IndexMap<String, StoredRecord>,
    initialized: bool,
}

/// Storage statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_files: usize,
    pub total_size_bytes: u64,
    pub storage_path: PathBuf,
}

/// Write `bytes` to `path` atomically: temp file in the same directory, then
/// rename over the final path.
async fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = parent.join(format!(
        ".tmp-{:08x}",
        rand::thread_rng().gen::<u32>()
    ));
    tokio::fs::write(&tmp, bytes).await?;
    match tokio::fs::rename(&tmp, path).await {
        Ok(()) => Ok(()),
        Err(error) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            Err(error)
        }
    }
}

/// Idempotent, content-addressed cache of fetched payloads.
pub struct RawStore {
    base: PathBuf,
    inner: Mutex<StoreInner>,
}

impl RawStore {
    /// Lazy: the directory is created and the index loaded on first use.
    pub fn new(base: PathBuf) -> Self {
        Self {
            base,
            inner: Mutex::new(StoreInner::default()),
        }
    }

    fn index_path(&self) -> PathBuf {
        self.base.join("metadata.json")
    }

    fn content_path(&self, filename: &str) -> PathBuf {
        self.base.join(filename)
    }

    async fn ensure_initialized(&self, inner: &mut StoreInner) -> Result<()> {
        if inner.initialized {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.base).await?;
        if let Ok(raw) = tokio::fs::read_to_string(self.index_path()).await {
            if !raw.is_empty() {
                inner.index = serde_json::from_str(&raw)?;
            }
        }
        inner.initialized = true;
        Ok(())
    }

    async fn persist_index(&self, inner: &StoreInner) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&inner.index)?;
        atomic_write(&self.index_path(), &bytes).await?;
        Ok(())
    }

    /// Is a payload for this URL already stored? O(1) index lookup.
    pub async fn exists(&self, url: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        self.ensure_initialized(&mut inner).await?;
        Ok(inner.index.contains_key(&urlkey::storage_key(url)))
    }

    /// Store a payload. Saving the same URL twice overwrites in place.
    #[tracing::instrument(skip(self, content))]
    pub async fn save(
        &self,
        url: &str,
        content: &str,
        kind: ContentKind,
        status_code: u16,
    ) -> Result<StoredRecord> {
        {
            let mut inner = self.inner.lock().await;
            self.ensure_initialized(&mut inner).await?;
        }

        let url_hash = urlkey::storage_key(url);
        let filename = format!("{url_hash}.{}", kind.extension());

        // Content first, outside the index lock; the index entry must never
        // point at a missing file.
        atomic_write(&self.content_path(&filename), content.as_bytes()).await?;

        let record = StoredRecord {
            url: url.to_string(),
            url_hash: url_hash.clone(),
            filename,
            content_type: kind,
            stored_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64(),
            size_bytes: content.len() as u64,
            status_code,
        };

        let mut inner = self.inner.lock().await;
        inner.index.insert(url_hash, record.clone());
        self.persist_index(&inner).await?;
        Ok(record)
    }

    /// Load the stored payload, or `None` when index or file is missing.
    pub async fn load(&self, url: &str) -> Result<Option<String>> {
        let filename = {
            let mut inner = self.inner.lock().await;
            self.ensure_initialized(&mut inner).await?;
            match inner.index.get(&urlkey::storage_key(url)) {
                Some(record) => record.filename.clone(),
                None => return Ok(None),
            }
        };
        Ok(tokio::fs::read_to_string(self.content_path(&filename)).await.ok())
    }

    /// Index record for a stored URL.
    pub async fn get_metadata(&self, url: &str) -> Result<Option<StoredRecord>> {
        let mut inner = self.inner.lock().await;
        self.ensure_initialized(&mut inner).await?;
        Ok(inner.index.get(&urlkey::storage_key(url)).cloned())
    }

    /// Remove a stored payload and its index entry.
    pub async fn delete(&self, url: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        self.ensure_initialized(&mut inner).await?;

        let url_hash = urlkey::storage_key(url);
        let Some(record) = inner.index.shift_remove(&url_hash) else {
            return Ok(false);
        };
        let _ = tokio::fs::remove_file(self.content_path(&record.filename)).await;
        self.persist_index(&inner).await?;
        Ok(true)
    }

    /// All index records, in insertion order.
    pub async fn list_all(&self) -> Result<Vec<StoredRecord>> {
        let mut inner = self.inner.lock().await;
        self.ensure_initialized(&mut inner).await?;
        Ok(inner.index.values().cloned().collect())
    }

    /// Remove every stored payload; returns how many files were deleted.
    pub async fn clear(&self) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        self.ensure_initialized(&mut inner).await?;

        let mut deleted = 0;
        for record in inner.index.values() {
            if tokio::fs::remove_file(self.content_path(&record.filename))
                .await
                .is_ok()
            {
                deleted += 1;
            }
        }
        inner.index.clear();
        self.persist_index(&inner).await?;
        Ok(deleted)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let mut inner = self.inner.lock().await;
        self.ensure_initialized(&mut inner).await?;
        Ok(StoreStats {
            total_files: inner.index.len(),
            total_size_bytes: inner.index.values().map(|r| r.size_bytes).sum(),
            storage_path: self.base.clone(),
        })
    }
}
