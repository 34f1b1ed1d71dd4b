use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info};

use multidrive_common::config::{validate_storage_config_input, StorageConfigDocument};
use multidrive_common::error::{StorageError, StorageResult};

pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

struct CacheEntry {
    loaded_at: Instant,
    doc: Option<Arc<StorageConfigDocument>>,
}

/// Persisted drive records, read from a JSON file and cached briefly.
///
/// A missing path or missing file means "no persisted drives"; a file that
/// exists but does not validate is a configuration error.
pub struct ConfigStore {
    path: Option<PathBuf>,
    ttl: Duration,
    cache: RwLock<Option<CacheEntry>>,
}

impl ConfigStore {
    pub fn new(path: Option<PathBuf>, ttl: Duration) -> Self {
        Self {
            path,
            ttl,
            cache: RwLock::new(None),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, DEFAULT_TTL)
    }

    pub async fn load(&self) -> StorageResult<Option<Arc<StorageConfigDocument>>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };

        if let Some(entry) = self.cache.read().unwrap().as_ref() {
            if entry.loaded_at.elapsed() < self.ttl {
                return Ok(entry.doc.clone());
            }
        }

        let doc = match tokio::fs::read(path).await {
            Ok(raw) => {
                let value: serde_json::Value = serde_json::from_slice(&raw).map_err(|e| {
                    StorageError::config(format!("{}: {}", path.display(), e))
                })?;
                let updated_at = value.get("updatedAt").and_then(|v| v.as_i64()).unwrap_or(0);
                let doc = validate_storage_config_input(&value, None, updated_at).map_err(|e| {
                    StorageError::config(format!("{}: {}", path.display(), e))
                })?;
                Some(Arc::new(doc))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), drives = doc.as_ref().map_or(0, |d| d.drives.len()), "Storage config loaded");
        *self.cache.write().unwrap() = Some(CacheEntry {
            loaded_at: Instant::now(),
            doc: doc.clone(),
        });
        Ok(doc)
    }

    /// Validate `input` against the current document, persist it, and drop
    /// the cache so the next request sees the new records.
    pub async fn save(&self, input: &serde_json::Value) -> StorageResult<Arc<StorageConfigDocument>> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| StorageError::config("no storage config path configured"))?;
        self.invalidate();
        let existing = self.load().await?;
        let doc = validate_storage_config_input(
            input,
            existing.as_deref(),
            Utc::now().timestamp_millis(),
        )?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&doc)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        self.invalidate();
        info!(path = %path.display(), drives = doc.drives.len(), "Storage config saved");
        Ok(Arc::new(doc))
    }

    pub fn invalidate(&self) {
        *self.cache.write().unwrap() = None;
    }
}
