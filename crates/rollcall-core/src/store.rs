//! Durable collection store.
//!
//! One JSON document per named collection, with bounded retries, quarantine
//! recovery for unparseable files, and atomic replace-on-save. The store
//! exclusively owns the collection files; callers never hold a long-lived
//! mutable copy of a collection.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Collection names owned by the store layer.
pub mod collections {
    pub const IDENTITIES: &str = "identities";
    pub const EMBEDDING_INDEX: &str = "embedding_index";
    pub const ATTENDANCE: &str = "attendance";
    pub const ALERTS: &str = "alerts";
}

// --- Named constants ---
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("i/o on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("encoding {what}: {source}")]
    Encode {
        what: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Read/write primitive for named JSON collections.
///
/// Every `load` is a fresh deserialization and every `save` is a
/// full-collection serialization. A `load` immediately following a
/// successful `save` observes exactly the saved value.
pub struct CollectionStore {
    data_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CollectionStore {
    /// Open a store rooted at `data_dir`, creating the directory if needed.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir).map_err(|source| StoreError::io(&data_dir, source))?;
        Ok(Self {
            data_dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.data_dir.join(format!("{collection}.json"))
    }

    /// Mutex guarding read-modify-write sections on one collection.
    ///
    /// In-process only — a second process writing the same files is not
    /// synchronized. An operation touching both the identities and the
    /// embedding index collections takes the identities lock and holds it
    /// across both saves.
    pub fn lock(&self, collection: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(collection.to_string()).or_default().clone()
    }

    /// Load a collection, returning `default` when the backing file does
    /// not exist (without creating it).
    ///
    /// An unparseable file is retried three times with a short backoff,
    /// then copied to a timestamped quarantine path and replaced with
    /// `default`. A read failure is retried the same way and then
    /// propagated, fatal for the current operation.
    pub fn load<T>(&self, collection: &str, default: T) -> Result<T, StoreError>
    where
        T: DeserializeOwned + Serialize,
    {
        let path = self.collection_path(collection);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!(collection, "collection file missing, using default");
                    return Ok(default);
                }
                Err(err) => {
                    tracing::error!(collection, attempt, error = %err, "collection read failed");
                    if attempt >= RETRY_ATTEMPTS {
                        return Err(StoreError::io(path, err));
                    }
                    std::thread::sleep(RETRY_BACKOFF);
                    continue;
                }
            };
            match serde_json::from_slice(&bytes) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::error!(collection, attempt, error = %err, "collection parse failed");
                    if attempt >= RETRY_ATTEMPTS {
                        self.quarantine(collection, &path);
                        self.write_document(collection, &path, &default)?;
                        tracing::warn!(collection, "collection reset to default value");
                        return Ok(default);
                    }
                    std::thread::sleep(RETRY_BACKOFF);
                }
            }
        }
    }

    /// Atomically replace `collection` with `value`.
    ///
    /// The document is serialized to a temporary file in the same directory
    /// and renamed over the target, so a crash mid-write leaves the
    /// committed file untouched. Retries three times, then propagates the
    /// failure.
    pub fn save<T: Serialize>(&self, collection: &str, value: &T) -> Result<(), StoreError> {
        let path = self.collection_path(collection);
        self.write_document(collection, &path, value)
    }

    fn write_document<T: Serialize>(
        &self,
        collection: &str,
        path: &Path,
        value: &T,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Encode {
            what: collection.to_string(),
            source,
        })?;
        let tmp = self.data_dir.join(format!("{collection}.json.tmp"));
        let mut attempt = 0;
        loop {
            attempt += 1;
            match fs::write(&tmp, &bytes).and_then(|_| fs::rename(&tmp, path)) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::error!(collection, attempt, error = %err, "collection write failed");
                    if attempt >= RETRY_ATTEMPTS {
                        let _ = fs::remove_file(&tmp);
                        return Err(StoreError::io(path, err));
                    }
                    std::thread::sleep(RETRY_BACKOFF);
                }
            }
        }
    }

    /// Copy an unparseable collection file alongside itself under a
    /// timestamped name and leave it there for operator inspection.
    fn quarantine(&self, collection: &str, path: &Path) {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let backup = self
            .data_dir
            .join(format!("{collection}.corrupted.{stamp}.json"));
        match fs::copy(path, &backup) {
            Ok(_) => {
                tracing::warn!(collection, backup = %backup.display(), "quarantined corrupted collection file")
            }
            Err(err) => {
                tracing::error!(collection, error = %err, "failed to quarantine corrupted collection file")
            }
        }
    }
}
