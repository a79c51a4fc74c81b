//! Identity repository and the soft-delete (trash) workflow.
//!
//! Identities persist in the `identities` collection keyed by id, with a
//! denormalized mirror in `embedding_index`. The two documents are written
//! as two sequential saves under the identities lock — not one transaction;
//! a crash between them leaves the collections diverged until the next
//! corrective write.

use crate::error::{Error, Result};
use crate::store::{collections, CollectionStore, StoreError};
use crate::types::{EmbeddingIndexEntry, Identity};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError};

/// Enrollment captures exactly this many images, one embedding each.
pub const ENROLLMENT_SAMPLES: usize = 5;

pub type IdentityMap = BTreeMap<String, Identity>;
pub type IndexMap = BTreeMap<String, EmbeddingIndexEntry>;

/// Receipt returned by a successful enrollment.
#[derive(Debug, Clone, Serialize)]
pub struct EnrollReceipt {
    pub id: String,
    pub display_name: String,
}

/// The set of enrolled identities.
#[derive(Clone)]
pub struct IdentityRepository {
    store: Arc<CollectionStore>,
    faces_dir: PathBuf,
    trash_dir: PathBuf,
}

impl IdentityRepository {
    pub fn new(store: Arc<CollectionStore>) -> Result<Self> {
        let faces_dir = store.data_dir().join("faces");
        let trash_dir = store.data_dir().join("trash");
        for dir in [&faces_dir, &trash_dir] {
            fs::create_dir_all(dir).map_err(|source| StoreError::io(dir, source))?;
        }
        Ok(Self {
            store,
            faces_dir,
            trash_dir,
        })
    }

    /// Next human-friendly id: the maximum existing numeric id plus one,
    /// zero-padded to three digits, or `"001"` when none exist.
    /// Non-numeric ids are skipped when computing the maximum.
    pub fn next_id(&self) -> Result<String> {
        let identities: IdentityMap = self.store.load(collections::IDENTITIES, BTreeMap::new())?;
        Ok(next_id_in(&identities))
    }

    /// All identities, ordered by id ascending.
    pub fn list(&self) -> Result<Vec<Identity>> {
        let identities: IdentityMap = self.store.load(collections::IDENTITIES, BTreeMap::new())?;
        Ok(identities.into_values().collect())
    }

    pub fn get(&self, id: &str) -> Result<Identity> {
        let identities: IdentityMap = self.store.load(collections::IDENTITIES, BTreeMap::new())?;
        identities
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("identity {id} not found")))
    }

    /// Enroll a new identity from one embedding and one raw image per
    /// sample.
    ///
    /// Image bytes are opaque to the repository — they are stored verbatim
    /// under `faces/` and referenced from the identity record. The id is
    /// allocated and both collection saves happen under the identities
    /// lock, so concurrent enrollments cannot collide on an id.
    pub fn enroll(
        &self,
        display_name: &str,
        embeddings: Vec<Vec<f32>>,
        assets: Vec<Vec<u8>>,
    ) -> Result<EnrollReceipt> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(Error::Validation("display name is required".into()));
        }
        if assets.len() != ENROLLMENT_SAMPLES {
            return Err(Error::Validation(format!(
                "exactly {ENROLLMENT_SAMPLES} images are required, got {}",
                assets.len()
            )));
        }
        if embeddings.len() != assets.len() {
            return Err(Error::Validation(
                "one embedding per enrollment image is required".into(),
            ));
        }
        let dim = embeddings[0].len();
        if dim == 0 || embeddings.iter().any(|e| e.len() != dim) {
            return Err(Error::Validation(
                "embeddings must share one fixed dimensionality".into(),
            ));
        }

        let lock = self.store.lock(collections::IDENTITIES);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut identities: IdentityMap =
            self.store.load(collections::IDENTITIES, BTreeMap::new())?;
        let id = next_id_in(&identities);

        let mut asset_refs = Vec::with_capacity(assets.len());
        for (idx, bytes) in assets.iter().enumerate() {
            let file_name = format!("{id}_{}.jpg", idx + 1);
            let path = self.faces_dir.join(&file_name);
            fs::write(&path, bytes).map_err(|source| StoreError::io(&path, source))?;
            asset_refs.push(format!("faces/{file_name}"));
        }

        let identity = Identity {
            id: id.clone(),
            display_name: display_name.to_string(),
            embeddings,
            asset_refs,
            created_at: Utc::now(),
        };
        identities.insert(id.clone(), identity.clone());
        self.store.save(collections::IDENTITIES, &identities)?;

        // Second save, not a transaction — see module docs.
        let mut index: IndexMap = self
            .store
            .load(collections::EMBEDDING_INDEX, BTreeMap::new())?;
        index.insert(id.clone(), EmbeddingIndexEntry::from(&identity));
        self.store.save(collections::EMBEDDING_INDEX, &index)?;

        tracing::info!(id = %id, name = display_name, "identity enrolled");
        Ok(EnrollReceipt {
            id,
            display_name: display_name.to_string(),
        })
    }

    /// Remove an identity, archiving its assets and record under `trash/`.
    ///
    /// Steps run in a fixed order: assets moved, snapshot written,
    /// repository entry removed, index entry removed. A crash partway
    /// leaves a recoverable partial state instead of losing the identity's
    /// existence. Missing asset files are logged and skipped.
    pub fn delete(&self, id: &str, confirm: bool) -> Result<()> {
        if !confirm {
            return Err(Error::Validation(
                "deletion requires explicit confirmation".into(),
            ));
        }

        let lock = self.store.lock(collections::IDENTITIES);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut identities: IdentityMap =
            self.store.load(collections::IDENTITIES, BTreeMap::new())?;
        let identity = identities
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("identity {id} not found")))?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let snapshot_dir = self.trash_dir.join(format!("{stamp}_{id}"));
        fs::create_dir_all(&snapshot_dir).map_err(|source| StoreError::io(&snapshot_dir, source))?;

        for asset_ref in &identity.asset_refs {
            let from = self.store.data_dir().join(asset_ref);
            let Some(file_name) = from.file_name().map(|n| n.to_owned()) else {
                continue;
            };
            if let Err(err) = fs::rename(&from, snapshot_dir.join(file_name)) {
                tracing::warn!(asset = %from.display(), error = %err, "asset not moved to trash");
            }
        }

        let snapshot_path = snapshot_dir.join("identity_snapshot.json");
        let snapshot = serde_json::to_vec_pretty(&identity).map_err(|source| StoreError::Encode {
            what: "identity snapshot".into(),
            source,
        })?;
        fs::write(&snapshot_path, snapshot)
            .map_err(|source| StoreError::io(&snapshot_path, source))?;

        identities.remove(id);
        self.store.save(collections::IDENTITIES, &identities)?;

        let mut index: IndexMap = self
            .store
            .load(collections::EMBEDDING_INDEX, BTreeMap::new())?;
        if index.remove(id).is_some() {
            self.store.save(collections::EMBEDDING_INDEX, &index)?;
        }

        tracing::info!(id, name = %identity.display_name, trash = %snapshot_dir.display(), "identity deleted");
        Ok(())
    }
}

fn next_id_in(identities: &IdentityMap) -> String {
    match identities
        .keys()
        .filter_map(|id| id.parse::<u64>().ok())
        .max()
    {
        Some(n) => format!("{:03}", n + 1),
        None => "001".to_string(),
    }
}
