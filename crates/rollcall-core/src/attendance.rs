//! Append-only attendance ledger.
//!
//! Records are stored in insertion order; timestamp-descending ordering is
//! applied at read time. Same-minute duplicates are allowed at write time
//! and cleaned up by [`AttendanceLedger::deduplicate`].

use crate::error::{Error, Result};
use crate::identity::IdentityMap;
use crate::store::{collections, CollectionStore};
use crate::types::{ledger_record_id, AttendanceRecord, AttendanceStatus, RecordSource};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, PoisonError};

/// Duplicate detection truncates timestamps to this precision.
const DUP_KEY_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Fields that [`AttendanceLedger::update`] may change on a record.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub status: Option<AttendanceStatus>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Removal counts reported by [`AttendanceLedger::deduplicate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupReport {
    /// Later records sharing an earlier record's (identity, minute) key.
    pub duplicates_removed: usize,
    /// Records referencing an identity that no longer exists.
    pub orphans_removed: usize,
    /// Records missing a record id or identity id.
    pub malformed_removed: usize,
}

impl DedupReport {
    pub fn total(&self) -> usize {
        self.duplicates_removed + self.orphans_removed + self.malformed_removed
    }
}

#[derive(Clone)]
pub struct AttendanceLedger {
    store: Arc<CollectionStore>,
}

impl AttendanceLedger {
    pub fn new(store: Arc<CollectionStore>) -> Self {
        Self { store }
    }

    /// Append one attendance event for an existing identity.
    ///
    /// `timestamp` defaults to now; the record id embeds it, so backdated
    /// manual records sort where they belong.
    pub fn append(
        &self,
        identity_id: &str,
        status: AttendanceStatus,
        timestamp: Option<DateTime<Utc>>,
        source: RecordSource,
    ) -> Result<AttendanceRecord> {
        let identities: IdentityMap = self.store.load(collections::IDENTITIES, BTreeMap::new())?;
        let identity = identities
            .get(identity_id)
            .ok_or_else(|| Error::NotFound(format!("identity {identity_id} not found")))?;

        let timestamp = timestamp.unwrap_or_else(Utc::now);
        let record = AttendanceRecord {
            record_id: ledger_record_id(timestamp),
            identity_id: identity_id.to_string(),
            display_name: identity.display_name.clone(),
            status,
            timestamp,
            source,
        };

        let lock = self.store.lock(collections::ATTENDANCE);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<AttendanceRecord> =
            self.store.load(collections::ATTENDANCE, Vec::new())?;
        records.push(record.clone());
        self.store.save(collections::ATTENDANCE, &records)?;

        tracing::info!(
            record_id = %record.record_id,
            identity = identity_id,
            status = status.as_str(),
            "attendance recorded"
        );
        Ok(record)
    }

    /// All records, newest first. The stored order stays insertion order;
    /// sorting is a view concern.
    pub fn list(&self) -> Result<Vec<AttendanceRecord>> {
        let mut records: Vec<AttendanceRecord> =
            self.store.load(collections::ATTENDANCE, Vec::new())?;
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    /// Remove the single record with `record_id`.
    pub fn delete(&self, record_id: &str) -> Result<()> {
        let lock = self.store.lock(collections::ATTENDANCE);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<AttendanceRecord> =
            self.store.load(collections::ATTENDANCE, Vec::new())?;
        let before = records.len();
        records.retain(|r| r.record_id != record_id);
        if records.len() == before {
            return Err(Error::NotFound(format!(
                "attendance record {record_id} not found"
            )));
        }
        self.store.save(collections::ATTENDANCE, &records)?;
        tracing::info!(record_id, "attendance record deleted");
        Ok(())
    }

    /// Irreversibly replace the ledger with an empty sequence. Returns the
    /// number of records dropped.
    pub fn delete_all(&self) -> Result<usize> {
        let lock = self.store.lock(collections::ATTENDANCE);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let records: Vec<AttendanceRecord> =
            self.store.load(collections::ATTENDANCE, Vec::new())?;
        let removed = records.len();
        self.store
            .save(collections::ATTENDANCE, &Vec::<AttendanceRecord>::new())?;
        tracing::warn!(removed, "attendance ledger cleared");
        Ok(removed)
    }

    /// Mutate status and/or timestamp on the first record matching
    /// `record_id`.
    pub fn update(&self, record_id: &str, patch: RecordPatch) -> Result<AttendanceRecord> {
        if patch.status.is_none() && patch.timestamp.is_none() {
            return Err(Error::Validation(
                "nothing to update: provide a status or a timestamp".into(),
            ));
        }

        let lock = self.store.lock(collections::ATTENDANCE);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<AttendanceRecord> =
            self.store.load(collections::ATTENDANCE, Vec::new())?;
        let record = records
            .iter_mut()
            .find(|r| r.record_id == record_id)
            .ok_or_else(|| Error::NotFound(format!("attendance record {record_id} not found")))?;
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(timestamp) = patch.timestamp {
            record.timestamp = timestamp;
        }
        let updated = record.clone();
        self.store.save(collections::ATTENDANCE, &records)?;
        tracing::info!(record_id, "attendance record updated");
        Ok(updated)
    }

    /// Maintenance pass over the whole ledger.
    ///
    /// Scanning in stored order, keeps the first record per
    /// `(identity, minute)` key; separately drops records whose identity no
    /// longer exists and records missing required fields.
    pub fn deduplicate(&self) -> Result<DedupReport> {
        let identities: IdentityMap = self.store.load(collections::IDENTITIES, BTreeMap::new())?;

        let lock = self.store.lock(collections::ATTENDANCE);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let records: Vec<AttendanceRecord> =
            self.store.load(collections::ATTENDANCE, Vec::new())?;

        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut kept = Vec::with_capacity(records.len());
        let mut report = DedupReport::default();
        for record in records {
            if record.record_id.is_empty() || record.identity_id.is_empty() {
                report.malformed_removed += 1;
                continue;
            }
            if !identities.contains_key(&record.identity_id) {
                report.orphans_removed += 1;
                continue;
            }
            let key = (
                record.identity_id.clone(),
                record.timestamp.format(DUP_KEY_FORMAT).to_string(),
            );
            if !seen.insert(key) {
                report.duplicates_removed += 1;
                continue;
            }
            kept.push(record);
        }

        if report.total() > 0 {
            self.store.save(collections::ATTENDANCE, &kept)?;
        }
        tracing::info!(
            duplicates = report.duplicates_removed,
            orphans = report.orphans_removed,
            malformed = report.malformed_removed,
            "attendance ledger deduplicated"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Identity;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn open_ledger() -> (TempDir, Arc<CollectionStore>, AttendanceLedger) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(CollectionStore::open(dir.path()).unwrap());
        let ledger = AttendanceLedger::new(store.clone());
        (dir, store, ledger)
    }

    fn seed_identity(store: &CollectionStore, id: &str, name: &str) {
        let mut identities: IdentityMap = store
            .load(collections::IDENTITIES, IdentityMap::new())
            .unwrap();
        identities.insert(
            id.to_string(),
            Identity {
                id: id.to_string(),
                display_name: name.to_string(),
                embeddings: vec![vec![1.0, 0.0]],
                asset_refs: vec![],
                created_at: Utc::now(),
            },
        );
        store.save(collections::IDENTITIES, &identities).unwrap();
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, s).unwrap()
    }

    #[test]
    fn test_append_requires_existing_identity() {
        let (_dir, _store, ledger) = open_ledger();
        let err = ledger
            .append("001", AttendanceStatus::Present, None, RecordSource::Auto)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_append_denormalizes_display_name() {
        let (_dir, store, ledger) = open_ledger();
        seed_identity(&store, "001", "Ada");
        let record = ledger
            .append("001", AttendanceStatus::Present, None, RecordSource::Auto)
            .unwrap();
        assert_eq!(record.display_name, "Ada");
        assert_eq!(record.source, RecordSource::Auto);
        assert!(record.record_id.starts_with(&record.timestamp.to_rfc3339()));
    }

    #[test]
    fn test_list_is_newest_first() {
        let (_dir, store, ledger) = open_ledger();
        seed_identity(&store, "001", "Ada");
        for hour in [9, 11, 10] {
            ledger
                .append(
                    "001",
                    AttendanceStatus::Present,
                    Some(at(hour, 0, 0)),
                    RecordSource::Manual,
                )
                .unwrap();
        }
        let hours: Vec<u32> = ledger
            .list()
            .unwrap()
            .iter()
            .map(|r| r.timestamp.format("%H").to_string().parse().unwrap())
            .collect();
        assert_eq!(hours, vec![11, 10, 9]);

        // Stored order is untouched by the sorted view.
        let stored: Vec<AttendanceRecord> =
            store.load(collections::ATTENDANCE, Vec::new()).unwrap();
        let stored_hours: Vec<u32> = stored
            .iter()
            .map(|r| r.timestamp.format("%H").to_string().parse().unwrap())
            .collect();
        assert_eq!(stored_hours, vec![9, 11, 10]);
    }

    #[test]
    fn test_delete_removes_single_record() {
        let (_dir, store, ledger) = open_ledger();
        seed_identity(&store, "001", "Ada");
        let a = ledger
            .append("001", AttendanceStatus::Present, None, RecordSource::Auto)
            .unwrap();
        let b = ledger
            .append("001", AttendanceStatus::Absent, None, RecordSource::Manual)
            .unwrap();
        ledger.delete(&a.record_id).unwrap();
        let left = ledger.list().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].record_id, b.record_id);
        assert!(matches!(
            ledger.delete(&a.record_id),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_all_empties_ledger() {
        let (_dir, store, ledger) = open_ledger();
        seed_identity(&store, "001", "Ada");
        for _ in 0..3 {
            ledger
                .append("001", AttendanceStatus::Present, None, RecordSource::Auto)
                .unwrap();
        }
        assert_eq!(ledger.delete_all().unwrap(), 3);
        assert!(ledger.list().unwrap().is_empty());
    }

    #[test]
    fn test_update_patches_status_and_timestamp() {
        let (_dir, store, ledger) = open_ledger();
        seed_identity(&store, "001", "Ada");
        let record = ledger
            .append(
                "001",
                AttendanceStatus::Present,
                Some(at(9, 0, 0)),
                RecordSource::Auto,
            )
            .unwrap();

        let updated = ledger
            .update(
                &record.record_id,
                RecordPatch {
                    status: Some(AttendanceStatus::Excused),
                    timestamp: Some(at(8, 30, 0)),
                },
            )
            .unwrap();
        assert_eq!(updated.status, AttendanceStatus::Excused);
        assert_eq!(updated.timestamp, at(8, 30, 0));

        let stored = ledger.list().unwrap();
        assert_eq!(stored[0].status, AttendanceStatus::Excused);
    }

    #[test]
    fn test_update_rejects_empty_patch() {
        let (_dir, store, ledger) = open_ledger();
        seed_identity(&store, "001", "Ada");
        let record = ledger
            .append("001", AttendanceStatus::Present, None, RecordSource::Auto)
            .unwrap();
        assert!(matches!(
            ledger.update(&record.record_id, RecordPatch::default()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_update_unknown_record_is_not_found() {
        let (_dir, _store, ledger) = open_ledger();
        let patch = RecordPatch {
            status: Some(AttendanceStatus::Absent),
            ..Default::default()
        };
        assert!(matches!(
            ledger.update("nope", patch),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_deduplicate_keeps_first_in_same_minute() {
        let (_dir, store, ledger) = open_ledger();
        seed_identity(&store, "001", "Ada");
        let first = ledger
            .append(
                "001",
                AttendanceStatus::Present,
                Some(at(9, 0, 15)),
                RecordSource::Auto,
            )
            .unwrap();
        ledger
            .append(
                "001",
                AttendanceStatus::Present,
                Some(at(9, 0, 45)),
                RecordSource::Auto,
            )
            .unwrap();
        // Next minute survives.
        ledger
            .append(
                "001",
                AttendanceStatus::Present,
                Some(at(9, 1, 5)),
                RecordSource::Auto,
            )
            .unwrap();

        let report = ledger.deduplicate().unwrap();
        assert_eq!(report.duplicates_removed, 1);
        assert_eq!(report.orphans_removed, 0);

        let left = ledger.list().unwrap();
        assert_eq!(left.len(), 2);
        assert!(left.iter().any(|r| r.record_id == first.record_id));
    }

    #[test]
    fn test_deduplicate_drops_orphans_and_malformed() {
        let (_dir, store, ledger) = open_ledger();
        seed_identity(&store, "001", "Ada");
        ledger
            .append(
                "001",
                AttendanceStatus::Present,
                Some(at(9, 0, 0)),
                RecordSource::Auto,
            )
            .unwrap();

        // One record for a deleted identity and one missing its ids.
        let mut records: Vec<AttendanceRecord> =
            store.load(collections::ATTENDANCE, Vec::new()).unwrap();
        records.push(AttendanceRecord {
            record_id: ledger_record_id(at(10, 0, 0)),
            identity_id: "099".into(),
            display_name: "Ghost".into(),
            status: AttendanceStatus::Present,
            timestamp: at(10, 0, 0),
            source: RecordSource::Manual,
        });
        records.push(AttendanceRecord {
            record_id: String::new(),
            identity_id: String::new(),
            display_name: String::new(),
            status: AttendanceStatus::Absent,
            timestamp: at(11, 0, 0),
            source: RecordSource::Manual,
        });
        store.save(collections::ATTENDANCE, &records).unwrap();

        let report = ledger.deduplicate().unwrap();
        assert_eq!(report.orphans_removed, 1);
        assert_eq!(report.malformed_removed, 1);
        assert_eq!(report.duplicates_removed, 0);
        assert_eq!(ledger.list().unwrap().len(), 1);
    }
}
