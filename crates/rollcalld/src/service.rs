//! Request-handling layer over the core collections.
//!
//! Each request is independent and short-lived: the handler reloads the
//! collections it needs, mutates, and writes back. The only background
//! activity is the best-effort pattern-shift worker, decoupled from the
//! append path through a bounded channel so a slow or failing check never
//! affects append latency or success.

use chrono::{DateTime, Utc};
use rollcall_core::alerts::AlertLedger;
use rollcall_core::attendance::{AttendanceLedger, RecordPatch};
use rollcall_core::identity::{IdentityRepository, ENROLLMENT_SAMPLES};
use rollcall_core::matcher::RecognitionMatcher;
use rollcall_core::provider::EmbeddingProvider;
use rollcall_core::store::CollectionStore;
use rollcall_core::{AttendanceStatus, Error, RecordSource, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::Config;

const PROBE_QUEUE_DEPTH: usize = 8;

/// Probe sent to the alert worker after a successful append.
struct PatternProbe {
    observed_at: DateTime<Utc>,
}

pub struct Service {
    config: Config,
    identities: IdentityRepository,
    attendance: AttendanceLedger,
    alerts: AlertLedger,
    matcher: RecognitionMatcher,
    provider: Box<dyn EmbeddingProvider>,
    alert_tx: mpsc::Sender<PatternProbe>,
}

impl Service {
    pub fn new(config: Config, provider: Box<dyn EmbeddingProvider>) -> Result<Arc<Self>> {
        let store = Arc::new(CollectionStore::open(&config.data_dir)?);
        let identities = IdentityRepository::new(store.clone())?;
        let attendance = AttendanceLedger::new(store.clone());
        let alerts = AlertLedger::new(store.clone());
        let matcher = RecognitionMatcher::new(store);
        let alert_tx = spawn_alert_worker(alerts.clone());

        Ok(Arc::new(Self {
            config,
            identities,
            attendance,
            alerts,
            matcher,
            provider,
            alert_tx,
        }))
    }

    /// Enroll a new identity from the given images, one embedding each.
    ///
    /// Extraction runs before anything is persisted, so a failed image
    /// (reported with its 1-based index) leaves no side effects.
    pub fn enroll(&self, name: &str, images: Vec<Vec<u8>>) -> Result<Value> {
        if images.len() != ENROLLMENT_SAMPLES {
            return Err(Error::Validation(format!(
                "exactly {ENROLLMENT_SAMPLES} images are required, got {}",
                images.len()
            )));
        }

        let mut embeddings = Vec::with_capacity(images.len());
        for (idx, image) in images.iter().enumerate() {
            let embedding = self
                .provider
                .extract(image)
                .ok_or(Error::ExtractionFailed {
                    image_index: idx + 1,
                })?;
            embeddings.push(embedding);
        }

        let receipt = self.identities.enroll(name, embeddings, images)?;
        Ok(json!({ "id": receipt.id, "display_name": receipt.display_name }))
    }

    pub fn recognize(&self, image: &[u8]) -> Result<Value> {
        let Some(embedding) = self.provider.extract(image) else {
            return Ok(json!({
                "outcome": "no_face",
                "detail": "no usable face detected in image",
            }));
        };
        match self
            .matcher
            .match_embedding(&embedding, self.config.match_threshold)?
        {
            Some(matched) => Ok(json!({ "outcome": "recognized", "match": matched })),
            None => Ok(json!({
                "outcome": "unknown",
                "detail": "face not recognized",
            })),
        }
    }

    /// Multi-subject recognition: one independent match per detected face.
    pub fn recognize_all(&self, image: &[u8]) -> Result<Value> {
        let faces = self.provider.detect_all(image);
        let results = self
            .matcher
            .match_faces(&faces, self.config.match_threshold)?;
        Ok(json!({ "faces": results }))
    }

    /// Automatic present-mark from a recognition hit.
    pub fn mark_attendance(&self, identity_id: &str) -> Result<Value> {
        let record = self.attendance.append(
            identity_id,
            AttendanceStatus::Present,
            None,
            RecordSource::Auto,
        )?;
        self.queue_pattern_probe();
        Ok(json!({ "record": record }))
    }

    pub fn manual_attendance(
        &self,
        identity_id: &str,
        status: &str,
        timestamp: &str,
    ) -> Result<Value> {
        let status: AttendanceStatus = status.parse()?;
        let timestamp = parse_timestamp(timestamp)?;
        let record =
            self.attendance
                .append(identity_id, status, timestamp, RecordSource::Manual)?;
        self.queue_pattern_probe();
        Ok(json!({ "record": record }))
    }

    pub fn list_attendance(&self) -> Result<Value> {
        Ok(json!({ "records": self.attendance.list()? }))
    }

    pub fn update_attendance(
        &self,
        record_id: &str,
        status: &str,
        timestamp: &str,
    ) -> Result<Value> {
        let patch = RecordPatch {
            status: if status.is_empty() {
                None
            } else {
                Some(status.parse()?)
            },
            timestamp: parse_timestamp(timestamp)?,
        };
        let record = self.attendance.update(record_id, patch)?;
        Ok(json!({ "record": record }))
    }

    pub fn delete_attendance(&self, record_id: &str) -> Result<Value> {
        self.attendance.delete(record_id)?;
        Ok(json!({ "record_id": record_id }))
    }

    pub fn clear_attendance(&self) -> Result<Value> {
        Ok(json!({ "removed": self.attendance.delete_all()? }))
    }

    pub fn deduplicate_attendance(&self) -> Result<Value> {
        Ok(json!({ "report": self.attendance.deduplicate()? }))
    }

    pub fn list_identities(&self) -> Result<Value> {
        Ok(json!({ "identities": self.identities.list()? }))
    }

    pub fn delete_identity(&self, identity_id: &str, confirm: bool) -> Result<Value> {
        self.identities.delete(identity_id, confirm)?;
        Ok(json!({ "id": identity_id }))
    }

    pub fn list_alerts(&self) -> Result<Value> {
        Ok(json!({ "alerts": self.alerts.list()? }))
    }

    pub fn status(&self) -> Result<Value> {
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": self.config.data_dir.display().to_string(),
            "match_threshold": self.config.match_threshold,
            "identities": self.identities.list()?.len(),
            "attendance_records": self.attendance.list()?.len(),
        }))
    }

    /// Fire-and-forget: a full queue drops the probe rather than waiting.
    fn queue_pattern_probe(&self) {
        let probe = PatternProbe {
            observed_at: Utc::now(),
        };
        if self.alert_tx.try_send(probe).is_err() {
            tracing::debug!("pattern probe dropped: worker queue full");
        }
    }
}

/// Spawn the pattern-shift worker on a dedicated OS thread.
///
/// The thread drains probes for as long as the service half of the
/// channel is alive. Check failures are logged and swallowed — the
/// triggering append has already succeeded by the time a probe is queued.
fn spawn_alert_worker(alerts: AlertLedger) -> mpsc::Sender<PatternProbe> {
    let (tx, mut rx) = mpsc::channel::<PatternProbe>(PROBE_QUEUE_DEPTH);

    std::thread::Builder::new()
        .name("rollcall-alerts".into())
        .spawn(move || {
            tracing::debug!("alert worker started");
            while let Some(probe) = rx.blocking_recv() {
                match alerts.detect_pattern_shift(probe.observed_at) {
                    Ok(Some(alert)) => {
                        tracing::info!(alert_id = %alert.alert_id, "pattern shift alert raised")
                    }
                    Ok(None) => {}
                    Err(err) => tracing::warn!(error = %err, "pattern shift check failed"),
                }
            }
            tracing::debug!("alert worker exiting");
        })
        .expect("failed to spawn alert worker thread");

    tx
}

fn parse_timestamp(raw: &str) -> Result<Option<DateTime<Utc>>> {
    if raw.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|err| Error::Validation(format!("invalid timestamp {raw:?}: {err}")))
}
