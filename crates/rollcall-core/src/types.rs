use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An enrolled person: display name plus the embedding vectors and image
/// assets captured at enrollment time.
///
/// `embeddings` and `asset_refs` are index-aligned (one embedding per
/// enrollment image) and every vector shares the dimensionality chosen by
/// the embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    pub embeddings: Vec<Vec<f32>>,
    /// Stored enrollment image paths, relative to the data directory.
    pub asset_refs: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Denormalized `{id, name, embeddings}` mirror of an [`Identity`], kept in
/// its own collection so recognition never loads asset references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingIndexEntry {
    pub id: String,
    pub display_name: String,
    pub embeddings: Vec<Vec<f32>>,
}

impl From<&Identity> for EmbeddingIndexEntry {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id.clone(),
            display_name: identity.display_name.clone(),
            embeddings: identity.embeddings.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Excused => "excused",
        }
    }
}

impl std::str::FromStr for AttendanceStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "excused" => Ok(AttendanceStatus::Excused),
            other => Err(crate::Error::Validation(format!(
                "invalid status {other:?}: must be present, absent or excused"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordSource {
    Auto,
    Manual,
}

/// One attendance event.
///
/// `record_id` uniqueness is the only ledger invariant. Duplicates within
/// the same minute are a data-quality condition cleaned up on demand, not
/// prevented at write time. The string fields default to empty when absent
/// on disk so a hand-damaged record surfaces in `deduplicate` instead of
/// poisoning the whole ledger parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(default)]
    pub record_id: String,
    #[serde(default)]
    pub identity_id: String,
    #[serde(default)]
    pub display_name: String,
    pub status: AttendanceStatus,
    pub timestamp: DateTime<Utc>,
    pub source: RecordSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
}

/// System-generated notice kept in the capped alert ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub alert_id: String,
    pub kind: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// Best-match outcome of a recognition scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceMatch {
    pub id: String,
    pub display_name: String,
    pub distance: f32,
}

const ID_SUFFIX_LEN: usize = 6;
const ID_SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Ledger record id: RFC 3339 timestamp plus a short random suffix.
/// Time-ordered, globally unique for practical purposes.
pub(crate) fn ledger_record_id(at: DateTime<Utc>) -> String {
    use rand::Rng;

    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_SUFFIX_CHARSET[rng.gen_range(0..ID_SUFFIX_CHARSET.len())] as char)
        .collect();
    format!("{}_{}", at.to_rfc3339(), suffix)
}
