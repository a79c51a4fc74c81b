//! rollcall-core — identity store, recognition matcher, and attendance ledgers.
//!
//! All state lives in named JSON collections managed by the durable
//! collection store. No component keeps a long-lived in-memory copy: every
//! operation reloads its collection(s) from disk, mutates, and writes the
//! whole document back with an atomic replace.

pub mod alerts;
pub mod attendance;
pub mod error;
pub mod identity;
pub mod matcher;
pub mod provider;
pub mod store;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    AlertRecord, AlertSeverity, AttendanceRecord, AttendanceStatus, FaceMatch, Identity,
    RecordSource,
};
