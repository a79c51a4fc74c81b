use crate::store::StoreError;
use thiserror::Error;

/// Failure taxonomy shared by every externally-facing operation.
///
/// Collection corruption never appears here — the store quarantines the
/// damaged file and resets it to the default value transparently.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad input shape or count. Recoverable by resubmission.
    #[error("{0}")]
    Validation(String),
    /// Referenced identity or record is absent.
    #[error("{0}")]
    NotFound(String),
    /// No usable face in the given enrollment image (1-based index), so the
    /// caller knows which photo to retake.
    #[error("no usable face detected in image {image_index}")]
    ExtractionFailed { image_index: usize },
    /// Store I/O retries exhausted. Fatal for the current operation only.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    /// Stable category string for API failure payloads.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::ExtractionFailed { .. } => "extraction_failed",
            Error::Store(_) => "storage",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
