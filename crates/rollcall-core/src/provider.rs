//! Boundary to the external embedding provider.
//!
//! The core consumes exactly one capability: image bytes in, fixed-length
//! vector (or "no usable face") out. Detection internals are never
//! inspected; undecodable input counts as no usable face.

use serde::Serialize;

/// Face location within the query image. Derived by the provider and
/// passed through for display only — never used for matching.
#[derive(Debug, Clone, Serialize)]
pub struct FaceBounds {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One detected face: where it is, and its embedding.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bounds: FaceBounds,
    pub embedding: Vec<f32>,
}

/// Embedding extraction capability consumed by the core.
pub trait EmbeddingProvider: Send + Sync {
    /// Extract one embedding from the most prominent face in `image`, or
    /// `None` when no usable face is present.
    fn extract(&self, image: &[u8]) -> Option<Vec<f32>>;

    /// Detect every face in `image` and extract one embedding per face.
    fn detect_all(&self, image: &[u8]) -> Vec<DetectedFace>;
}
