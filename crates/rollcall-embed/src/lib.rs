//! Built-in embedding provider.
//!
//! Produces a 128-dimensional appearance embedding from gradient
//! orientation histograms over a cell grid plus a global intensity
//! histogram, L2-normalized. Deterministic and CPU-cheap; model-backed
//! providers plug in at the same [`EmbeddingProvider`] seam without
//! touching the store or matcher.

use image::imageops::FilterType;
use image::GrayImage;
use rollcall_core::provider::{DetectedFace, EmbeddingProvider, FaceBounds};

/// Every embedding this provider emits has this many dimensions.
pub const EMBEDDING_DIM: usize = 128;

// --- Named constants ---
const PATCH_SIZE: u32 = 64;
const CELL_SIZE: u32 = 16;
const CELLS_PER_SIDE: u32 = PATCH_SIZE / CELL_SIZE; // 4x4 grid
const ORIENTATION_BINS: usize = 6; // 16 cells x 6 bins = 96 dims
const INTENSITY_BINS: usize = 32; // + 32 dims = 128
/// Minimum grayscale standard deviation for an image to count as a face
/// candidate; flat or near-flat frames are rejected as "no usable face".
const MIN_CONTRAST: f64 = 4.0;

/// Gradient-histogram appearance embedder.
#[derive(Debug, Default, Clone, Copy)]
pub struct GradientEmbedder;

impl GradientEmbedder {
    pub fn new() -> Self {
        Self
    }

    fn decode(&self, image: &[u8]) -> Option<GrayImage> {
        match image::load_from_memory(image) {
            Ok(decoded) => Some(decoded.to_luma8()),
            Err(err) => {
                tracing::warn!(error = %err, "query image failed to decode");
                None
            }
        }
    }
}

impl EmbeddingProvider for GradientEmbedder {
    fn extract(&self, image: &[u8]) -> Option<Vec<f32>> {
        let gray = self.decode(image)?;
        if !has_signal(&gray) {
            tracing::debug!("image rejected: below contrast floor");
            return None;
        }
        Some(embed(&gray))
    }

    fn detect_all(&self, image: &[u8]) -> Vec<DetectedFace> {
        // Single-region detector: the whole frame is the one candidate.
        let Some(gray) = self.decode(image) else {
            return Vec::new();
        };
        if !has_signal(&gray) {
            return Vec::new();
        }
        let bounds = FaceBounds {
            x: 0.0,
            y: 0.0,
            width: gray.width() as f32,
            height: gray.height() as f32,
        };
        vec![DetectedFace {
            bounds,
            embedding: embed(&gray),
        }]
    }
}

fn has_signal(gray: &GrayImage) -> bool {
    let n = (gray.width() * gray.height()) as f64;
    if n == 0.0 {
        return false;
    }
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for pixel in gray.pixels() {
        let v = pixel.0[0] as f64;
        sum += v;
        sum_sq += v * v;
    }
    let mean = sum / n;
    let variance = (sum_sq / n - mean * mean).max(0.0);
    variance.sqrt() >= MIN_CONTRAST
}

/// Compute the embedding for one grayscale region.
///
/// Layout: 96 gradient-orientation values (4×4 cells × 6 bins, magnitude
/// weighted, unsigned orientation) followed by a 32-bin intensity
/// histogram, the whole vector L2-normalized.
fn embed(gray: &GrayImage) -> Vec<f32> {
    let patch = image::imageops::resize(gray, PATCH_SIZE, PATCH_SIZE, FilterType::Triangle);

    let mut features = vec![0.0f32; EMBEDDING_DIM];
    let (cell_bins, intensity) =
        features.split_at_mut((CELLS_PER_SIDE * CELLS_PER_SIDE) as usize * ORIENTATION_BINS);

    // Central-difference gradients, skipping the one-pixel border.
    for y in 1..PATCH_SIZE - 1 {
        for x in 1..PATCH_SIZE - 1 {
            let gx = patch.get_pixel(x + 1, y).0[0] as f32 - patch.get_pixel(x - 1, y).0[0] as f32;
            let gy = patch.get_pixel(x, y + 1).0[0] as f32 - patch.get_pixel(x, y - 1).0[0] as f32;
            let magnitude = (gx * gx + gy * gy).sqrt();
            if magnitude == 0.0 {
                continue;
            }
            // Unsigned orientation folded into [0, pi).
            let theta = gy.atan2(gx).rem_euclid(std::f32::consts::PI);
            let bin = ((theta / std::f32::consts::PI) * ORIENTATION_BINS as f32) as usize;
            let bin = bin.min(ORIENTATION_BINS - 1);

            let cell = (y / CELL_SIZE) * CELLS_PER_SIDE + (x / CELL_SIZE);
            cell_bins[cell as usize * ORIENTATION_BINS + bin] += magnitude;
        }
    }

    for pixel in patch.pixels() {
        let bin = pixel.0[0] as usize * INTENSITY_BINS / 256;
        intensity[bin] += 1.0;
    }
    let pixel_count = (PATCH_SIZE * PATCH_SIZE) as f32;
    for v in intensity.iter_mut() {
        *v /= pixel_count;
    }

    let norm = features.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in features.iter_mut() {
            *v /= norm;
        }
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Luma};
    use std::io::Cursor;

    fn png_bytes(img: GrayImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn textured_image() -> GrayImage {
        GrayImage::from_fn(96, 96, |x, y| Luma([((x * 7 + y * 13) % 256) as u8]))
    }

    #[test]
    fn test_extract_has_fixed_dimension_and_unit_norm() {
        let bytes = png_bytes(textured_image());
        let embedding = GradientEmbedder::new().extract(&bytes).unwrap();
        assert_eq!(embedding.len(), EMBEDDING_DIM);
        let norm: f32 = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_extract_is_deterministic() {
        let bytes = png_bytes(textured_image());
        let embedder = GradientEmbedder::new();
        assert_eq!(embedder.extract(&bytes), embedder.extract(&bytes));
    }

    #[test]
    fn test_flat_image_is_rejected() {
        let flat = GrayImage::from_pixel(96, 96, Luma([128]));
        let bytes = png_bytes(flat);
        assert!(GradientEmbedder::new().extract(&bytes).is_none());
        assert!(GradientEmbedder::new().detect_all(&bytes).is_empty());
    }

    #[test]
    fn test_undecodable_input_is_rejected() {
        assert!(GradientEmbedder::new().extract(b"not an image").is_none());
    }

    #[test]
    fn test_detect_all_reports_frame_bounds() {
        let bytes = png_bytes(textured_image());
        let faces = GradientEmbedder::new().detect_all(&bytes);
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].bounds.width, 96.0);
        assert_eq!(faces[0].bounds.height, 96.0);
        assert_eq!(faces[0].embedding.len(), EMBEDDING_DIM);
    }

    #[test]
    fn test_distinct_textures_are_separable() {
        let a = png_bytes(textured_image());
        let b = png_bytes(GrayImage::from_fn(96, 96, |x, _| {
            if x % 8 < 4 {
                Luma([0])
            } else {
                Luma([255])
            }
        }));
        let embedder = GradientEmbedder::new();
        let ea = embedder.extract(&a).unwrap();
        let eb = embedder.extract(&b).unwrap();
        let distance = rollcall_core::matcher::cosine_distance(&ea, &eb);
        assert!(distance > 0.01, "distinct textures should not collide");
    }
}
