//! Nearest-neighbor recognition over the embedding index.
//!
//! A linear scan — every identity, every stored vector — tracking the
//! single global minimum cosine distance. At the hundreds-of-identities
//! scale this system targets, the full scan stays well under a
//! millisecond; there is deliberately no approximate index.

use crate::error::Result;
use crate::identity::{IdentityMap, IndexMap};
use crate::provider::{DetectedFace, FaceBounds};
use crate::store::{collections, CollectionStore};
use crate::types::{EmbeddingIndexEntry, FaceMatch};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Cosine distance `1 − cos(a, b)`, in [0, 2].
///
/// A zero-norm operand yields the maximal "unrelated" distance of 1.0,
/// so a degenerate vector can never win a match.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        1.0 - dot / denom
    } else {
        1.0
    }
}

/// Per-face outcome of a multi-subject scan.
#[derive(Debug, Clone, Serialize)]
pub struct SubjectMatch {
    pub bounds: FaceBounds,
    pub matched: Option<FaceMatch>,
}

#[derive(Clone)]
pub struct RecognitionMatcher {
    store: Arc<CollectionStore>,
}

impl RecognitionMatcher {
    pub fn new(store: Arc<CollectionStore>) -> Self {
        Self { store }
    }

    /// Match one query embedding against every enrolled identity.
    ///
    /// The global minimum is tracked under strict `<`, so the
    /// first-encountered minimum wins on exact ties (entries are scanned in
    /// ascending id order). The winner is returned only when its distance
    /// is strictly below `threshold`.
    pub fn match_embedding(&self, query: &[f32], threshold: f32) -> Result<Option<FaceMatch>> {
        let entries = self.scan_entries()?;
        Ok(best_match(&entries, query, threshold))
    }

    /// Multi-subject variant: each detected face is matched independently;
    /// bounding boxes pass through untouched for display.
    pub fn match_faces(&self, faces: &[DetectedFace], threshold: f32) -> Result<Vec<SubjectMatch>> {
        let entries = self.scan_entries()?;
        Ok(faces
            .iter()
            .map(|face| SubjectMatch {
                bounds: face.bounds.clone(),
                matched: best_match(&entries, &face.embedding, threshold),
            })
            .collect())
    }

    /// Entries to scan: the denormalized index, or an equivalent view
    /// derived from the identities collection when the index is empty.
    fn scan_entries(&self) -> Result<Vec<EmbeddingIndexEntry>> {
        let index: IndexMap = self
            .store
            .load(collections::EMBEDDING_INDEX, BTreeMap::new())?;
        if !index.is_empty() {
            return Ok(index.into_values().collect());
        }
        let identities: IdentityMap = self.store.load(collections::IDENTITIES, BTreeMap::new())?;
        Ok(identities.values().map(EmbeddingIndexEntry::from).collect())
    }
}

fn best_match(
    entries: &[EmbeddingIndexEntry],
    query: &[f32],
    threshold: f32,
) -> Option<FaceMatch> {
    let mut best: Option<(f32, &EmbeddingIndexEntry)> = None;
    for entry in entries {
        for stored in &entry.embeddings {
            let distance = cosine_distance(query, stored);
            if best.as_ref().map_or(true, |(d, _)| distance < *d) {
                best = Some((distance, entry));
            }
        }
    }
    match best {
        Some((distance, entry)) if distance < threshold => Some(FaceMatch {
            id: entry.id.clone(),
            display_name: entry.display_name.clone(),
            distance,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Identity;
    use chrono::Utc;
    use tempfile::TempDir;

    fn entry(id: &str, name: &str, embeddings: Vec<Vec<f32>>) -> EmbeddingIndexEntry {
        EmbeddingIndexEntry {
            id: id.to_string(),
            display_name: name.to_string(),
            embeddings,
        }
    }

    fn open_matcher() -> (TempDir, Arc<CollectionStore>, RecognitionMatcher) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(CollectionStore::open(dir.path()).unwrap());
        let matcher = RecognitionMatcher::new(store.clone());
        (dir, store, matcher)
    }

    fn save_index(store: &CollectionStore, entries: Vec<EmbeddingIndexEntry>) {
        let map: IndexMap = entries.into_iter().map(|e| (e.id.clone(), e)).collect();
        store.save(collections::EMBEDDING_INDEX, &map).unwrap();
    }

    #[test]
    fn test_cosine_distance_identical_is_zero() {
        let v = vec![0.3, 0.4, 0.5];
        assert!(cosine_distance(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_negation_is_two() {
        let v = vec![1.0, -2.0, 3.0];
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        assert!((cosine_distance(&v, &neg) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_zero_vector_is_one() {
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_distance(&[1.0, 0.0], &[0.0, 0.0]), 1.0);
        assert_eq!(cosine_distance(&[0.0], &[0.0]), 1.0);
    }

    #[test]
    fn test_match_returns_closest_below_threshold() {
        let (_dir, store, matcher) = open_matcher();
        // "001" sits at distance 0.10 from the query (cosine 0.9), the
        // rest are well past 0.5.
        save_index(
            &store,
            vec![
                entry("001", "near", vec![vec![0.9, 0.43589, 0.0]]),
                entry("002", "far", vec![vec![0.0, 1.0, 0.0]]),
                entry("003", "farther", vec![vec![0.0, 0.0, 1.0]]),
            ],
        );
        let query = [1.0, 0.0, 0.0];

        let matched = matcher.match_embedding(&query, 0.25).unwrap().unwrap();
        assert_eq!(matched.id, "001");
        assert_eq!(matched.display_name, "near");
        assert!((matched.distance - 0.10).abs() < 1e-4);

        // Same data, tighter threshold: no match.
        assert!(matcher.match_embedding(&query, 0.05).unwrap().is_none());
    }

    #[test]
    fn test_match_empty_collections_is_no_match() {
        let (_dir, _store, matcher) = open_matcher();
        assert!(matcher.match_embedding(&[1.0, 0.0], 0.6).unwrap().is_none());
    }

    #[test]
    fn test_match_falls_back_to_identities_when_index_empty() {
        let (_dir, store, matcher) = open_matcher();
        let mut identities = IdentityMap::new();
        identities.insert(
            "007".to_string(),
            Identity {
                id: "007".into(),
                display_name: "Fallback".into(),
                embeddings: vec![vec![1.0, 0.0]],
                asset_refs: vec!["faces/007_1.jpg".into()],
                created_at: Utc::now(),
            },
        );
        store.save(collections::IDENTITIES, &identities).unwrap();

        let matched = matcher.match_embedding(&[1.0, 0.0], 0.5).unwrap().unwrap();
        assert_eq!(matched.id, "007");
        assert_eq!(matched.display_name, "Fallback");
    }

    #[test]
    fn test_exact_tie_keeps_first_encountered() {
        let (_dir, store, matcher) = open_matcher();
        let shared = vec![0.6, 0.8];
        save_index(
            &store,
            vec![
                entry("001", "first", vec![shared.clone()]),
                entry("002", "second", vec![shared]),
            ],
        );
        let matched = matcher.match_embedding(&[0.6, 0.8], 0.5).unwrap().unwrap();
        assert_eq!(matched.id, "001");
    }

    #[test]
    fn test_degenerate_stored_vector_never_matches() {
        let (_dir, store, matcher) = open_matcher();
        save_index(&store, vec![entry("001", "zeroed", vec![vec![0.0, 0.0]])]);
        assert!(matcher.match_embedding(&[1.0, 0.0], 0.99).unwrap().is_none());
    }

    #[test]
    fn test_match_faces_is_per_face_independent() {
        let (_dir, store, matcher) = open_matcher();
        save_index(&store, vec![entry("001", "Ada", vec![vec![1.0, 0.0]])]);
        let bounds = FaceBounds {
            x: 10.0,
            y: 20.0,
            width: 64.0,
            height: 64.0,
        };
        let faces = vec![
            DetectedFace {
                bounds: bounds.clone(),
                embedding: vec![1.0, 0.0],
            },
            DetectedFace {
                bounds: bounds.clone(),
                embedding: vec![0.0, 1.0],
            },
        ];
        let results = matcher.match_faces(&faces, 0.5).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].matched.as_ref().unwrap().id, "001");
        assert!(results[1].matched.is_none());
        assert_eq!(results[1].bounds.x, 10.0);
    }
}
