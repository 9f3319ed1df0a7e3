//! In-memory vector index with brute-force cosine similarity search.
//!
//! The index holds an immutable snapshot behind a read/write lock. Readers
//! clone the snapshot `Arc` and search without holding any lock; writers
//! build a modified snapshot and swap it in, so a document's chunks become
//! visible (or disappear) atomically at the swap, never partially.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// A single ranked passage returned from a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub text: String,
    pub document_id: String,
    pub score: f64,
}

/// One embedded chunk of a document.
#[derive(Debug, Clone)]
pub struct ChunkEntry {
    pub chunk_index: usize,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Fingerprint of the source file at ingestion time, used by reload to
/// detect changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub len: u64,
    pub mtime_secs: i64,
}

/// All indexed state for one document.
#[derive(Debug, Clone)]
pub struct DocumentEntry {
    pub fingerprint: Fingerprint,
    pub chunks: Vec<ChunkEntry>,
}

/// An immutable point-in-time view of the index.
///
/// Documents are keyed by id in a BTreeMap so iteration order is stable,
/// which the ranking tie-break relies on.
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    docs: BTreeMap<String, DocumentEntry>,
}

impl IndexSnapshot {
    pub fn document_count(&self) -> usize {
        self.docs.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.docs.values().map(|d| d.chunks.len()).sum()
    }

    pub fn get(&self, document_id: &str) -> Option<&DocumentEntry> {
        self.docs.get(document_id)
    }

    pub fn documents(&self) -> impl Iterator<Item = (&String, &DocumentEntry)> {
        self.docs.iter()
    }

    /// Rank all chunks against the query vector by cosine similarity.
    ///
    /// Ties break by document id ascending, then chunk index ascending.
    /// Passages scoring below `min_score` are omitted; fewer than `k`
    /// results may be returned.
    pub fn search(&self, query: &[f32], k: usize, min_score: f64) -> Vec<Passage> {
        let mut scored: Vec<(f64, &str, usize, &str)> = Vec::new();
        for (doc_id, entry) in &self.docs {
            for chunk in &entry.chunks {
                let score = cosine_similarity(query, &chunk.embedding);
                if score >= min_score {
                    scored.push((score, doc_id.as_str(), chunk.chunk_index, chunk.text.as_str()));
                }
            }
        }

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(b.1))
                .then_with(|| a.2.cmp(&b.2))
        });
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(score, doc_id, _, text)| Passage {
                text: text.to_string(),
                document_id: doc_id.to_string(),
                score,
            })
            .collect()
    }
}

/// Thread-safe handle over the current snapshot.
#[derive(Debug, Default)]
pub struct VectorIndex {
    snapshot: RwLock<Arc<IndexSnapshot>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(IndexSnapshot::default())),
        }
    }

    /// Current read view. Cheap; the caller searches without blocking
    /// writers.
    pub fn read(&self) -> Arc<IndexSnapshot> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            // A poisoned lock still holds a valid snapshot.
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Insert or replace a document's chunks in one commit.
    pub fn replace_document(&self, document_id: &str, entry: DocumentEntry) {
        self.mutate(|docs| {
            docs.insert(document_id.to_string(), entry);
        });
    }

    /// Remove a document; returns true if it was present.
    pub fn remove_document(&self, document_id: &str) -> bool {
        let mut removed = false;
        self.mutate(|docs| {
            removed = docs.remove(document_id).is_some();
        });
        removed
    }

    fn mutate<F: FnOnce(&mut BTreeMap<String, DocumentEntry>)>(&self, f: F) {
        let mut guard = match self.snapshot.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut docs = guard.docs.clone();
        f(&mut docs);
        *guard = Arc::new(IndexSnapshot { docs });
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude or lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(chunks: Vec<(usize, &str, Vec<f32>)>) -> DocumentEntry {
        DocumentEntry {
            fingerprint: Fingerprint {
                len: 0,
                mtime_secs: 0,
            },
            chunks: chunks
                .into_iter()
                .map(|(chunk_index, text, embedding)| ChunkEntry {
                    chunk_index,
                    text: text.to_string(),
                    embedding,
                })
                .collect(),
        }
    }

    #[test]
    fn test_insert_and_search() {
        let index = VectorIndex::new();
        index.replace_document("a.txt", entry(vec![(0, "alpha", vec![1.0, 0.0])]));
        index.replace_document("b.txt", entry(vec![(0, "beta", vec![0.0, 1.0])]));

        let snapshot = index.read();
        assert_eq!(snapshot.document_count(), 2);

        let hits = snapshot.search(&[1.0, 0.0], 5, 0.0);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document_id, "a.txt");
        assert!((hits[0].score - 1.0).abs() < 1e-9);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_search_empty_index() {
        let index = VectorIndex::new();
        assert!(index.read().search(&[1.0, 0.0], 5, 0.0).is_empty());
    }

    #[test]
    fn test_search_respects_k() {
        let index = VectorIndex::new();
        index.replace_document(
            "doc.txt",
            entry(
                (0..10)
                    .map(|i| (i, "chunk", vec![1.0, 0.0]))
                    .collect::<Vec<_>>(),
            ),
        );
        let hits = index.read().search(&[1.0, 0.0], 3, 0.0);
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_floor_score_filters() {
        let index = VectorIndex::new();
        index.replace_document("a.txt", entry(vec![(0, "close", vec![1.0, 0.0])]));
        index.replace_document("b.txt", entry(vec![(0, "far", vec![-1.0, 0.0])]));
        let hits = index.read().search(&[1.0, 0.0], 5, 0.5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "a.txt");
    }

    #[test]
    fn test_ties_break_by_document_then_chunk() {
        let index = VectorIndex::new();
        // All chunks identical to the query: scores tie exactly.
        index.replace_document(
            "b.txt",
            entry(vec![(0, "b0", vec![1.0, 0.0]), (1, "b1", vec![1.0, 0.0])]),
        );
        index.replace_document("a.txt", entry(vec![(3, "a3", vec![1.0, 0.0])]));

        let hits = index.read().search(&[1.0, 0.0], 10, 0.0);
        let order: Vec<(&str, &str)> = hits
            .iter()
            .map(|p| (p.document_id.as_str(), p.text.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![("a.txt", "a3"), ("b.txt", "b0"), ("b.txt", "b1")]
        );
    }

    #[test]
    fn test_replace_is_atomic_for_readers() {
        let index = VectorIndex::new();
        index.replace_document("doc.txt", entry(vec![(0, "old", vec![1.0, 0.0])]));

        let before = index.read();
        index.replace_document(
            "doc.txt",
            entry(vec![(0, "new0", vec![1.0, 0.0]), (1, "new1", vec![1.0, 0.0])]),
        );
        let after = index.read();

        // The pre-swap snapshot still serves the old view in full.
        assert_eq!(before.get("doc.txt").unwrap().chunks.len(), 1);
        assert_eq!(before.get("doc.txt").unwrap().chunks[0].text, "old");
        // The post-swap snapshot sees all new chunks at once.
        assert_eq!(after.get("doc.txt").unwrap().chunks.len(), 2);
    }

    #[test]
    fn test_remove_document() {
        let index = VectorIndex::new();
        index.replace_document("doc.txt", entry(vec![(0, "x", vec![1.0])]));
        assert!(index.remove_document("doc.txt"));
        assert!(!index.remove_document("doc.txt"));
        assert_eq!(index.read().document_count(), 0);
    }

    #[test]
    fn test_chunk_count() {
        let index = VectorIndex::new();
        index.replace_document(
            "a.txt",
            entry(vec![(0, "x", vec![1.0]), (1, "y", vec![1.0])]),
        );
        index.replace_document("b.txt", entry(vec![(0, "z", vec![1.0])]));
        assert_eq!(index.read().chunk_count(), 3);
    }

    // ---- cosine ----

    #[test]
    fn test_cosine_identical() {
        let a = vec![1.0f32; 64];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let mut a = vec![0.0f32; 8];
        let mut b = vec![0.0f32; 8];
        a[0] = 1.0;
        b[1] = 1.0;
        assert!(cosine_similarity(&a, &b).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0; 4], &[1.0; 4]), 0.0);
    }

    #[test]
    fn test_cosine_length_mismatch() {
        assert_eq!(cosine_similarity(&[1.0; 4], &[1.0; 8]), 0.0);
    }
}
