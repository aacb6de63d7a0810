//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait defines every storage operation the chat
//! pipeline needs, enabling pluggable backends (SQLite on disk, in-memory
//! for tests).
//!
//! # Retrieval contract
//!
//! [`query`](VectorIndex::query) ranks entries by cosine similarity
//! ([`cosine_similarity`](crate::embedding::cosine_similarity)), highest
//! first. Equal scores keep insertion order: every entry gets a sequence
//! number when first inserted, and re-upserting the same chunk keeps it.
//! [`rank`] implements this ordering so every backend agrees.
//!
//! Every stored vector must have the query's dimensionality. A mismatch
//! means the embedding model changed under a persisted collection, and
//! queries fail instead of scoring every entry as `0.0`.

pub mod memory;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, IndexEntry, ScoredChunk};

/// Abstract vector index, partitioned into named collections.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorIndex::upsert) | Store or replace one entry |
/// | [`upsert_batch`](VectorIndex::upsert_batch) | All-or-nothing batch upsert |
/// | [`replace_collection`](VectorIndex::replace_collection) | Atomically swap a collection's contents |
/// | [`query`](VectorIndex::query) | Top-k cosine similarity search |
/// | [`count`](VectorIndex::count) | Number of entries in a collection |
/// | [`collections`](VectorIndex::collections) | Names of non-empty collections |
/// | [`delete_collection`](VectorIndex::delete_collection) | Drop a collection |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Store or replace the entry keyed by `chunk.id` in `collection`.
    async fn upsert(&self, collection: &str, chunk: &Chunk, vector: &[f32]) -> Result<()> {
        let entry = IndexEntry {
            chunk: chunk.clone(),
            vector: vector.to_vec(),
        };
        self.upsert_batch(collection, std::slice::from_ref(&entry))
            .await
    }

    /// Upsert many entries; either all are written or none are.
    async fn upsert_batch(&self, collection: &str, entries: &[IndexEntry]) -> Result<()>;

    /// Replace every entry in `collection` with `entries`, atomically.
    async fn replace_collection(&self, collection: &str, entries: &[IndexEntry]) -> Result<()>;

    /// Return up to `k` entries most similar to `vector`.
    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;

    async fn count(&self, collection: &str) -> Result<usize>;

    async fn collections(&self) -> Result<Vec<String>>;

    async fn delete_collection(&self, collection: &str) -> Result<()>;
}

/// Reject `k == 0` before touching storage.
pub fn check_k(k: usize) -> Result<()> {
    if k == 0 {
        bail!("k must be >= 1");
    }
    Ok(())
}

/// Fail when a stored vector's dimensionality differs from the query's.
pub fn check_dims(collection: &str, stored: usize, query: usize) -> Result<()> {
    if stored != query {
        bail!(
            "dimension mismatch in collection '{}': stored vectors have {} dims, query has {}",
            collection,
            stored,
            query
        );
    }
    Ok(())
}

/// Score `(seq, chunk, vector)` rows against `query` and keep the top `k`.
///
/// Sorted by descending similarity, ties broken by ascending `seq`.
/// Errors if any row's vector length differs from `query`.
pub fn rank<I>(collection: &str, query: &[f32], rows: I, k: usize) -> Result<Vec<ScoredChunk>>
where
    I: IntoIterator<Item = (i64, Chunk, Vec<f32>)>,
{
    let mut scored: Vec<(i64, ScoredChunk)> = Vec::new();
    for (seq, chunk, vector) in rows {
        check_dims(collection, vector.len(), query.len())?;
        let score = cosine_similarity(query, &vector);
        scored.push((seq, ScoredChunk { chunk, score }));
    }

    scored.sort_by(|(seq_a, a), (seq_b, b)| b.score.total_cmp(&a.score).then(seq_a.cmp(seq_b)));
    scored.truncate(k);
    Ok(scored.into_iter().map(|(_, s)| s).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::content_id;

    fn chunk(text: &str) -> Chunk {
        Chunk {
            id: content_id(text),
            document: "doc.pdf".to_string(),
            page: 1,
            chunk_index: 0,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_rank_orders_by_score_then_seq() {
        let rows = vec![
            (0, chunk("a"), vec![1.0, 0.0]),
            (1, chunk("b"), vec![0.0, 1.0]),
            (2, chunk("c"), vec![1.0, 0.0]),
        ];
        let ranked = rank("c", &[1.0, 0.0], rows, 3).unwrap();
        let texts: Vec<&str> = ranked.iter().map(|s| s.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_rank_truncates_to_k() {
        let rows = (0..5).map(|i| (i, chunk(&i.to_string()), vec![1.0, i as f32]));
        assert_eq!(rank("c", &[1.0, 0.0], rows, 2).unwrap().len(), 2);
    }

    #[test]
    fn test_rank_rejects_dimension_mismatch() {
        let rows = vec![(0, chunk("a"), vec![1.0, 0.0, 0.0])];
        let err = rank("docs", &[1.0, 0.0], rows, 1).unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[test]
    fn test_rank_with_nan_score_does_not_panic() {
        let rows = vec![
            (0, chunk("a"), vec![f32::NAN, 0.0]),
            (1, chunk("b"), vec![1.0, 0.0]),
            (2, chunk("c"), vec![0.5, 0.5]),
        ];
        let ranked = rank("c", &[1.0, 0.0], rows, 3).unwrap();
        assert_eq!(ranked.len(), 3);
        let finite: Vec<&str> = ranked
            .iter()
            .filter(|s| !s.score.is_nan())
            .map(|s| s.chunk.text.as_str())
            .collect();
        assert_eq!(finite, vec!["b", "c"]);
    }

    #[test]
    fn test_check_k() {
        assert!(check_k(0).is_err());
        assert!(check_k(1).is_ok());
    }
}
