//! In-memory [`VectorIndex`] implementation for testing.
//!
//! Uses a `HashMap` of collections behind `std::sync::RwLock`. Vector
//! search is brute-force cosine similarity over the collection. Nothing
//! survives the process.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{IndexEntry, ScoredChunk};

use super::{check_k, rank, VectorIndex};

struct StoredEntry {
    seq: i64,
    entry: IndexEntry,
}

#[derive(Default)]
struct Collection {
    next_seq: i64,
    entries: HashMap<String, StoredEntry>,
}

impl Collection {
    fn upsert(&mut self, entry: &IndexEntry) {
        match self.entries.get_mut(&entry.chunk.id) {
            Some(existing) => existing.entry = entry.clone(),
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.entries.insert(
                    entry.chunk.id.clone(),
                    StoredEntry {
                        seq,
                        entry: entry.clone(),
                    },
                );
            }
        }
    }
}

/// In-memory index for tests and throwaway sessions.
#[derive(Default)]
pub struct InMemoryIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Collection>>> {
        self.collections
            .read()
            .map_err(|_| anyhow!("in-memory index lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Collection>>> {
        self.collections
            .write()
            .map_err(|_| anyhow!("in-memory index lock poisoned"))
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert_batch(&self, collection: &str, entries: &[IndexEntry]) -> Result<()> {
        let mut guard = self.write()?;
        let coll = guard.entry(collection.to_string()).or_default();
        for entry in entries {
            coll.upsert(entry);
        }
        Ok(())
    }

    async fn replace_collection(&self, collection: &str, entries: &[IndexEntry]) -> Result<()> {
        let mut fresh = Collection::default();
        for entry in entries {
            fresh.upsert(entry);
        }
        self.write()?.insert(collection.to_string(), fresh);
        Ok(())
    }

    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        check_k(k)?;
        let guard = self.read()?;
        let Some(coll) = guard.get(collection) else {
            return Ok(Vec::new());
        };
        let rows = coll
            .entries
            .values()
            .map(|s| (s.seq, s.entry.chunk.clone(), s.entry.vector.clone()));
        rank(collection, vector, rows, k)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        Ok(self
            .read()?
            .get(collection)
            .map(|c| c.entries.len())
            .unwrap_or(0))
    }

    async fn collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .read()?
            .iter()
            .filter(|(_, c)| !c.entries.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn delete_collection(&self, collection: &str) -> Result<()> {
        self.write()?.remove(collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::content_id;
    use crate::models::Chunk;

    fn entry(text: &str, page: u32, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: Chunk {
                id: content_id(text),
                document: "doc.pdf".to_string(),
                page,
                chunk_index: page as i64 - 1,
                text: text.to_string(),
            },
            vector,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let index = InMemoryIndex::new();
        let entries = vec![
            entry("alpha", 1, vec![1.0, 0.0]),
            entry("beta", 2, vec![0.0, 1.0]),
        ];
        index.upsert_batch("c", &entries).await.unwrap();
        let first = index.query("c", &[1.0, 0.2], 10).await.unwrap();
        index.upsert_batch("c", &entries).await.unwrap();
        let second = index.query("c", &[1.0, 0.2], 10).await.unwrap();

        assert_eq!(index.count("c").await.unwrap(), 2);
        let ids = |r: &[ScoredChunk]| r.iter().map(|s| s.chunk.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
    }

    #[tokio::test]
    async fn test_query_orders_non_increasing() {
        let index = InMemoryIndex::new();
        let entries: Vec<IndexEntry> = (0..20)
            .map(|i| entry(&format!("t{}", i), 1, vec![1.0, i as f32 / 3.0, (i % 4) as f32]))
            .collect();
        index.upsert_batch("c", &entries).await.unwrap();
        let results = index.query("c", &[0.3, 1.0, 0.5], 20).await.unwrap();
        assert_eq!(results.len(), 20);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order_across_reupsert() {
        let index = InMemoryIndex::new();
        index.upsert_batch("c", &[entry("first", 1, vec![1.0, 0.0])]).await.unwrap();
        index.upsert_batch("c", &[entry("second", 1, vec![1.0, 0.0])]).await.unwrap();
        // re-upserting the first chunk must not move it behind the second
        index.upsert_batch("c", &[entry("first", 1, vec![1.0, 0.0])]).await.unwrap();
        let results = index.query("c", &[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results[0].chunk.text, "first");
        assert_eq!(results[1].chunk.text, "second");
    }

    #[tokio::test]
    async fn test_k_bounds() {
        let index = InMemoryIndex::new();
        index.upsert_batch("c", &[entry("only", 1, vec![1.0])]).await.unwrap();
        assert!(index.query("c", &[1.0], 0).await.is_err());
        assert_eq!(index.query("c", &[1.0], 5).await.unwrap().len(), 1);
        assert!(index.query("missing", &[1.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_with_wrong_dims_fails() {
        let index = InMemoryIndex::new();
        index.upsert_batch("c", &[entry("old model", 1, vec![1.0, 0.0, 0.0])]).await.unwrap();
        let err = index.query("c", &[1.0, 0.0], 1).await.unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[tokio::test]
    async fn test_collections_are_isolated() {
        let index = InMemoryIndex::new();
        index.upsert_batch("a", &[entry("x", 1, vec![1.0])]).await.unwrap();
        index.upsert_batch("b", &[entry("x", 1, vec![1.0])]).await.unwrap();
        index.replace_collection("a", &[]).await.unwrap();
        assert_eq!(index.count("a").await.unwrap(), 0);
        assert_eq!(index.count("b").await.unwrap(), 1);
        assert_eq!(index.collections().await.unwrap(), vec!["b".to_string()]);
    }
}
