//! SQLite-backed [`VectorIndex`] implementation.
//!
//! Entries live in the `index_entries` table, vectors as little-endian
//! `f32` BLOBs. Search is brute-force cosine similarity over one
//! collection, ranked with [`rank`] so results match the in-memory index.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

use docchat_core::embedding::{blob_to_vec, vec_to_blob};
use docchat_core::models::{Chunk, IndexEntry, ScoredChunk};
use docchat_core::store::{check_dims, check_k, rank, VectorIndex};

/// SQLite implementation of the [`VectorIndex`] trait.
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Insert or update `entries`, appending new ones after the collection's
/// current maximum `seq`.
///
/// `seq` is computed inside the `INSERT` so the first statement of every
/// transaction is a write. A deferred transaction that reads first would
/// hold a stale WAL snapshot, and its later write fails with
/// `SQLITE_BUSY_SNAPSHOT` when another session commits in between;
/// `busy_timeout` does not retry that.
async fn write_entries(
    tx: &mut Transaction<'_, Sqlite>,
    collection: &str,
    entries: &[IndexEntry],
) -> Result<()> {
    for entry in entries {
        let chunk = &entry.chunk;
        sqlx::query(
            r#"
            INSERT INTO index_entries (collection, id, seq, document, page, chunk_index,
                                       text, embedding, dims)
            VALUES (?, ?,
                    (SELECT COALESCE(MAX(seq), -1) + 1 FROM index_entries WHERE collection = ?),
                    ?, ?, ?, ?, ?, ?)
            ON CONFLICT(collection, id) DO UPDATE SET
                document = excluded.document,
                page = excluded.page,
                chunk_index = excluded.chunk_index,
                text = excluded.text,
                embedding = excluded.embedding,
                dims = excluded.dims
            "#,
        )
        .bind(collection)
        .bind(&chunk.id)
        .bind(collection)
        .bind(&chunk.document)
        .bind(chunk.page as i64)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(vec_to_blob(&entry.vector))
        .bind(entry.vector.len() as i64)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert_batch(&self, collection: &str, entries: &[IndexEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        write_entries(&mut tx, collection, entries).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn replace_collection(&self, collection: &str, entries: &[IndexEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM index_entries WHERE collection = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await?;
        write_entries(&mut tx, collection, entries).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, collection: &str, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        check_k(k)?;
        let rows = sqlx::query(
            r#"
            SELECT seq, id, document, page, chunk_index, text, embedding, dims
            FROM index_entries
            WHERE collection = ?
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let dims: i64 = row.get("dims");
            check_dims(collection, dims as usize, vector.len())?;
            let blob: Vec<u8> = row.get("embedding");
            let page: i64 = row.get("page");
            let chunk = Chunk {
                id: row.get("id"),
                document: row.get("document"),
                page: page as u32,
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
            };
            candidates.push((row.get::<i64, _>("seq"), chunk, blob_to_vec(&blob)));
        }

        rank(collection, vector, candidates, k)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_entries WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn collections(&self) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT collection FROM index_entries ORDER BY collection ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn delete_collection(&self, collection: &str) -> Result<()> {
        sqlx::query("DELETE FROM index_entries WHERE collection = ?")
            .bind(collection)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
