use anyhow::Result;
use sqlx::SqlitePool;

/// Create the index schema. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One row per (collection, chunk). `seq` is assigned on first insert and
    // survives re-upserts so equal-score ties keep insertion order.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_entries (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            document TEXT NOT NULL,
            page INTEGER NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            dims INTEGER NOT NULL,
            PRIMARY KEY (collection, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_index_entries_seq ON index_entries(collection, seq)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
