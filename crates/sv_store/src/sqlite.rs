//! SQLite backend via sqlx.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;

use crate::error::{StoreError, StoreResult};
use crate::kv::KeyValueStore;

/// Key-value table in a single SQLite file. Cheap to clone (pool is Arc internally).
#[derive(Clone)]
pub struct SqliteKv {
    pool: SqlitePool,
}

impl SqliteKv {
    /// Open (or create) the database at `db_path` and run pending migrations.
    ///
    /// WAL journal mode is set on the connection options, not inside a
    /// migration, because SQLite refuses to change `journal_mode` inside the
    /// transaction sqlx wraps each migration in.
    pub async fn open(db_path: &Path) -> StoreResult<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        tracing::debug!(path = %db_path.display(), "sqlite kv opened");
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl KeyValueStore for SqliteKv {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM kv WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn put_get_overwrite_delete() {
        let dir = tempdir().unwrap();
        let kv = SqliteKv::open(&dir.path().join("store.db")).await.unwrap();

        assert!(kv.get("item:1").await.unwrap().is_none());
        kv.set("item:1", "first").await.unwrap();
        kv.set("item:1", "second").await.unwrap();
        assert_eq!(kv.get("item:1").await.unwrap().as_deref(), Some("second"));

        kv.delete("item:1").await.unwrap();
        assert!(kv.get("item:1").await.unwrap().is_none());
        kv.close().await;
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let kv = SqliteKv::open(&path).await.unwrap();
            kv.set("vaults", "[\"a\"]").await.unwrap();
            kv.close().await;
        }
        let kv = SqliteKv::open(&path).await.unwrap();
        assert_eq!(kv.get("vaults").await.unwrap().as_deref(), Some("[\"a\"]"));
        kv.close().await;
    }

    #[tokio::test]
    async fn large_values() {
        let dir = tempdir().unwrap();
        let kv = SqliteKv::open(&dir.path().join("store.db")).await.unwrap();
        let big = "A".repeat(1024 * 1024);
        kv.set("blob:x", &big).await.unwrap();
        assert_eq!(kv.get("blob:x").await.unwrap().unwrap().len(), big.len());
        kv.close().await;
    }
}
