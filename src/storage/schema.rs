use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::StoreError;

// ============================================================================
// Database
// ============================================================================

/// Handle to the item store. Cheap to clone (pool handle).
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open the store and run migrations.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Locked` if another process has the database
    /// locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN), and
    /// `StoreError::Other` for anything else.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Restrict store file permissions before pool creation so there is
        // no window where the file exists with default umask permissions.
        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::PermissionsExt;
            let db_path = std::path::Path::new(path);
            if db_path.exists() {
                let perms = std::fs::Permissions::from_mode(0o600);
                if let Err(e) = std::fs::set_permissions(path, perms) {
                    tracing::warn!(path = %path, error = %e, "Failed to set store file permissions");
                }
            } else if let Some(parent) = db_path.parent() {
                if parent.exists() {
                    use std::os::unix::fs::OpenOptionsExt;
                    let _file = std::fs::OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .mode(0o600)
                        .open(db_path)
                        .ok(); // If creation fails, SQLite reports it at connect_with.
                }
            }
        }

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to
        // release before returning SQLITE_BUSY, which covers transient
        // contention between merge batches and UI queries.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StoreError::from_sqlx)?
            .pragma("busy_timeout", "5000");
        // SQLite is single-writer; 5 connections covers peak concurrent
        // readers (merge batch + counter queries + search folder loads).
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StoreError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            let error_string = e.to_string().to_lowercase();
            if error_string.contains("database is locked")
                || error_string.contains("database table is locked")
                || error_string.contains("sqlite_busy")
                || error_string.contains("sqlite_locked")
            {
                StoreError::Locked
            } else {
                StoreError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run store migrations atomically within a transaction.
    ///
    /// All schema statements use `IF NOT EXISTS`, so re-running on an
    /// existing store is a no-op; a failure mid-way rolls the whole
    /// migration back.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;

        // Items, keyed by (node, feed-supplied guid).
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY,
                node_id TEXT NOT NULL,
                source_id TEXT NOT NULL,
                source_url TEXT,
                title TEXT NOT NULL,
                description TEXT,
                author TEXT,
                published INTEGER,
                fetched_at INTEGER NOT NULL,
                read INTEGER NOT NULL DEFAULT 0,
                flagged INTEGER NOT NULL DEFAULT 0,
                "new" INTEGER NOT NULL DEFAULT 0,
                "updated" INTEGER NOT NULL DEFAULT 0,
                metadata TEXT,
                UNIQUE(node_id, source_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_node ON items(node_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_node_read ON items(node_id, read)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_items_node_published ON items(node_id, published DESC)",
        )
        .execute(&mut *tx)
        .await?;

        // Conditional-request state per node, persisted across sessions.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS update_states (
                node_id TEXT PRIMARY KEY,
                last_modified TEXT,
                etag TEXT,
                cookies TEXT,
                last_poll INTEGER NOT NULL DEFAULT 0,
                last_favicon_poll INTEGER NOT NULL DEFAULT 0,
                max_age_minutes INTEGER NOT NULL DEFAULT 0,
                syn_frequency INTEGER NOT NULL DEFAULT 0,
                syn_period INTEGER NOT NULL DEFAULT 0,
                time_to_live INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Favicon blobs per node.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS icons (
                node_id TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                source_url TEXT,
                fetched_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
