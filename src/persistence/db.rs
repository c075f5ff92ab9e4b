use anyhow::{bail, Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::{Path, PathBuf};

use super::models::{SessionMeta, UNSAVED_ID};

/// SQLite store for session metadata rows. Message bodies live in the JSON
/// snapshots, never here.
pub struct HistoryDb {
    pool: SqlitePool,
    path: PathBuf,
}

impl HistoryDb {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        // ?mode=rwc creates the file on first open.
        let database_url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .context("Failed to connect to history database")?;

        Self::migrate(&pool).await?;

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                updated_at INTEGER NOT NULL,
                title TEXT NOT NULL,
                model TEXT NOT NULL,
                total_messages INTEGER NOT NULL,
                total_tokens INTEGER NOT NULL,
                duration_seconds INTEGER NOT NULL,
                fid TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_session_updated_at
            ON session(updated_at DESC)
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Insert a new row and return the generated primary key.
    pub async fn insert(&self, meta: &SessionMeta) -> Result<i64> {
        let fid = meta
            .fid
            .as_deref()
            .context("Cannot insert a session without a fid")?;

        let result = sqlx::query(
            r#"
            INSERT INTO session
                (updated_at, title, model, total_messages, total_tokens, duration_seconds, fid)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(meta.updated_at)
        .bind(&meta.title)
        .bind(&meta.model)
        .bind(meta.total_messages)
        .bind(meta.total_tokens)
        .bind(meta.duration_seconds)
        .bind(fid)
        .execute(&self.pool)
        .await
        .context("Failed to insert session row")?;

        Ok(result.last_insert_rowid())
    }

    /// Update an existing row by primary key.
    pub async fn update(&self, meta: &SessionMeta) -> Result<()> {
        if meta.id == UNSAVED_ID {
            bail!("Cannot update a session that was never inserted");
        }

        sqlx::query(
            r#"
            UPDATE session
            SET updated_at = ?, title = ?, model = ?,
                total_messages = ?, total_tokens = ?, duration_seconds = ?
            WHERE id = ?
            "#,
        )
        .bind(meta.updated_at)
        .bind(&meta.title)
        .bind(&meta.model)
        .bind(meta.total_messages)
        .bind(meta.total_tokens)
        .bind(meta.duration_seconds)
        .bind(meta.id)
        .execute(&self.pool)
        .await
        .context("Failed to update session row")?;

        Ok(())
    }

    /// All metadata rows, most recently updated first.
    pub async fn list(&self) -> Result<Vec<SessionMeta>> {
        let rows = sqlx::query_as::<_, (i64, i64, String, String, i64, i64, i64, String)>(
            r#"
            SELECT id, updated_at, title, model,
                   total_messages, total_tokens, duration_seconds, fid
            FROM session
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| SessionMeta {
                id: row.0,
                updated_at: row.1,
                title: row.2,
                model: row.3,
                total_messages: row.4,
                total_tokens: row.5,
                duration_seconds: row.6,
                fid: Some(row.7),
                unread_count: 0,
            })
            .collect())
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM session WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Copy the database file to a `.bak` sibling. Callers serialize this
    /// process-wide (a single writer holds the store lock).
    pub async fn backup(&self) -> Result<()> {
        let backup_path = self.path.with_extension("db.bak");
        tokio::fs::copy(&self.path, &backup_path)
            .await
            .with_context(|| format!("Failed to back up database to {:?}", backup_path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn meta(fid: &str, updated_at: i64) -> SessionMeta {
        let mut m = SessionMeta::new("test-model");
        m.fid = Some(fid.to_string());
        m.title = format!("chat {fid}");
        m.updated_at = updated_at;
        m
    }

    #[tokio::test]
    async fn insert_assigns_key_and_update_overwrites() {
        let dir = tempdir().unwrap();
        let db = HistoryDb::open(&dir.path().join("history.db")).await.unwrap();

        let mut m = meta("2025-01-15-14-30-00", 100);
        let id = db.insert(&m).await.unwrap();
        assert!(id > 0);
        m.id = id;

        m.title = "renamed".into();
        m.updated_at = 200;
        db.update(&m).await.unwrap();

        let rows = db.list().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
        assert_eq!(rows[0].title, "renamed");
        assert_eq!(rows[0].updated_at, 200);
    }

    #[tokio::test]
    async fn list_orders_by_updated_at_desc() {
        let dir = tempdir().unwrap();
        let db = HistoryDb::open(&dir.path().join("history.db")).await.unwrap();

        db.insert(&meta("2025-01-13-09-00-00", 10)).await.unwrap();
        db.insert(&meta("2025-01-15-09-00-00", 30)).await.unwrap();
        db.insert(&meta("2025-01-14-09-00-00", 20)).await.unwrap();

        let rows = db.list().await.unwrap();
        let fids: Vec<_> = rows.iter().map(|r| r.fid.clone().unwrap()).collect();
        assert_eq!(
            fids,
            vec![
                "2025-01-15-09-00-00",
                "2025-01-14-09-00-00",
                "2025-01-13-09-00-00"
            ]
        );
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let dir = tempdir().unwrap();
        let db = HistoryDb::open(&dir.path().join("history.db")).await.unwrap();

        let id = db.insert(&meta("2025-01-15-14-30-00", 1)).await.unwrap();
        db.delete(id).await.unwrap();
        assert!(db.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_without_insert_is_rejected() {
        let dir = tempdir().unwrap();
        let db = HistoryDb::open(&dir.path().join("history.db")).await.unwrap();
        assert!(db.update(&meta("2025-01-15-14-30-00", 1)).await.is_err());
    }

    #[tokio::test]
    async fn backup_copies_database_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.db");
        let db = HistoryDb::open(&path).await.unwrap();
        db.insert(&meta("2025-01-15-14-30-00", 1)).await.unwrap();

        db.backup().await.unwrap();
        assert!(path.with_extension("db.bak").exists());
    }
}
