//! Two-tier persistence: fast relational metadata rows in SQLite plus a
//! full JSON snapshot per session, written together on every completed
//! turn. Writes are serialized through the store; the caller treats save
//! failures as recoverable (state stays in memory, a later save retries).

mod db;
pub mod models;
pub mod snapshot;
pub mod title;

pub use db::HistoryDb;
pub use models::{SessionMeta, UNSAVED_ID};
pub use snapshot::{new_fid, snapshot_path, SnapshotV1, SNAPSHOT_VERSION};
pub use title::TitleGenerator;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::message::MessageLog;

/// Ceiling on how long title generation may delay a save.
const TITLE_TIMEOUT: Duration = Duration::from_secs(15);

/// Shared persistence facade. One instance per process, shared by
/// reference across all sessions; metadata writes and the database backup
/// step are serialized through an internal lock.
pub struct PersistenceStore {
    db: HistoryDb,
    root: PathBuf,
    config: EngineConfig,
    title_gen: Option<Arc<dyn TitleGenerator>>,
    write_lock: Mutex<()>,
    last_prune: std::sync::Mutex<Option<NaiveDate>>,
}

impl PersistenceStore {
    /// Open the store under `config.history_dir`, creating the database
    /// on first use.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        let root = config.history_dir.clone();
        let db = HistoryDb::open(&root.join("history.db")).await?;
        Ok(Self {
            db,
            root,
            config,
            title_gen: None,
            write_lock: Mutex::new(()),
            last_prune: std::sync::Mutex::new(None),
        })
    }

    pub fn with_title_generator(mut self, generator: Arc<dyn TitleGenerator>) -> Self {
        self.title_gen = Some(generator);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist one session: metadata row upsert, database backup, then the
    /// full JSON snapshot. Clears transient message flags after the write.
    pub async fn save_session(&self, meta: &mut SessionMeta, log: &mut MessageLog) -> Result<()> {
        let fid = meta
            .fid
            .clone()
            .context("Cannot save a session before its fid is assigned")?;

        meta.updated_at = Utc::now().timestamp();
        meta.total_messages = log.len() as i64;
        self.ensure_title(meta, log).await;

        {
            let _guard = self.write_lock.lock().await;
            if meta.is_saved() {
                self.db.update(meta).await?;
            } else {
                meta.id = self.db.insert(meta).await?;
                tracing::info!("Session {} inserted with id {}", fid, meta.id);
            }
            if let Err(e) = self.db.backup().await {
                tracing::warn!("Database backup failed: {:#}", e);
            }
        }

        let today = Local::now().date_naive();
        if let Err(e) = snapshot::backup_before_overwrite(&self.root, meta.id, &fid, today).await {
            tracing::warn!("Snapshot backup failed: {:#}", e);
        }

        let snap = snapshot::encode(meta, log);
        snapshot::write(&self.root, &fid, &snap).await?;
        log.clear_extra_info();

        self.spawn_prune_if_due(today);
        Ok(())
    }

    /// Metadata rows only, most recently updated first. Message bodies are
    /// not touched; callers promote placeholders on demand.
    pub async fn list_sessions(&self) -> Result<Vec<SessionMeta>> {
        self.db.list().await
    }

    /// Read the full snapshot body for a fid.
    pub async fn load_snapshot(&self, fid: &str) -> Result<SnapshotV1> {
        snapshot::read(&self.root, fid).await
    }

    /// Remove a session's row and snapshot file.
    pub async fn delete_session(&self, meta: &SessionMeta) -> Result<()> {
        if meta.is_saved() {
            let _guard = self.write_lock.lock().await;
            self.db.delete(meta.id).await?;
        }
        if let Some(fid) = &meta.fid {
            let path = snapshot::snapshot_path(&self.root, fid)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).context("Failed to remove snapshot"),
            }
        }
        Ok(())
    }

    async fn ensure_title(&self, meta: &mut SessionMeta, log: &MessageLog) {
        if !meta.title.is_empty() {
            return;
        }

        if let Some(derived) = title::derive_title(log, self.config.max_title_chars) {
            meta.title = derived;
            return;
        }

        if let Some(generator) = &self.title_gen {
            match tokio::time::timeout(TITLE_TIMEOUT, generator.generate(log.messages())).await {
                Ok(Ok(generated)) if !generated.trim().is_empty() => {
                    meta.title = generated.trim().to_string();
                    return;
                }
                Ok(Ok(_)) => tracing::warn!("Title generator returned an empty title"),
                Ok(Err(e)) => tracing::warn!("Title generation failed: {:#}", e),
                Err(_) => tracing::warn!("Title generation timed out"),
            }
        }

        meta.title = self.config.title_placeholder.clone();
    }

    /// Kick off backup pruning on a worker task, at most once per day.
    fn spawn_prune_if_due(&self, today: NaiveDate) {
        {
            let mut last = self.last_prune.lock().expect("prune lock poisoned");
            if *last == Some(today) {
                return;
            }
            *last = Some(today);
        }
        let root = self.root.clone();
        let retention = self.config.backup_retention_days;
        tokio::spawn(async move {
            if let Err(e) = snapshot::prune_stale_backups(root, retention, today).await {
                tracing::warn!("Backup pruning failed: {:#}", e);
            }
        });
    }
}
