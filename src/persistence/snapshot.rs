//! Full-body JSON snapshots, one file per session, date-partitioned by fid:
//! `<root>/<YYYY>/<MM>/<DD>/<HH-MM-SS>.json`. Before an overwrite, a dated
//! backup copy is kept under `<root>/backup/`, at most once per calendar
//! day per record id.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::message::{Message, MessageLog};

use super::models::SessionMeta;

pub const SNAPSHOT_VERSION: u32 = 1;

const FID_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// On-disk snapshot schema, version 1. Encoding and decoding go through
/// [`encode`] and [`decode`]; unknown fields in stored files are skipped,
/// an unsupported version is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotV1 {
    pub version: u32,
    pub id: i64,
    pub updated_at: i64,
    pub title: String,
    pub model: String,
    pub total_messages: i64,
    pub total_tokens: i64,
    pub duration_seconds: i64,
    #[serde(default)]
    pub child_chats: Vec<String>,
    pub messages: Vec<Message>,
}

/// Allocate a fresh fid from a wall-clock instant.
pub fn new_fid(now: DateTime<Local>) -> String {
    now.format(FID_FORMAT).to_string()
}

fn validate_fid(fid: &str) -> Result<(), EngineError> {
    NaiveDateTime::parse_from_str(fid, FID_FORMAT)
        .map(|_| ())
        .map_err(|_| EngineError::InvalidFid(fid.to_string()))
}

/// Derive the snapshot path for a fid: `YYYY/MM/DD/HH-MM-SS.json`.
pub fn snapshot_path(root: &Path, fid: &str) -> Result<PathBuf, EngineError> {
    validate_fid(fid)?;
    // Layout after validation: "YYYY-MM-DD-HH-MM-SS".
    let (year, rest) = fid.split_at(4);
    let month = &rest[1..3];
    let day = &rest[4..6];
    let basename = &rest[7..];
    Ok(root
        .join(year)
        .join(month)
        .join(day)
        .join(format!("{basename}.json")))
}

/// Build the snapshot for one session from its metadata and full
/// persistence log (all roles included).
pub fn encode(meta: &SessionMeta, log: &MessageLog) -> SnapshotV1 {
    SnapshotV1 {
        version: SNAPSHOT_VERSION,
        id: meta.id,
        updated_at: meta.updated_at,
        title: meta.title.clone(),
        model: meta.model.clone(),
        total_messages: log.len() as i64,
        total_tokens: meta.total_tokens,
        duration_seconds: meta.duration_seconds,
        child_chats: Vec::new(),
        messages: log.messages().to_vec(),
    }
}

/// Decode a stored snapshot, rejecting unsupported schema versions.
pub fn decode(json: &str) -> Result<SnapshotV1> {
    let snapshot: SnapshotV1 = serde_json::from_str(json)
        .map_err(|e| EngineError::Deserialize(e.into()))?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(EngineError::Deserialize(anyhow::anyhow!(
            "unsupported snapshot version {}",
            snapshot.version
        ))
        .into());
    }
    Ok(snapshot)
}

/// Write a snapshot (pretty-printed), creating directories on demand.
pub async fn write(root: &Path, fid: &str, snapshot: &SnapshotV1) -> Result<PathBuf> {
    let path = snapshot_path(root, fid)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let json = serde_json::to_string_pretty(snapshot)?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("Failed to write snapshot {:?}", path))?;
    Ok(path)
}

/// Read and decode the snapshot for a fid. File-not-found and decode
/// failures both propagate; the caller decides what survives.
pub async fn read(root: &Path, fid: &str) -> Result<SnapshotV1> {
    let path = snapshot_path(root, fid)?;
    let json = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| EngineError::Persistence(anyhow::anyhow!("{:?}: {e}", path)))?;
    decode(&json)
}

fn backup_dir(root: &Path) -> PathBuf {
    root.join("backup")
}

fn backup_name(id: i64, day: NaiveDate, basename: &str) -> String {
    format!("{id}-{}-{basename}", day.format("%y-%m-%d"))
}

/// Copy the existing snapshot into the backup directory before an
/// overwrite. The dated name makes this idempotent per id per calendar
/// day: if today's backup already exists, nothing happens.
pub async fn backup_before_overwrite(
    root: &Path,
    id: i64,
    fid: &str,
    today: NaiveDate,
) -> Result<bool> {
    let path = snapshot_path(root, fid)?;
    if !path.exists() {
        return Ok(false);
    }
    let basename = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("Snapshot path has no file name")?;

    let dir = backup_dir(root);
    let backup_path = dir.join(backup_name(id, today, basename));
    if backup_path.exists() {
        return Ok(false);
    }

    tokio::fs::create_dir_all(&dir).await?;
    tokio::fs::copy(&path, &backup_path)
        .await
        .with_context(|| format!("Failed to back up snapshot to {:?}", backup_path))?;
    tracing::debug!("Snapshot backed up to {:?}", backup_path);
    Ok(true)
}

fn parse_backup_date(name: &str) -> Option<NaiveDate> {
    // "{id}-{yy}-{mm}-{dd}-{basename}"
    let mut parts = name.splitn(5, '-');
    let _id = parts.next()?;
    let date = format!(
        "{}-{}-{}",
        parts.next()?,
        parts.next()?,
        parts.next()?
    );
    NaiveDate::parse_from_str(&date, "%y-%m-%d").ok()
}

/// Remove backups whose embedded date is older than the retention window.
/// Runs on a spawned task; the store triggers it at most once per day.
pub async fn prune_stale_backups(
    root: PathBuf,
    retention_days: i64,
    today: NaiveDate,
) -> Result<usize> {
    let dir = backup_dir(&root);
    if !dir.exists() {
        return Ok(0);
    }

    let cutoff = today - chrono::Duration::days(retention_days);
    let mut removed = 0usize;
    let mut entries = tokio::fs::read_dir(&dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(date) = parse_backup_date(name) else {
            continue;
        };
        if date < cutoff {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                tracing::warn!("Failed to prune backup {:?}: {}", entry.path(), e);
            } else {
                removed += 1;
            }
        }
    }

    if removed > 0 {
        tracing::info!("Pruned {} stale snapshot backup(s)", removed);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use tempfile::tempdir;

    fn sample_log() -> MessageLog {
        let mut log = MessageLog::new();
        log.push(Message::user("Hello"));
        log.push(Message::ui("executing tool read_file"));
        log.push(Message::assistant("Hi there").with_thinking("greeting"));
        log
    }

    fn sample_meta() -> SessionMeta {
        let mut meta = SessionMeta::new("test-model");
        meta.id = 7;
        meta.fid = Some("2025-01-15-14-30-00".to_string());
        meta.title = "Hello".into();
        meta.updated_at = 1_736_951_400;
        meta
    }

    #[test]
    fn path_is_derived_from_fid() {
        let path = snapshot_path(Path::new("/hist"), "2025-01-15-14-30-00").unwrap();
        assert_eq!(path, PathBuf::from("/hist/2025/01/15/14-30-00.json"));
    }

    #[test]
    fn malformed_fid_is_rejected() {
        assert!(snapshot_path(Path::new("/hist"), "not-a-fid").is_err());
        assert!(snapshot_path(Path::new("/hist"), "2025-13-40-99-99-99").is_err());
        assert!(snapshot_path(Path::new("/hist"), "").is_err());
    }

    #[tokio::test]
    async fn round_trip_reconstructs_the_log() {
        let dir = tempdir().unwrap();
        let meta = sample_meta();
        let mut log = sample_log();
        // Transient flags are not part of the round trip.
        let snapshot = encode(&meta, &log);
        write(dir.path(), "2025-01-15-14-30-00", &snapshot)
            .await
            .unwrap();
        log.clear_extra_info();

        let loaded = read(dir.path(), "2025-01-15-14-30-00").await.unwrap();
        assert_eq!(loaded.version, SNAPSHOT_VERSION);
        assert_eq!(loaded.id, 7);
        assert_eq!(loaded.messages, log.messages());
        assert_eq!(loaded.messages[1].role, Role::Ui);
        assert_eq!(loaded.messages[2].thinking.as_deref(), Some("greeting"));
    }

    #[tokio::test]
    async fn unsupported_version_is_rejected() {
        let mut snapshot = encode(&sample_meta(), &sample_log());
        snapshot.version = 99;
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(decode(&json).is_err());
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        assert!(decode("{\"version\": ").is_err());
        assert!(decode("{}").is_err());
    }

    #[tokio::test]
    async fn backup_happens_at_most_once_per_day() {
        let dir = tempdir().unwrap();
        let fid = "2025-01-15-14-30-00";
        let snapshot = encode(&sample_meta(), &sample_log());
        write(dir.path(), fid, &snapshot).await.unwrap();

        let today = NaiveDate::from_ymd_opt(2025, 1, 16).unwrap();
        assert!(backup_before_overwrite(dir.path(), 7, fid, today)
            .await
            .unwrap());
        // Second save the same day: no new backup.
        assert!(!backup_before_overwrite(dir.path(), 7, fid, today)
            .await
            .unwrap());

        let backups: Vec<_> = std::fs::read_dir(dir.path().join("backup"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(backups, vec!["7-25-01-16-14-30-00.json".to_string()]);

        // Next day: one more.
        let tomorrow = NaiveDate::from_ymd_opt(2025, 1, 17).unwrap();
        assert!(backup_before_overwrite(dir.path(), 7, fid, tomorrow)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn no_backup_for_first_write() {
        let dir = tempdir().unwrap();
        let today = NaiveDate::from_ymd_opt(2025, 1, 16).unwrap();
        let made = backup_before_overwrite(dir.path(), 7, "2025-01-15-14-30-00", today)
            .await
            .unwrap();
        assert!(!made);
    }

    #[tokio::test]
    async fn prune_removes_only_stale_backups() {
        let dir = tempdir().unwrap();
        let backups = dir.path().join("backup");
        std::fs::create_dir_all(&backups).unwrap();
        std::fs::write(backups.join("7-24-11-01-14-30-00.json"), "{}").unwrap();
        std::fs::write(backups.join("7-25-01-10-14-30-00.json"), "{}").unwrap();
        std::fs::write(backups.join("unrelated.txt"), "x").unwrap();

        let today = NaiveDate::from_ymd_opt(2025, 1, 16).unwrap();
        let removed = prune_stale_backups(dir.path().to_path_buf(), 30, today)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(!backups.join("7-24-11-01-14-30-00.json").exists());
        assert!(backups.join("7-25-01-10-14-30-00.json").exists());
        assert!(backups.join("unrelated.txt").exists());
    }
}
