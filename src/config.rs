use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_backup_retention_days() -> i64 {
    30
}

fn default_title_placeholder() -> String {
    "New conversation".to_string()
}

fn default_max_title_chars() -> usize {
    48
}

/// Engine configuration, loadable from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root directory holding `history.db` and the per-session JSON tree.
    #[serde(default = "EngineConfig::default_history_dir")]
    pub history_dir: PathBuf,

    /// Snapshot backups older than this are pruned.
    #[serde(default = "default_backup_retention_days")]
    pub backup_retention_days: i64,

    /// Title used when neither derivation nor generation produced one.
    #[serde(default = "default_title_placeholder")]
    pub title_placeholder: String,

    /// Maximum length of a title derived from the first user message.
    #[serde(default = "default_max_title_chars")]
    pub max_title_chars: usize,
}

impl EngineConfig {
    fn default_history_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chat-engine")
            .join("history")
    }

    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config at {:?}", path))?;
        Ok(config)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_dir: Self::default_history_dir(),
            backup_retention_days: default_backup_retention_days(),
            title_placeholder: default_title_placeholder(),
            max_title_chars: default_max_title_chars(),
        }
    }
}
