//! File-backed persistence
//!
//! Usage records are appended to `usage.jsonl`, one JSON object per line.
//! The active configuration lives next to it in `active-config.toml`.
//!
//! ```text
//! $XDG_DATA_HOME/llm-gateway/
//! ├── usage.jsonl
//! └── active-config.toml
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use gateway_core::{EffectiveConfig, PersistencePort, PortError, UsageRecord};

/// Usage log file name
pub const USAGE_FILE: &str = "usage.jsonl";

/// Active configuration file name
pub const ACTIVE_CONFIG_FILE: &str = "active-config.toml";

#[derive(Debug, Error)]
enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config in {path}: {source}")]
    ConfigDecode {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to encode config: {0}")]
    ConfigEncode(#[from] toml::ser::Error),

    #[error("failed to encode usage record: {0}")]
    RecordEncode(#[from] serde_json::Error),
}

impl From<StoreError> for PortError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io { .. } => PortError::Io(err.to_string()),
            StoreError::ConfigDecode { .. }
            | StoreError::ConfigEncode(_)
            | StoreError::RecordEncode(_) => PortError::Corrupt(err.to_string()),
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// JSON-lines usage log plus a TOML active config
#[derive(Debug)]
pub struct JsonlUsageStore {
    dir: PathBuf,
    // Serializes appends so lines never interleave
    write_lock: Mutex<()>,
}

impl JsonlUsageStore {
    /// Store rooted at `dir`; the directory is created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// `$XDG_DATA_HOME/llm-gateway`, or `~/.local/share/llm-gateway`
    pub fn default_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|p| p.join("llm-gateway"))
    }

    /// Directory holding the store files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn usage_path(&self) -> PathBuf {
        self.dir.join(USAGE_FILE)
    }

    fn config_path(&self) -> PathBuf {
        self.dir.join(ACTIVE_CONFIG_FILE)
    }

    async fn ensure_dir(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(io_error(&self.dir))
    }

    /// Make `config` the active configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save_active_config(&self, config: &EffectiveConfig) -> Result<(), PortError> {
        let text = toml::to_string_pretty(config).map_err(StoreError::from)?;
        self.ensure_dir().await?;

        let path = self.config_path();
        let tmp = path.with_extension("toml.tmp");
        tokio::fs::write(&tmp, text).await.map_err(io_error(&tmp))?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_error(&path))?;

        debug!(path = %path.display(), "Saved active gateway config");
        Ok(())
    }

    /// Remove the active configuration, returns whether one existed
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub async fn clear_active_config(&self) -> Result<bool, PortError> {
        let path = self.config_path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&path)(e).into()),
        }
    }

    /// Every decodable record in the log, oldest first
    ///
    /// Lines that fail to decode are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the log exists but cannot be read.
    pub async fn read_records(&self) -> Result<Vec<UsageRecord>, PortError> {
        let path = self.usage_path();
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&path)(e).into()),
        };

        let mut records = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<UsageRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %path.display(),
                    line = idx + 1,
                    error = %e,
                    "Skipping undecodable usage record"
                ),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl PersistencePort for JsonlUsageStore {
    async fn load_active_config(&self) -> Result<Option<EffectiveConfig>, PortError> {
        let path = self.config_path();
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path)(e).into()),
        };

        let config = toml::from_str(&text)
            .map_err(|source| StoreError::ConfigDecode { path, source })?;
        Ok(Some(config))
    }

    async fn sum_successful_cost(&self, since: DateTime<Utc>) -> Result<f64, PortError> {
        let total = self
            .read_records()
            .await?
            .iter()
            .filter(|r| r.success && r.created_at >= since)
            .map(|r| r.total_cost)
            .sum();
        Ok(total)
    }

    async fn append_usage_record(&self, record: &UsageRecord) -> Result<(), PortError> {
        let mut line = serde_json::to_string(record).map_err(StoreError::from)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        self.ensure_dir().await?;

        let path = self.usage_path();
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_error(&path))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(io_error(&path))?;
        file.flush().await.map_err(io_error(&path))?;
        Ok(())
    }
}
