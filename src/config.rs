use crate::error::{IngestError, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite catalog file used by the CLI.
    pub database_path: String,
    pub log_dir: String,
    /// Upper bound on one whole source run; expiry aborts it without rollback.
    pub source_timeout_secs: u64,
    pub default_extraction_version: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "data/catalog.db".to_string(),
            log_dir: "logs".to_string(),
            source_timeout_secs: 300,
            default_extraction_version: "v1".to_string(),
        }
    }
}

impl Config {
    /// Loads `path` if it exists, otherwise starts from defaults, then applies env overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = fs::read_to_string(path).map_err(|e| {
                IngestError::Config(format!(
                    "Failed to read config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            toml::from_str::<Config>(&content)?
        } else {
            Config::default()
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(db) = std::env::var("EVENT_INGEST_DB") {
            if !db.trim().is_empty() {
                self.database_path = db;
            }
        }
        if let Ok(dir) = std::env::var("EVENT_INGEST_LOG_DIR") {
            if !dir.trim().is_empty() {
                self.log_dir = dir;
            }
        }
        if let Ok(secs) = std::env::var("EVENT_INGEST_SOURCE_TIMEOUT_SECS") {
            self.source_timeout_secs = secs.trim().parse().map_err(|e| {
                IngestError::Config(format!(
                    "EVENT_INGEST_SOURCE_TIMEOUT_SECS must be an integer: {}",
                    e
                ))
            })?;
        }
        Ok(())
    }
}
