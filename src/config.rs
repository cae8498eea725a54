use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    pub llm_api_key: Option<String>,

    /// Articles claimed per `--process` run.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    /// Failures after which an article needs an operator `--reset`.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Claims older than this are considered abandoned by `--reap`.
    #[serde(default = "default_stale_after_minutes")]
    pub stale_after_minutes: u32,

    /// When true, one malformed quiz question rejects the whole payload
    /// instead of being dropped individually.
    #[serde(default)]
    pub strict_validation: bool,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("graded-news");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("news.db").to_string_lossy().to_string()
}

fn default_batch_limit() -> usize {
    10
}

fn default_max_failures() -> u32 {
    3
}

fn default_stale_after_minutes() -> u32 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            llm_api_key: None,
            batch_limit: default_batch_limit(),
            max_failures: default_max_failures(),
            stale_after_minutes: default_stale_after_minutes(),
            strict_validation: false,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("graded-news")
            .join("config.toml")
    }
}
