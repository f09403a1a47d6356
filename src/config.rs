use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    pub history: HistoryConfig,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct HistoryConfig {
    pub db_path: Option<String>,
    pub compression_level: i32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive, used when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            history: HistoryConfig {
                db_path: None,
                compression_level: 0,
            },
            log: LogConfig::default(),
        }
    }
}

#[derive(Deserialize)]
struct PartialConfig {
    history: Option<PartialHistoryConfig>,
    log: Option<LogConfig>,
}

#[derive(Deserialize)]
struct PartialHistoryConfig {
    db_path: Option<String>,
    compression_level: Option<i32>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        // 1. Global Config (~/.config/labdash/config.toml)
        if let Some(config_dir) = dirs::config_dir() {
            let global_path = config_dir.join("labdash/config.toml");
            if global_path.exists() {
                config.merge_file(&global_path)?;
            }
        }

        // 2. Local Config (.labdash.toml)
        let local_path = Path::new(".labdash.toml");
        if local_path.exists() {
            config.merge_file(local_path)?;
        }

        Ok(config)
    }

    /// Defaults overlaid with a single file, skipping the global/local lookup.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Config::default();
        config.merge_file(path)?;
        Ok(config)
    }

    fn merge_file(&mut self, path: &Path) -> Result<()> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        self.merge_toml(&content)
            .with_context(|| format!("parsing config {}", path.display()))
    }

    /// Overlay the keys present in `content`; absent keys keep their value.
    pub fn merge_toml(&mut self, content: &str) -> Result<()> {
        let partial: PartialConfig = toml::from_str(content)?;
        if let Some(h) = partial.history {
            if let Some(path) = h.db_path {
                self.history.db_path = Some(path);
            }
            if let Some(level) = h.compression_level {
                self.history.compression_level = level;
            }
        }
        if let Some(l) = partial.log {
            if l.filter.is_some() {
                self.log.filter = l.filter;
            }
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        match &self.history.db_path {
            Some(path) => PathBuf::from(path),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("labdash/history_db"),
        }
    }
}
