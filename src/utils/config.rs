use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory for profiles and the scheduled-task record
    pub data_dir: PathBuf,

    /// Scheduler tick interval in seconds
    pub tick_interval_secs: u64,

    /// In-memory run log capacity
    pub log_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".syncmate");

        Self {
            data_dir,
            tick_interval_secs: 1,
            log_capacity: 1000,
        }
    }
}

impl Config {
    /// Load config from defaults with environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(dir) = std::env::var("SYNCMATE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Ok(secs) = std::env::var("SYNCMATE_TICK_SECS") {
            config.tick_interval_secs = secs
                .parse()
                .map_err(|_| SyncError::Config(format!("SYNCMATE_TICK_SECS: {secs}")))?;
        }

        if let Ok(capacity) = std::env::var("SYNCMATE_LOG_CAPACITY") {
            config.log_capacity = capacity
                .parse()
                .map_err(|_| SyncError::Config(format!("SYNCMATE_LOG_CAPACITY: {capacity}")))?;
        }

        Ok(config)
    }
}

pub fn load_config() -> Result<Config> {
    Config::load()
}
