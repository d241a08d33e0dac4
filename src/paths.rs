//! Application path management
//!
//! Dev mode (a `config.yaml` in the working directory, typical under
//! `cargo run`) keeps everything local; otherwise state and logs live in the
//! platform data directory.

use std::path::PathBuf;

use anyhow::Result;
use tracing::debug;

/// Directory name used under the platform data dir in installed mode.
const APP_NAME: &str = "StageCue";

/// Paths for config, state, and logs.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config: PathBuf,
    /// sled database directory
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl AppPaths {
    /// Resolve paths relative to `config_path` when it exists (dev mode),
    /// falling back to the platform data directory.
    pub fn detect(config_path: &str) -> Self {
        let config = PathBuf::from(config_path);
        if config.exists() {
            let base = config
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            return Self {
                config,
                state_dir: base.join(".state"),
                logs_dir: base.join("logs"),
            };
        }

        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_NAME);
        Self {
            config: data_dir.join("config.yaml"),
            state_dir: data_dir.join("state"),
            logs_dir: data_dir.join("logs"),
        }
    }

    /// Create the state and log directories if needed.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.state_dir, &self.logs_dir] {
            if !dir.exists() {
                debug!("Creating directory: {}", dir.display());
                std::fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }

    /// sled database path inside the state directory.
    pub fn sled_db_path(&self) -> PathBuf {
        self.state_dir.join("sled")
    }
}
