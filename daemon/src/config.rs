use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{self, Path};

use crate::storage::{Config, FileIoWithBackup};
use mcsv_protocol::management::server::SupervisorConfig;

pub const CONFIG_FILE: &str = "config.json";

/// immutable through full lifetime of app, unless restart app.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

impl FileIoWithBackup for AppConfig {}

impl Config for AppConfig {
    type ConfigType = AppConfig;
}

impl AppConfig {
    /// Loads `config.json` from the working directory, creating it with
    /// defaults on first run. Relative paths are resolved against the
    /// working directory.
    pub fn load() -> anyhow::Result<AppConfig> {
        Self::load_from(CONFIG_FILE)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> anyhow::Result<AppConfig> {
        let path = path.as_ref();
        let mut config = Self::load_config_or_default(path, Self::default)
            .with_context(|| format!("failed to load {}", path.display()))?;
        config.resolve_paths()?;
        Ok(config)
    }

    fn resolve_paths(&mut self) -> anyhow::Result<()> {
        let supervisor = &mut self.supervisor;
        supervisor.server_dir = path::absolute(&supervisor.server_dir)?;
        supervisor.backup.dir = path::absolute(&supervisor.backup.dir)?;
        if let Some(dir) = supervisor.local_mods_dir.as_mut() {
            *dir = path::absolute(&*dir)?;
        }
        Ok(())
    }
}
