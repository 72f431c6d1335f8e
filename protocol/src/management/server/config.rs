use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorConfig {
    #[serde(default = "default_ram_min")]
    pub ram_min: String,
    #[serde(default = "default_ram_max")]
    pub ram_max: String,
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_server_dir")]
    pub server_dir: PathBuf,
    #[serde(default = "default_java_path")]
    pub java_path: String,
    /// Extra JVM flags, split on whitespace.
    #[serde(default)]
    pub java_args: String,

    #[serde(default)]
    pub package: PackageConfig,

    #[serde(default = "default_true")]
    pub auto_restart: bool,
    #[serde(default)]
    pub backup: BackupConfig,

    /// Directory searched for a local `Mods`/`mods` folder; the working
    /// directory of the daemon when unset.
    #[serde(default)]
    pub local_mods_dir: Option<PathBuf>,
}

/// Package acquisition is skipped when `id` is empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_package_version")]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_backup_interval")]
    pub interval_minutes: u64,
    #[serde(default = "default_backup_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ram_min: default_ram_min(),
            ram_max: default_ram_max(),
            port: default_port(),
            server_dir: default_server_dir(),
            java_path: default_java_path(),
            java_args: String::new(),
            package: PackageConfig::default(),
            auto_restart: true,
            backup: BackupConfig::default(),
            local_mods_dir: None,
        }
    }
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            version: default_package_version(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: default_backup_interval(),
            dir: default_backup_dir(),
            max_backups: default_max_backups(),
        }
    }
}

impl PackageConfig {
    pub fn is_configured(&self) -> bool {
        !self.id.trim().is_empty()
    }
}

fn default_ram_min() -> String {
    "1G".to_owned()
}

fn default_ram_max() -> String {
    "4G".to_owned()
}

fn default_port() -> u16 {
    25565
}

fn default_server_dir() -> PathBuf {
    "./server".into()
}

fn default_java_path() -> String {
    "java".to_owned()
}

fn default_package_version() -> String {
    "latest".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_backup_interval() -> u64 {
    60
}

fn default_backup_dir() -> PathBuf {
    "./backups".into()
}

fn default_max_backups() -> usize {
    10
}
