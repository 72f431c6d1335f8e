use mcsv_protocol::management::server::SupervisorStatus;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("server not running")]
    NotRunning,
    #[error("another start/stop/restart is already in progress")]
    Busy,
    #[error("operation not allowed while server is {0}")]
    InvalidState(SupervisorStatus),
    #[error("no server JAR found in {}", .0.display())]
    LaunchTargetNotFound(PathBuf),
    #[error("a modpack is configured but no package source is available")]
    PackageSourceMissing,
    #[error("modpack installation failed: {0:#}")]
    Install(anyhow::Error),
    #[error("failed to start server: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed to send command: {0}")]
    Send(#[source] io::Error),
    #[error("cannot restore a backup while the server is {0}")]
    RestoreWhileRunning(SupervisorStatus),
    #[error(transparent)]
    Backup(#[from] BackupError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("no world directories found to backup")]
    NoDataDirectories,
    #[error("backup not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}
