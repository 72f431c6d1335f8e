use chrono::{DateTime, Local};
use log::{info, warn};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use zip::ZipWriter;

use crate::management::error::BackupError;
use crate::utils::{add_dir_to_zip, extract_zip};
use mcsv_protocol::management::backup::BackupInfo;

const BACKUP_PREFIX: &str = "backup_";
const BACKUP_EXTENSION: &str = "zip";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Held open by the running server; copying it fails on some platforms.
const LOCK_FILE: &str = "session.lock";
const WORLD_MARKER: &str = "level.dat";
const WORLD_NAMES: [&str; 3] = ["world", "world_nether", "world_the_end"];
const WORLD_PREFIXES: [&str; 2] = ["world_", "DIM"];

/// Creates, lists, prunes and restores world archives. The backup
/// directory listing is the only catalog.
#[derive(Debug, Clone)]
pub struct BackupManager {
    server_dir: PathBuf,
    backup_dir: PathBuf,
    max_backups: usize,
}

impl BackupManager {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(
        server_dir: P,
        backup_dir: Q,
        max_backups: usize,
    ) -> Self {
        Self {
            server_dir: server_dir.into(),
            backup_dir: backup_dir.into(),
            max_backups,
        }
    }

    pub fn create_backup(&self) -> Result<BackupInfo, BackupError> {
        self.create_backup_at(Local::now())
    }

    pub fn create_backup_at(&self, now: DateTime<Local>) -> Result<BackupInfo, BackupError> {
        fs::create_dir_all(&self.backup_dir)?;

        let worlds = self.find_world_dirs()?;
        if worlds.is_empty() {
            return Err(BackupError::NoDataDirectories);
        }

        let (path, file) = self.create_archive_file(now)?;
        let mut zip = ZipWriter::new(file);
        let written = worlds.iter().try_for_each(|world| {
            let name = world
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            add_dir_to_zip(&mut zip, world, &name, &is_lock_file)
        });
        if let Err(err) = written.and_then(|_| zip.finish().map(|_| ())) {
            let _ = fs::remove_file(&path);
            return Err(err.into());
        }

        let info = backup_info(&path)?;
        info!("backup created: {} ({} bytes)", info.name, info.size);

        if let Err(err) = self.cleanup_old_backups() {
            warn!("failed to prune old backups: {}", err);
        }
        Ok(info)
    }

    /// Top-level directories of the server dir that hold world data.
    pub fn find_world_dirs(&self) -> io::Result<Vec<PathBuf>> {
        let mut worlds = Vec::new();
        let entries = match fs::read_dir(&self.server_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(worlds),
            Err(err) => return Err(err),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let path = entry.path();
            if WORLD_NAMES.contains(&name.as_ref())
                || WORLD_PREFIXES.iter().any(|p| name.starts_with(p))
                || path.join(WORLD_MARKER).exists()
            {
                worlds.push(path);
            }
        }
        worlds.sort();
        Ok(worlds)
    }

    /// Archives in the backup directory, newest first.
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>, BackupError> {
        let entries = match fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(err.into()),
        };

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if !is_backup_archive(&path) || !entry.file_type()?.is_file() {
                continue;
            }
            backups.push(backup_info(&path)?);
        }
        backups.sort_by(|a, b| (b.created_at, &b.name).cmp(&(a.created_at, &a.name)));
        Ok(backups)
    }

    /// Deletes the oldest archives beyond the retention limit. A limit of
    /// zero keeps everything.
    pub fn cleanup_old_backups(&self) -> Result<usize, BackupError> {
        if self.max_backups == 0 {
            return Ok(0);
        }
        let mut removed = 0;
        for backup in self.list_backups()?.iter().skip(self.max_backups) {
            match fs::remove_file(&backup.path) {
                Ok(()) => {
                    info!("removed old backup {}", backup.name);
                    removed += 1;
                }
                Err(err) => warn!("failed to remove old backup {}: {}", backup.name, err),
            }
        }
        Ok(removed)
    }

    /// Extracts an archive over the server directory. Files present in the
    /// server dir but not in the archive are left alone.
    pub fn restore_backup<P: AsRef<Path>>(&self, path: P) -> Result<(), BackupError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(BackupError::NotFound(path.to_path_buf()));
        }
        fs::create_dir_all(&self.server_dir)?;
        let files = extract_zip(path, &self.server_dir, None)?;
        info!("restored {} files from {}", files, path.display());
        Ok(())
    }

    pub fn total_size(&self) -> Result<u64, BackupError> {
        Ok(self.list_backups()?.iter().map(|b| b.size).sum())
    }

    fn create_archive_file(&self, now: DateTime<Local>) -> io::Result<(PathBuf, fs::File)> {
        let stem = format!("{}{}", BACKUP_PREFIX, now.format(TIMESTAMP_FORMAT));
        let mut suffix = 0;
        loop {
            let name = match suffix {
                0 => format!("{}.{}", stem, BACKUP_EXTENSION),
                n => format!("{}_{}.{}", stem, n, BACKUP_EXTENSION),
            };
            let path = self.backup_dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => suffix += 1,
                Err(err) => return Err(err),
            }
        }
    }
}

fn is_lock_file(path: &Path) -> bool {
    path.file_name().is_some_and(|name| name == LOCK_FILE)
}

fn is_backup_archive(path: &Path) -> bool {
    let name_ok = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(BACKUP_PREFIX));
    name_ok && path.extension().is_some_and(|ext| ext == BACKUP_EXTENSION)
}

/// Creation time is the archive's modification time, so the catalog needs
/// nothing beyond the directory listing.
fn backup_info(path: &Path) -> io::Result<BackupInfo> {
    let metadata = fs::metadata(path)?;
    let created_at = metadata
        .modified()
        .map(DateTime::<Local>::from)
        .unwrap_or_else(|_| Local::now());
    Ok(BackupInfo {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path: path.to_path_buf(),
        size: metadata.len(),
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::fs::File;
    use std::time::{Duration, SystemTime};

    fn server_with_world(root: &Path) -> PathBuf {
        let server = root.join("server");
        fs::create_dir_all(server.join("world/region")).unwrap();
        fs::write(server.join("world/level.dat"), "level").unwrap();
        fs::write(server.join("world/session.lock"), "lock").unwrap();
        fs::write(server.join("world/region/r.0.0.mca"), "chunks").unwrap();
        fs::write(server.join("server.properties"), "server-port=25565\n").unwrap();
        server
    }

    fn at(second: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 1, 12, 0, second).unwrap()
    }

    fn set_mtime(path: &Path, offset_secs: u64) {
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + offset_secs);
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    #[test]
    fn world_detection() {
        let tmp = tempfile::tempdir().unwrap();
        let server = tmp.path().join("server");
        for dir in ["world", "world_nether", "world_custom", "DIM-1", "logs", "mods"] {
            fs::create_dir_all(server.join(dir)).unwrap();
        }
        fs::create_dir_all(server.join("saves/creative")).unwrap();
        fs::create_dir_all(server.join("skyblock")).unwrap();
        fs::write(server.join("skyblock/level.dat"), "").unwrap();
        fs::write(server.join("world_file"), "").unwrap();

        let manager = BackupManager::new(&server, tmp.path().join("backups"), 10);
        let names: Vec<_> = manager
            .find_world_dirs()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec!["DIM-1", "skyblock", "world", "world_custom", "world_nether"]
        );
    }

    #[test]
    fn no_worlds_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("server/logs")).unwrap();
        let manager = BackupManager::new(tmp.path().join("server"), tmp.path().join("b"), 10);
        assert!(matches!(
            manager.create_backup(),
            Err(BackupError::NoDataDirectories)
        ));
        assert!(manager.list_backups().unwrap().is_empty());
    }

    #[test]
    fn create_and_restore() {
        let tmp = tempfile::tempdir().unwrap();
        let server = server_with_world(tmp.path());
        let manager = BackupManager::new(&server, tmp.path().join("backups"), 10);

        let info = manager.create_backup_at(at(0)).unwrap();
        assert_eq!(info.name, "backup_2026-03-01_12-00-00.zip");
        assert!(info.size > 0);

        fs::remove_dir_all(server.join("world")).unwrap();
        fs::write(server.join("world_marker.txt"), "kept").unwrap();

        manager.restore_backup(&info.path).unwrap();
        assert_eq!(fs::read_to_string(server.join("world/level.dat")).unwrap(), "level");
        assert!(server.join("world/region/r.0.0.mca").exists());
        assert!(!server.join("world/session.lock").exists());
        assert!(server.join("world_marker.txt").exists());
        assert!(server.join("server.properties").exists());
    }

    #[test]
    fn same_second_backups_do_not_collide() {
        let tmp = tempfile::tempdir().unwrap();
        let server = server_with_world(tmp.path());
        let manager = BackupManager::new(&server, tmp.path().join("backups"), 10);

        let first = manager.create_backup_at(at(5)).unwrap();
        let second = manager.create_backup_at(at(5)).unwrap();
        assert_eq!(first.name, "backup_2026-03-01_12-00-05.zip");
        assert_eq!(second.name, "backup_2026-03-01_12-00-05_1.zip");
        assert_eq!(manager.list_backups().unwrap().len(), 2);
    }

    #[test]
    fn retention_keeps_newest() {
        let tmp = tempfile::tempdir().unwrap();
        let server = server_with_world(tmp.path());
        let backups = tmp.path().join("backups");
        let manager = BackupManager::new(&server, &backups, 2);

        // pre-seed archives with distinct modification times
        let unlimited = BackupManager::new(&server, &backups, 0);
        for (i, second) in [1, 2, 3].into_iter().enumerate() {
            let info = unlimited.create_backup_at(at(second)).unwrap();
            set_mtime(&info.path, i as u64 * 60);
        }
        assert_eq!(unlimited.list_backups().unwrap().len(), 3);

        assert_eq!(manager.cleanup_old_backups().unwrap(), 1);
        let names: Vec<_> = manager
            .list_backups()
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "backup_2026-03-01_12-00-03.zip",
                "backup_2026-03-01_12-00-02.zip"
            ]
        );
    }

    #[test]
    fn every_backup_prunes_the_catalog() {
        let tmp = tempfile::tempdir().unwrap();
        let server = server_with_world(tmp.path());
        let manager = BackupManager::new(&server, tmp.path().join("backups"), 2);

        for second in [1, 2, 3] {
            manager.create_backup_at(at(second)).unwrap();
        }

        let names: Vec<_> = manager
            .list_backups()
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "backup_2026-03-01_12-00-03.zip",
                "backup_2026-03-01_12-00-02.zip"
            ]
        );
    }

    fn files_under(root: &Path) -> Vec<(String, String)> {
        fn walk(root: &Path, dir: &Path, out: &mut Vec<(String, String)>) {
            for entry in fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    walk(root, &path, out);
                } else {
                    let rel = path.strip_prefix(root).unwrap().to_string_lossy();
                    let rel = rel.replace('\\', "/");
                    out.push((rel, fs::read_to_string(&path).unwrap()));
                }
            }
        }
        let mut out = Vec::new();
        walk(root, root, &mut out);
        out.sort();
        out
    }

    #[test]
    fn restore_rebuilds_every_world_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let server = server_with_world(tmp.path());
        fs::create_dir_all(server.join("world/data/villages")).unwrap();
        fs::write(server.join("world/data/villages/v.dat"), "village").unwrap();
        fs::create_dir_all(server.join("world_nether/DIM-1/region")).unwrap();
        fs::write(server.join("world_nether/DIM-1/region/r.-1.0.mca"), "lava").unwrap();
        fs::write(server.join("world_nether/level.dat"), "nether").unwrap();
        fs::write(server.join("world_nether/session.lock"), "lock").unwrap();

        let manager = BackupManager::new(&server, tmp.path().join("backups"), 10);
        let info = manager.create_backup_at(at(0)).unwrap();
        let before: Vec<_> = files_under(&server)
            .into_iter()
            .filter(|(path, _)| path.starts_with("world") && !path.ends_with("session.lock"))
            .collect();

        fs::remove_dir_all(server.join("world")).unwrap();
        fs::remove_dir_all(server.join("world_nether")).unwrap();
        manager.restore_backup(&info.path).unwrap();

        let after: Vec<_> = files_under(&server)
            .into_iter()
            .filter(|(path, _)| path.starts_with("world"))
            .collect();
        assert_eq!(after, before);
        assert!(after
            .iter()
            .any(|(path, _)| path == "world_nether/DIM-1/region/r.-1.0.mca"));
    }

    #[test]
    fn foreign_files_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let backups = tmp.path().join("backups");
        fs::create_dir_all(&backups).unwrap();
        fs::write(backups.join("notes.txt"), "hello").unwrap();
        fs::write(backups.join("backup_old.tar"), "x").unwrap();
        fs::write(backups.join("backup_2026-01-01_00-00-00.zip"), "12345").unwrap();

        let manager = BackupManager::new(tmp.path().join("server"), &backups, 10);
        let listed = manager.list_backups().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(manager.total_size().unwrap(), 5);
    }

    #[test]
    fn restore_missing_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(tmp.path().join("server"), tmp.path().join("b"), 10);
        assert!(matches!(
            manager.restore_backup(tmp.path().join("b/backup_nope.zip")),
            Err(BackupError::NotFound(_))
        ));
    }
}
