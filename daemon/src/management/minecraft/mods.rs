use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const LOCAL_MODS_DIRS: [&str; 2] = ["Mods", "mods"];

#[derive(Debug, Default)]
pub struct ModsCopyReport {
    pub copied: Vec<String>,
    pub failed: Vec<(String, io::Error)>,
}

fn local_mods_dir(root: &Path) -> Option<PathBuf> {
    LOCAL_MODS_DIRS
        .iter()
        .map(|name| root.join(name))
        .find(|dir| dir.is_dir())
}

/// Copies `*.jar` files from `<root>/Mods` (or `<root>/mods`) into the
/// server's mods folder. Files already present there are left untouched.
pub fn copy_local_mods(root: &Path, server_dir: &Path) -> io::Result<ModsCopyReport> {
    let mut report = ModsCopyReport::default();
    let Some(source) = local_mods_dir(root) else {
        return Ok(report);
    };
    let target = server_dir.join("mods");
    if source == target {
        return Ok(report);
    }
    fs::create_dir_all(&target)?;

    let mut entries = fs::read_dir(&source)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() || !name.to_lowercase().ends_with(".jar") {
            continue;
        }
        let dest = target.join(&name);
        if dest.exists() {
            continue;
        }
        match fs::copy(entry.path(), &dest) {
            Ok(_) => report.copied.push(name),
            Err(err) => report.failed.push((name, err)),
        }
    }
    Ok(report)
}
