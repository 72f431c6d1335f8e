use log::warn;
use std::fs::{self, File};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};
use zip::result::ZipResult;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Adds `source` and everything below it to `zip` under the entry name
/// `prefix`. Files for which `skip` returns true are left out.
pub fn add_dir_to_zip<W, F>(
    zip: &mut ZipWriter<W>,
    source: &Path,
    prefix: &str,
    skip: &F,
) -> ZipResult<()>
where
    W: Write + Seek,
    F: Fn(&Path) -> bool,
{
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.add_directory(prefix, options)?;

    let mut entries = fs::read_dir(source)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        let name = format!("{}/{}", prefix, entry.file_name().to_string_lossy());

        if entry.file_type()?.is_dir() {
            add_dir_to_zip(zip, &path, &name, skip)?;
        } else if !skip(&path) {
            zip.start_file(name, options)?;
            let mut file = File::open(&path)?;
            io::copy(&mut file, zip)?;
        }
    }
    Ok(())
}

/// Extracts every entry of `archive` into `dest`, overwriting existing
/// files. Entries that would land outside `dest` are skipped. When
/// `strip_prefix` is given, entries under it are re-rooted at `dest` and
/// the prefix directory itself is dropped.
///
/// Returns the number of files written.
pub fn extract_zip(archive: &Path, dest: &Path, strip_prefix: Option<&str>) -> ZipResult<usize> {
    let mut archive = ZipArchive::new(File::open(archive)?)?;
    let mut written = 0;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("skipping unsafe archive entry: {}", entry.name());
            continue;
        };
        let Some(relative) = rebase(relative, strip_prefix) else {
            continue;
        };

        let target = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        written += 1;
    }
    Ok(written)
}

fn rebase(path: PathBuf, strip_prefix: Option<&str>) -> Option<PathBuf> {
    let Some(prefix) = strip_prefix.filter(|p| !p.is_empty()) else {
        return Some(path);
    };
    match path.strip_prefix(prefix) {
        Ok(rest) if rest.as_os_str().is_empty() => None,
        Ok(rest) => Some(rest.to_path_buf()),
        Err(_) => Some(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_archive(path: &Path, entries: &[(&str, &str)]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        for (name, content) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn directory_round_trip_skips_filtered_files() {
        let tmp = tempfile::tempdir().unwrap();
        let world = tmp.path().join("world");
        fs::create_dir_all(world.join("region")).unwrap();
        fs::write(world.join("level.dat"), "level").unwrap();
        fs::write(world.join("session.lock"), "lock").unwrap();
        fs::write(world.join("region/r.0.0.mca"), "chunks").unwrap();

        let archive = tmp.path().join("out.zip");
        let mut zip = ZipWriter::new(File::create(&archive).unwrap());
        add_dir_to_zip(&mut zip, &world, "world", &|p: &Path| {
            p.file_name().is_some_and(|n| n == "session.lock")
        })
        .unwrap();
        zip.finish().unwrap();

        let dest = tmp.path().join("restore");
        assert_eq!(extract_zip(&archive, &dest, None).unwrap(), 2);
        assert_eq!(fs::read_to_string(dest.join("world/level.dat")).unwrap(), "level");
        assert_eq!(
            fs::read_to_string(dest.join("world/region/r.0.0.mca")).unwrap(),
            "chunks"
        );
        assert!(!dest.join("world/session.lock").exists());
    }

    #[test]
    fn strip_prefix_reroots_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("pack.zip");
        write_archive(
            &archive,
            &[
                ("manifest.json", "{}"),
                ("overrides/config/a.toml", "a"),
                ("overrides/mods/b.jar", "b"),
            ],
        );

        let dest = tmp.path().join("server");
        extract_zip(&archive, &dest, Some("overrides")).unwrap();
        assert!(dest.join("manifest.json").exists());
        assert_eq!(fs::read_to_string(dest.join("config/a.toml")).unwrap(), "a");
        assert!(dest.join("mods/b.jar").exists());
        assert!(!dest.join("overrides").exists());
    }

    #[test]
    fn escaping_entries_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("evil.zip");
        write_archive(&archive, &[("../escape.txt", "x"), ("ok.txt", "y")]);

        let dest = tmp.path().join("dest");
        assert_eq!(extract_zip(&archive, &dest, None).unwrap(), 1);
        assert!(dest.join("ok.txt").exists());
        assert!(!tmp.path().join("escape.txt").exists());
    }
}
