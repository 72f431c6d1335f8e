use anyhow::{anyhow, Context};
use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

use crate::utils::extract_zip;

const MANIFEST_FILE: &str = "manifest.json";

/// Where modpack bundles come from. `install` fetches the bundle for
/// `id`/`version` into `dest` and returns the path of the archive it
/// produced; `unpack` lays the bundle out over the server directory.
#[async_trait]
pub trait PackageSource: Send + Sync {
    async fn install(&self, id: &str, version: &str, dest: &Path) -> anyhow::Result<PathBuf>;

    async fn unpack(&self, archive: &Path, dest: &Path) -> anyhow::Result<()> {
        let archive = archive.to_path_buf();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || unpack_bundle(&archive, &dest)).await?
    }
}

#[derive(Debug, Default, Deserialize)]
struct BundleManifest {
    #[serde(default)]
    overrides: Option<String>,
}

/// Extracts a modpack bundle. Entries under the manifest's overrides
/// folder land at the root of `dest`; everything else keeps its path.
pub fn unpack_bundle(archive: &Path, dest: &Path) -> anyhow::Result<()> {
    let manifest = read_manifest(archive)?;
    let overrides = manifest.overrides.filter(|o| !o.trim().is_empty());
    debug!(
        "unpacking {} (overrides: {})",
        archive.display(),
        overrides.as_deref().unwrap_or("-")
    );

    let files = extract_zip(archive, dest, overrides.as_deref())
        .with_context(|| format!("failed to extract {}", archive.display()))?;
    info!("unpacked {} files into {}", files, dest.display());
    Ok(())
}

fn read_manifest(archive: &Path) -> anyhow::Result<BundleManifest> {
    let file = File::open(archive).with_context(|| format!("cannot open {}", archive.display()))?;
    let mut archive = ZipArchive::new(file)?;
    let mut manifest = match archive.by_name(MANIFEST_FILE) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(BundleManifest::default()),
        Err(err) => return Err(err.into()),
    };
    let mut content = String::new();
    manifest.read_to_string(&mut content)?;
    serde_json::from_str(&content).context("invalid manifest.json")
}

/// Treats the package id as the path of a bundle already on disk, which
/// is copied next to the server before unpacking.
#[derive(Debug, Default, Clone)]
pub struct ArchiveFileSource;

#[async_trait]
impl PackageSource for ArchiveFileSource {
    async fn install(&self, id: &str, _version: &str, dest: &Path) -> anyhow::Result<PathBuf> {
        let source = PathBuf::from(id);
        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Err(anyhow!("modpack bundle not found: {}", source.display()));
        }
        let file_name = source
            .file_name()
            .ok_or_else(|| anyhow!("invalid modpack bundle path: {}", id))?;

        tokio::fs::create_dir_all(dest).await?;
        let target = dest.join(file_name);
        tokio::fs::copy(&source, &target)
            .await
            .with_context(|| format!("failed to copy {}", source.display()))?;
        Ok(target)
    }
}
