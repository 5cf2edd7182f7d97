use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use loadout_core::{
    ManifestId, ManifestInstaller, ManifestVersion, OfflineCache, SdkFeatureBand, WorkloadManifest,
};
use tracing::info;

use crate::fs_util::make_tmp_dir;
use crate::FsWorkloadInstaller;

impl ManifestInstaller for FsWorkloadInstaller {
    fn install_manifest(
        &self,
        manifest: &ManifestId,
        version: &ManifestVersion,
        band: &SdkFeatureBand,
        offline_cache: Option<&OfflineCache>,
    ) -> Result<()> {
        let source_root = match offline_cache {
            Some(cache) => cache.path().to_path_buf(),
            None => self.manifest_feed.clone().ok_or_else(|| {
                anyhow!("no manifest feed configured and no offline cache supplied")
            })?,
        };

        let source_path = source_root.join(format!("{manifest}.toml"));
        let raw = fs::read_to_string(&source_path).with_context(|| {
            format!("failed to read manifest source: {}", source_path.display())
        })?;

        let mut document = WorkloadManifest::from_toml_str(&raw)
            .with_context(|| format!("invalid manifest source: {}", source_path.display()))?;
        if &document.manifest_id != manifest {
            return Err(anyhow!(
                "manifest source declares id '{}', expected '{manifest}'",
                document.manifest_id
            ));
        }
        if &document.manifest_version != version {
            return Err(anyhow!(
                "manifest source declares version {}, expected {version}",
                document.manifest_version
            ));
        }

        // Pack paths in a feed document are relative to the feed root; the
        // installed copy must resolve on its own.
        absolutize_pack_paths(&mut document, &source_root);

        let serialized = document.to_toml_string()?;

        // Write-temp-then-rename keeps partial manifest writes unobservable
        // by later pack resolution.
        let staging = make_tmp_dir(&self.layout.tmp_dir(), "manifest")?;
        let staged_path = staging.join(format!("{manifest}.toml"));
        let target_path = self.layout.manifest_path(band, manifest);
        let result = write_and_commit(&staged_path, &target_path, &serialized);
        let _ = fs::remove_dir_all(&staging);
        result?;

        info!(manifest = %manifest, version = %version, band = %band, "installed manifest");
        Ok(())
    }
}

fn absolutize_pack_paths(document: &mut WorkloadManifest, source_root: &Path) {
    for pack in &mut document.packs {
        if pack.path.is_relative() {
            pack.path = source_root.join(&pack.path);
        }
    }
}

fn write_and_commit(staged_path: &Path, target_path: &Path, contents: &str) -> Result<()> {
    fs::write(staged_path, contents)
        .with_context(|| format!("failed to stage manifest: {}", staged_path.display()))?;
    if let Some(parent) = target_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::rename(staged_path, target_path)
        .with_context(|| format!("failed to commit manifest: {}", target_path.display()))
}
