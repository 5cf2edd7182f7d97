use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use loadout_core::{ManifestId, PackId, SdkFeatureBand};
use semver::Version;

/// Directory layout of a shared install root.
///
/// Pack content is shared across feature bands; per-band reference markers
/// and installation records live under `state/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRootLayout {
    root: PathBuf,
}

impl InstallRootLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn packs_dir(&self) -> PathBuf {
        self.root.join("packs")
    }

    pub fn pack_content_dir(&self, id: &PackId, version: &Version) -> PathBuf {
        self.packs_dir().join(id.as_str()).join(version.to_string())
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.state_dir().join("tmp")
    }

    pub fn pack_records_dir(&self) -> PathBuf {
        self.state_dir().join("pack-records")
    }

    pub fn pack_record_dir(&self, id: &PackId, version: &Version) -> PathBuf {
        self.pack_records_dir()
            .join(id.as_str())
            .join(version.to_string())
    }

    pub fn pack_record_path(
        &self,
        id: &PackId,
        version: &Version,
        band: &SdkFeatureBand,
    ) -> PathBuf {
        self.pack_record_dir(id, version).join(band.to_string())
    }

    pub fn workload_records_dir(&self) -> PathBuf {
        self.state_dir().join("workload-records")
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    pub fn band_manifests_dir(&self, band: &SdkFeatureBand) -> PathBuf {
        self.manifests_dir().join(band.to_string())
    }

    pub fn manifest_path(&self, band: &SdkFeatureBand, manifest: &ManifestId) -> PathBuf {
        self.band_manifests_dir(band)
            .join(format!("{manifest}.toml"))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir().join("lock")
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.packs_dir(),
            self.state_dir(),
            self.tmp_dir(),
            self.pack_records_dir(),
            self.workload_records_dir(),
            self.manifests_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

pub fn default_user_root() -> Result<PathBuf> {
    if cfg!(windows) {
        let app_data = std::env::var("LOCALAPPDATA")
            .context("LOCALAPPDATA is not set; cannot resolve Windows install root")?;
        return Ok(PathBuf::from(app_data).join("Loadout"));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve install root")?;
    Ok(PathBuf::from(home).join(".loadout"))
}
