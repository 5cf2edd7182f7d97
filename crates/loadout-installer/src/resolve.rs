use std::fs;
use std::io;

use anyhow::{Context, Result};
use loadout_core::{PackInfo, SdkFeatureBand, WorkloadId, WorkloadManifest, WorkloadResolver};

use crate::layout::InstallRootLayout;

/// Resolves workloads through the manifests installed for a feature band.
#[derive(Debug, Clone)]
pub struct FsWorkloadResolver {
    layout: InstallRootLayout,
}

impl FsWorkloadResolver {
    pub fn new(layout: InstallRootLayout) -> Self {
        Self { layout }
    }

    /// Every manifest installed for the band, in manifest-id order.
    pub fn installed_manifests(&self, band: &SdkFeatureBand) -> Result<Vec<WorkloadManifest>> {
        let dir = self.layout.band_manifests_dir(band);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read manifest dir: {}", dir.display()));
            }
        };

        let mut manifests = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("failed to read manifest dir entry: {}", dir.display()))?
                .path();
            if path.extension().and_then(|v| v.to_str()) != Some("toml") {
                continue;
            }
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read manifest: {}", path.display()))?;
            let manifest = WorkloadManifest::from_toml_str(&raw)
                .with_context(|| format!("failed to parse manifest: {}", path.display()))?;
            manifests.push(manifest);
        }

        manifests.sort_by(|a, b| a.manifest_id.cmp(&b.manifest_id));
        Ok(manifests)
    }
}

impl WorkloadResolver for FsWorkloadResolver {
    fn resolve_packs(
        &self,
        workload: &WorkloadId,
        band: &SdkFeatureBand,
    ) -> Result<Option<Vec<PackInfo>>> {
        for manifest in self.installed_manifests(band)? {
            if let Some(packs) = manifest.resolve_packs(workload) {
                return Ok(Some(packs));
            }
        }
        Ok(None)
    }

    fn known_workloads(&self, band: &SdkFeatureBand) -> Result<Vec<WorkloadId>> {
        let mut workloads = Vec::new();
        for manifest in self.installed_manifests(band)? {
            workloads.extend(manifest.workloads.iter().map(|entry| entry.id.clone()));
        }
        workloads.sort();
        workloads.dedup();
        Ok(workloads)
    }
}
