use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::ids::{ManifestId, ManifestVersion, PackId, WorkloadId};
use crate::pack::{PackInfo, PackKind};

/// The document mapping workloads to the packs that compose them, versioned
/// per feature band.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkloadManifest {
    pub manifest_id: ManifestId,
    pub manifest_version: ManifestVersion,
    #[serde(default)]
    pub workloads: Vec<WorkloadEntry>,
    #[serde(default)]
    pub packs: Vec<PackEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkloadEntry {
    pub id: WorkloadId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub packs: Vec<PackId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackEntry {
    pub id: PackId,
    pub version: Version,
    pub kind: PackKind,
    pub path: PathBuf,
}

impl WorkloadManifest {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let manifest: Self =
            toml::from_str(input).context("failed to parse workload manifest")?;

        let mut pack_ids = HashSet::new();
        for pack in &manifest.packs {
            if !pack_ids.insert(&pack.id) {
                return Err(anyhow!(
                    "manifest '{}' declares pack '{}' more than once",
                    manifest.manifest_id,
                    pack.id
                ));
            }
        }

        let mut workload_ids = HashSet::new();
        for workload in &manifest.workloads {
            if !workload_ids.insert(&workload.id) {
                return Err(anyhow!(
                    "manifest '{}' declares workload '{}' more than once",
                    manifest.manifest_id,
                    workload.id
                ));
            }
            for pack_ref in &workload.packs {
                if !pack_ids.contains(pack_ref) {
                    return Err(anyhow!(
                        "workload '{}' references undeclared pack '{}' in manifest '{}'",
                        workload.id,
                        pack_ref,
                        manifest.manifest_id
                    ));
                }
            }
        }

        Ok(manifest)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).with_context(|| {
            format!("failed to serialize workload manifest '{}'", self.manifest_id)
        })
    }

    pub fn defines_workload(&self, workload: &WorkloadId) -> bool {
        self.workloads.iter().any(|entry| &entry.id == workload)
    }

    /// Ordered pack set for a workload, in manifest declaration order.
    /// `None` when the workload is not defined by this manifest.
    pub fn resolve_packs(&self, workload: &WorkloadId) -> Option<Vec<PackInfo>> {
        let entry = self.workloads.iter().find(|entry| &entry.id == workload)?;
        let packs = entry
            .packs
            .iter()
            .filter_map(|pack_ref| {
                self.packs
                    .iter()
                    .find(|pack| &pack.id == pack_ref)
                    .map(|pack| PackInfo {
                        id: pack.id.clone(),
                        version: pack.version.clone(),
                        kind: pack.kind,
                        path: pack.path.clone(),
                    })
            })
            .collect();
        Some(packs)
    }
}
