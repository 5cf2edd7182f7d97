use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use loadout_core::InstallationUnit;

mod fs_util;
mod gc;
mod layout;
mod lock;
mod manifests;
mod packs;
mod resolve;

pub use layout::{default_user_root, InstallRootLayout};
pub use lock::OperationLock;
pub use resolve::FsWorkloadResolver;

/// Pack-level workload installer over a shared install root.
///
/// Implements `PackInstaller` and `ManifestInstaller`. Mutating operations
/// expect the caller to hold the root's `OperationLock`; read-only queries
/// may run without it and tolerate momentarily stale results.
#[derive(Debug, Clone)]
pub struct FsWorkloadInstaller {
    layout: InstallRootLayout,
    manifest_feed: Option<PathBuf>,
}

impl FsWorkloadInstaller {
    pub fn new(layout: InstallRootLayout) -> Self {
        Self {
            layout,
            manifest_feed: None,
        }
    }

    /// Configures the directory manifests are fetched from when no offline
    /// cache is supplied.
    pub fn with_manifest_feed(mut self, feed: impl Into<PathBuf>) -> Self {
        self.manifest_feed = Some(feed.into());
        self
    }

    pub fn layout(&self) -> &InstallRootLayout {
        &self.layout
    }
}

/// Installer strategy for the requested installation unit. Only pack-level
/// installation is supported; alternate units are a defined error rather
/// than a panic.
pub fn workload_installer_for_unit(
    unit: InstallationUnit,
    layout: InstallRootLayout,
) -> Result<FsWorkloadInstaller> {
    match unit {
        InstallationUnit::Packs => {
            layout
                .ensure_base_dirs()
                .context("failed to prepare install root")?;
            Ok(FsWorkloadInstaller::new(layout))
        }
        InstallationUnit::Bundle => Err(anyhow!(
            "installation unit '{unit}' is not supported on this platform"
        )),
    }
}

#[cfg(test)]
mod tests;
