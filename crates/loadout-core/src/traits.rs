use anyhow::Result;

use crate::ids::{ManifestId, ManifestVersion, OfflineCache, SdkFeatureBand, WorkloadId};
use crate::pack::{PackInfo, PackKey};

/// Whether an install call changed on-disk state. Only packs this operation
/// actually applied enter the rollback ledger; a pack left over from an
/// earlier operation must survive this operation's rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackInstallOutcome {
    Installed,
    AlreadyPresent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Packs whose content directory was deleted.
    pub deleted_packs: Vec<PackKey>,
    /// Per-band reference markers dropped because the band no longer
    /// references the pack.
    pub dropped_references: Vec<(PackKey, SdkFeatureBand)>,
}

impl GcReport {
    pub fn is_empty(&self) -> bool {
        self.deleted_packs.is_empty() && self.dropped_references.is_empty()
    }
}

/// Applies and removes individual pack artifacts under the install root.
pub trait PackInstaller {
    /// Materializes the pack's content for the given feature band. Reads from
    /// `offline_cache` when present instead of the pack's source path. Safe to
    /// call for a pack that is already present.
    fn install_pack(
        &self,
        pack: &PackInfo,
        band: &SdkFeatureBand,
        offline_cache: Option<&OfflineCache>,
    ) -> Result<PackInstallOutcome>;

    /// Removes a pack installed earlier in the same logical operation. Safe
    /// even when the pack was only partially installed. A failure here must
    /// be surfaced, never absorbed: losing it could leave disk state
    /// inconsistent with the record store.
    fn rollback_pack(&self, pack: &PackInfo, band: &SdkFeatureBand) -> Result<()>;

    /// Read-only view of the packs referenced by the given feature band.
    /// Empty for a band that was never installed to.
    fn installed_packs(&self, band: &SdkFeatureBand) -> Result<Vec<PackInfo>>;

    /// Stages pack content into the cache without installing it. With
    /// `include_previews` false, prerelease pack versions are rejected.
    fn download_to_offline_cache(
        &self,
        pack: &PackInfo,
        cache: &OfflineCache,
        include_previews: bool,
    ) -> Result<()>;

    /// Reconciles installed packs against the record store and removes packs
    /// referenced by no recorded workload in any feature band. Must not run
    /// concurrently with an install or rollback in flight.
    fn garbage_collect(
        &self,
        resolver: &dyn WorkloadResolver,
        records: &dyn RecordRepository,
    ) -> Result<GcReport>;
}

/// Installs and updates the manifest used to resolve workload-to-pack
/// mappings for a feature band.
pub trait ManifestInstaller {
    /// Atomically replaces the band's copy of the manifest; a partial
    /// manifest write is never observable by later pack resolution.
    fn install_manifest(
        &self,
        manifest: &ManifestId,
        version: &ManifestVersion,
        band: &SdkFeatureBand,
        offline_cache: Option<&OfflineCache>,
    ) -> Result<()>;
}

/// Durable ledger of which workloads are installed per feature band.
pub trait RecordRepository {
    /// Appends the durable fact "(workload, band) is installed". Writing the
    /// same fact twice is a no-op; the ledger has set semantics.
    fn write_record(&self, workload: &WorkloadId, band: &SdkFeatureBand) -> Result<()>;

    /// Removes the fact if present; a no-op when absent.
    fn delete_record(&self, workload: &WorkloadId, band: &SdkFeatureBand) -> Result<()>;

    /// Sorted, deduplicated. Empty for an unknown band.
    fn installed_workloads(&self, band: &SdkFeatureBand) -> Result<Vec<WorkloadId>>;

    fn feature_bands_with_records(&self) -> Result<Vec<SdkFeatureBand>>;
}

/// External collaborator mapping a workload to its ordered pack set through
/// the feature band's active manifests.
pub trait WorkloadResolver {
    /// `None` when no installed manifest for the band defines the workload.
    fn resolve_packs(
        &self,
        workload: &WorkloadId,
        band: &SdkFeatureBand,
    ) -> Result<Option<Vec<PackInfo>>>;

    fn known_workloads(&self, band: &SdkFeatureBand) -> Result<Vec<WorkloadId>>;
}
