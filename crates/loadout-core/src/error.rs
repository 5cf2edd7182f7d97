use semver::Version;
use thiserror::Error;

use crate::ids::{ManifestId, ManifestVersion, PackId, SdkFeatureBand, WorkloadId};

/// Failure modes of a workload install/uninstall operation.
///
/// Every kind except `RollbackFailed` leaves the install root consistent:
/// either the operation was rolled back completely or it never started.
/// `RollbackFailed` is fatal and non-retryable; it carries the error that
/// triggered the rollback so neither failure is lost.
#[derive(Debug, Error)]
pub enum WorkloadInstallError {
    #[error("workload '{workload}' could not be resolved for feature band {band}: {cause:#}")]
    WorkloadResolution {
        workload: WorkloadId,
        band: SdkFeatureBand,
        cause: anyhow::Error,
    },

    #[error("failed to install pack {pack}@{version} for feature band {band}: {cause:#}")]
    PackInstall {
        pack: PackId,
        version: Version,
        band: SdkFeatureBand,
        cause: anyhow::Error,
    },

    #[error(
        "failed to record installation of workload '{workload}' for feature band {band}: {cause:#}"
    )]
    RecordWrite {
        workload: WorkloadId,
        band: SdkFeatureBand,
        cause: anyhow::Error,
    },

    #[error("failed to install manifest {manifest}@{version} for feature band {band}: {cause:#}")]
    ManifestInstall {
        manifest: ManifestId,
        version: ManifestVersion,
        band: SdkFeatureBand,
        cause: anyhow::Error,
    },

    #[error("garbage collection failed: {cause:#}")]
    GarbageCollection { cause: anyhow::Error },

    #[error(
        "rollback did not complete: {cause:#} (triggered by: {original}); \
         the install root may disagree with the installation records and requires manual repair"
    )]
    RollbackFailed {
        original: Box<WorkloadInstallError>,
        cause: anyhow::Error,
    },
}

impl WorkloadInstallError {
    /// The error that triggered the rollback, when this is a rollback failure.
    pub fn original(&self) -> Option<&WorkloadInstallError> {
        match self {
            Self::RollbackFailed { original, .. } => Some(original),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RollbackFailed { .. })
    }
}
