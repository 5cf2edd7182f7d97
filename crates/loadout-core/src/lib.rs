mod error;
mod ids;
mod manifest;
mod orchestrate;
mod pack;
mod traits;

pub use error::WorkloadInstallError;
pub use ids::{
    InstallationUnit, ManifestId, ManifestVersion, OfflineCache, PackId, SdkFeatureBand,
    WorkloadId,
};
pub use manifest::{PackEntry, WorkloadEntry, WorkloadManifest};
pub use orchestrate::{install_workloads, uninstall_workloads, InstallSummary, OperationState};
pub use pack::{PackInfo, PackKey, PackKind};
pub use traits::{
    GcReport, ManifestInstaller, PackInstallOutcome, PackInstaller, RecordRepository,
    WorkloadResolver,
};
