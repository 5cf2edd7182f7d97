use anyhow::{anyhow, Context};
use tracing::{info, warn};

use crate::error::WorkloadInstallError;
use crate::ids::{OfflineCache, SdkFeatureBand, WorkloadId};
use crate::pack::{PackInfo, PackKey};
use crate::traits::{GcReport, PackInstallOutcome, PackInstaller, RecordRepository, WorkloadResolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Pending,
    InstallingPacks,
    RecordingSuccess,
    RollingBack,
    Done,
    RolledBack,
    RollbackFailed,
}

/// Per-operation bookkeeping for the all-or-nothing install of a set of
/// workloads. Carried as an explicit value so concurrent operations in other
/// processes cannot corrupt each other's rollback ledgers.
#[derive(Debug)]
struct InstallOperation {
    band: SdkFeatureBand,
    state: OperationState,
    /// Packs this operation applied, in install order.
    applied_packs: Vec<PackInfo>,
    /// Workloads whose install this operation may have recorded. Includes
    /// the workload whose record write failed (the write is not guaranteed
    /// to have left no trace, and record deletion is idempotent) but never a
    /// workload recorded by an earlier completed operation: only facts this
    /// operation introduced are its to undo.
    records_to_undo: Vec<WorkloadId>,
}

impl InstallOperation {
    fn new(band: SdkFeatureBand) -> Self {
        Self {
            band,
            state: OperationState::Pending,
            applied_packs: Vec::new(),
            records_to_undo: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSummary {
    pub band: SdkFeatureBand,
    pub installed_workloads: Vec<WorkloadId>,
    /// Packs newly applied by this operation; shared packs that were already
    /// present are not listed.
    pub applied_packs: Vec<PackKey>,
}

/// Installs the requested workloads for a feature band, all or nothing.
///
/// Packs are installed one at a time in manifest order; a pack shared by
/// several requested workloads is installed once. The first failure, during
/// pack installation or while recording success, rolls back every pack this
/// operation applied (most recently installed first) and deletes any record
/// it may have written. A rollback step failure terminates the operation in
/// a fatal state carrying both errors.
pub fn install_workloads(
    installer: &dyn PackInstaller,
    records: &dyn RecordRepository,
    resolver: &dyn WorkloadResolver,
    workloads: &[WorkloadId],
    band: &SdkFeatureBand,
    offline_cache: Option<&OfflineCache>,
) -> Result<InstallSummary, WorkloadInstallError> {
    let mut operation = InstallOperation::new(band.clone());

    // Resolve the full plan before touching disk.
    let mut plan: Vec<(WorkloadId, Vec<PackInfo>)> = Vec::with_capacity(workloads.len());
    for workload in workloads {
        let packs = match resolver.resolve_packs(workload, band) {
            Ok(Some(packs)) => packs,
            Ok(None) => {
                return Err(WorkloadInstallError::WorkloadResolution {
                    workload: workload.clone(),
                    band: band.clone(),
                    cause: anyhow!("not defined by any installed manifest"),
                });
            }
            Err(cause) => {
                return Err(WorkloadInstallError::WorkloadResolution {
                    workload: workload.clone(),
                    band: band.clone(),
                    cause,
                });
            }
        };
        plan.push((workload.clone(), packs));
    }

    let queue = dedupe_packs(&plan);

    operation.state = OperationState::InstallingPacks;
    for pack in &queue {
        match installer.install_pack(pack, band, offline_cache) {
            Ok(PackInstallOutcome::Installed) => {
                info!(pack = %pack, band = %band, "installed pack");
                operation.applied_packs.push(pack.clone());
            }
            Ok(PackInstallOutcome::AlreadyPresent) => {
                info!(pack = %pack, band = %band, "pack already present, skipping");
            }
            Err(cause) => {
                let original = WorkloadInstallError::PackInstall {
                    pack: pack.id.clone(),
                    version: pack.version.clone(),
                    band: band.clone(),
                    cause,
                };
                return Err(roll_back(installer, records, &mut operation, original));
            }
        }
    }

    operation.state = OperationState::RecordingSuccess;
    if let Some((first, _)) = plan.first() {
        // A record that predates this operation must survive its rollback,
        // the same way an already-present pack stays out of the pack ledger.
        let preexisting = match records.installed_workloads(band) {
            Ok(workloads) => workloads,
            Err(cause) => {
                let original = WorkloadInstallError::RecordWrite {
                    workload: first.clone(),
                    band: band.clone(),
                    cause,
                };
                return Err(roll_back(installer, records, &mut operation, original));
            }
        };
        for (workload, _) in &plan {
            if !preexisting.contains(workload) {
                operation.records_to_undo.push(workload.clone());
            }
            if let Err(cause) = records.write_record(workload, band) {
                // An installed-but-unrecorded workload is inconsistent, so a
                // record failure takes the same rollback path as a pack
                // failure.
                let original = WorkloadInstallError::RecordWrite {
                    workload: workload.clone(),
                    band: band.clone(),
                    cause,
                };
                return Err(roll_back(installer, records, &mut operation, original));
            }
        }
    }

    operation.state = OperationState::Done;
    info!(
        band = %band,
        state = ?operation.state,
        workloads = workloads.len(),
        applied = operation.applied_packs.len(),
        "workload installation complete"
    );
    Ok(InstallSummary {
        band: band.clone(),
        installed_workloads: workloads.to_vec(),
        applied_packs: operation.applied_packs.iter().map(PackInfo::key).collect(),
    })
}

/// Removes the installation records for the given workloads, then runs
/// garbage collection to delete packs no longer referenced by any recorded
/// workload in any feature band.
pub fn uninstall_workloads(
    installer: &dyn PackInstaller,
    records: &dyn RecordRepository,
    resolver: &dyn WorkloadResolver,
    workloads: &[WorkloadId],
    band: &SdkFeatureBand,
) -> Result<GcReport, WorkloadInstallError> {
    for workload in workloads {
        records
            .delete_record(workload, band)
            .map_err(|cause| WorkloadInstallError::RecordWrite {
                workload: workload.clone(),
                band: band.clone(),
                cause,
            })?;
        info!(workload = %workload, band = %band, "deleted installation record");
    }

    installer
        .garbage_collect(resolver, records)
        .map_err(|cause| WorkloadInstallError::GarbageCollection { cause })
}

fn roll_back(
    installer: &dyn PackInstaller,
    records: &dyn RecordRepository,
    operation: &mut InstallOperation,
    original: WorkloadInstallError,
) -> WorkloadInstallError {
    operation.state = OperationState::RollingBack;
    warn!(
        band = %operation.band,
        applied = operation.applied_packs.len(),
        "install failed, rolling back: {original}"
    );

    // Undo order: most recently installed first.
    for pack in operation.applied_packs.iter().rev() {
        if let Err(cause) = installer
            .rollback_pack(pack, &operation.band)
            .with_context(|| format!("rolling back pack {pack}"))
        {
            operation.state = OperationState::RollbackFailed;
            return WorkloadInstallError::RollbackFailed {
                original: Box::new(original),
                cause,
            };
        }
    }

    for workload in &operation.records_to_undo {
        if let Err(cause) = records
            .delete_record(workload, &operation.band)
            .with_context(|| format!("deleting partial record for workload '{workload}'"))
        {
            operation.state = OperationState::RollbackFailed;
            return WorkloadInstallError::RollbackFailed {
                original: Box::new(original),
                cause,
            };
        }
    }

    operation.state = OperationState::RolledBack;
    warn!(band = %operation.band, state = ?operation.state, "rollback complete, no net change");
    original
}

/// Flattens the per-workload pack lists into a single install queue,
/// preserving manifest order and installing each (id, version) once.
fn dedupe_packs(plan: &[(WorkloadId, Vec<PackInfo>)]) -> Vec<PackInfo> {
    let mut seen: Vec<PackKey> = Vec::new();
    let mut queue = Vec::new();
    for (_, packs) in plan {
        for pack in packs {
            let key = pack.key();
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            queue.push(pack.clone());
        }
    }
    queue
}
