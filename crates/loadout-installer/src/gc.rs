use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::str::FromStr;

use anyhow::{Context, Result};
use loadout_core::{
    GcReport, PackId, PackKey, RecordRepository, SdkFeatureBand, WorkloadResolver,
};
use semver::Version;
use tracing::{info, warn};

use crate::fs_util::{remove_dir_all_if_exists, remove_dir_if_empty, remove_file_if_exists};
use crate::layout::InstallRootLayout;
use crate::packs::pack_record_markers;

/// Reconciles on-disk packs against the record store.
///
/// A pack reference marker survives only while its feature band has a
/// recorded workload that reaches the pack through the band's active
/// manifests; pack content survives only while at least one marker remains.
/// Idempotent; packs orphaned by a process killed mid-install carry no
/// record and are removed by the next pass. The caller holds the operation
/// lock, so no install or rollback is in flight while this runs.
pub(crate) fn collect_garbage(
    layout: &InstallRootLayout,
    resolver: &dyn WorkloadResolver,
    records: &dyn RecordRepository,
) -> Result<GcReport> {
    let referenced = referenced_packs(resolver, records)?;
    let mut report = GcReport::default();

    for (marker_path, band) in pack_record_markers(&layout.pack_records_dir())? {
        let Some(key) = pack_key_for_marker(layout, &marker_path) else {
            warn!(marker = %marker_path.display(), "skipping unparseable pack record entry");
            continue;
        };
        let still_referenced = referenced
            .get(&band)
            .map_or(false, |packs| packs.contains(&key));
        if still_referenced {
            continue;
        }

        remove_file_if_exists(&marker_path)
            .with_context(|| format!("failed to drop pack reference: {}", marker_path.display()))?;
        if let Some(version_dir) = marker_path.parent() {
            remove_dir_if_empty(version_dir)?;
            if let Some(id_dir) = version_dir.parent() {
                remove_dir_if_empty(id_dir)?;
            }
        }
        report.dropped_references.push((key, band));
    }

    for key in unreferenced_content(layout)? {
        let (id, version) = &key;
        let content_dir = layout.pack_content_dir(id, version);
        remove_dir_all_if_exists(&content_dir)
            .with_context(|| format!("failed to delete pack content: {}", content_dir.display()))?;
        remove_dir_if_empty(&layout.packs_dir().join(id.as_str()))?;
        info!(pack = %id, version = %version, "garbage collected pack");
        report.deleted_packs.push(key);
    }

    report.dropped_references.sort();
    report.deleted_packs.sort();
    Ok(report)
}

/// Packs reachable from any recorded workload, per feature band. A recorded
/// workload whose manifest is gone contributes nothing.
fn referenced_packs(
    resolver: &dyn WorkloadResolver,
    records: &dyn RecordRepository,
) -> Result<BTreeMap<SdkFeatureBand, BTreeSet<PackKey>>> {
    let mut referenced: BTreeMap<SdkFeatureBand, BTreeSet<PackKey>> = BTreeMap::new();
    for band in records.feature_bands_with_records()? {
        for workload in records.installed_workloads(&band)? {
            if let Some(packs) = resolver.resolve_packs(&workload, &band)? {
                referenced
                    .entry(band.clone())
                    .or_default()
                    .extend(packs.iter().map(|pack| pack.key()));
            }
        }
    }
    Ok(referenced)
}

fn pack_key_for_marker(
    layout: &InstallRootLayout,
    marker_path: &std::path::Path,
) -> Option<PackKey> {
    let rel = marker_path.strip_prefix(layout.pack_records_dir()).ok()?;
    let mut components = rel.components();
    let id = PackId::new(components.next()?.as_os_str().to_str()?).ok()?;
    let version = Version::parse(components.next()?.as_os_str().to_str()?).ok()?;
    Some((id, version))
}

/// Content dirs under `packs/` with no remaining reference marker.
fn unreferenced_content(layout: &InstallRootLayout) -> Result<Vec<PackKey>> {
    let packs_dir = layout.packs_dir();
    let id_entries = match fs::read_dir(&packs_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", packs_dir.display()));
        }
    };

    let mut orphaned = Vec::new();
    for id_entry in id_entries {
        let id_dir = id_entry?.path();
        if !id_dir.is_dir() {
            continue;
        }
        let Some(id) = id_dir
            .file_name()
            .and_then(|v| v.to_str())
            .and_then(|v| PackId::new(v).ok())
        else {
            continue;
        };
        for version_entry in
            fs::read_dir(&id_dir).with_context(|| format!("failed to read {}", id_dir.display()))?
        {
            let version_dir = version_entry?.path();
            if !version_dir.is_dir() {
                continue;
            }
            let Some(version) = version_dir
                .file_name()
                .and_then(|v| v.to_str())
                .and_then(|v| Version::from_str(v).ok())
            else {
                continue;
            };

            let record_dir = layout.pack_record_dir(&id, &version);
            if crate::fs_util::dir_is_empty(&record_dir)? {
                orphaned.push((id.clone(), version));
            }
        }
    }

    Ok(orphaned)
}
