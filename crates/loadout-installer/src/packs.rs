use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use loadout_core::{
    GcReport, OfflineCache, PackId, PackInfo, PackInstallOutcome, PackInstaller, PackKind,
    RecordRepository, SdkFeatureBand, WorkloadResolver,
};
use semver::Version;
use tracing::{debug, info};

use crate::fs_util::{
    copy_dir_recursive, current_unix_timestamp, dir_is_empty, make_tmp_dir, move_dir_or_copy,
    remove_dir_all_if_exists, remove_dir_if_empty, remove_file_if_exists,
};
use crate::gc::collect_garbage;
use crate::FsWorkloadInstaller;

impl PackInstaller for FsWorkloadInstaller {
    fn install_pack(
        &self,
        pack: &PackInfo,
        band: &SdkFeatureBand,
        offline_cache: Option<&OfflineCache>,
    ) -> Result<PackInstallOutcome> {
        let content_dir = self.layout.pack_content_dir(&pack.id, &pack.version);
        let marker_path = self.layout.pack_record_path(&pack.id, &pack.version, band);
        if content_dir.exists() && marker_path.exists() {
            debug!(pack = %pack, band = %band, "pack already installed");
            return Ok(PackInstallOutcome::AlreadyPresent);
        }

        if !content_dir.exists() {
            let source = pack_source_dir(pack, offline_cache)?;
            let staging = make_tmp_dir(&self.layout.tmp_dir(), "pack")?;
            let staged = staging.join("content");

            let result = copy_dir_recursive(&source, &staged)
                .and_then(|_| move_dir_or_copy(&staged, &content_dir));
            let _ = fs::remove_dir_all(&staging);
            result.with_context(|| format!("failed to install pack {pack}"))?;
        }

        write_pack_record(&marker_path, pack)?;
        info!(pack = %pack, band = %band, "materialized pack");
        Ok(PackInstallOutcome::Installed)
    }

    fn rollback_pack(&self, pack: &PackInfo, band: &SdkFeatureBand) -> Result<()> {
        let marker_path = self.layout.pack_record_path(&pack.id, &pack.version, band);
        remove_file_if_exists(&marker_path)
            .with_context(|| format!("failed to drop pack reference for {pack}"))?;

        // Content goes only when no other feature band still references it.
        let record_dir = self.layout.pack_record_dir(&pack.id, &pack.version);
        if dir_is_empty(&record_dir)? {
            remove_dir_all_if_exists(&self.layout.pack_content_dir(&pack.id, &pack.version))
                .with_context(|| format!("failed to remove content of pack {pack}"))?;
            remove_dir_if_empty(&record_dir)?;
            remove_dir_if_empty(&self.layout.pack_records_dir().join(pack.id.as_str()))?;
            remove_dir_if_empty(&self.layout.packs_dir().join(pack.id.as_str()))?;
        }

        info!(pack = %pack, band = %band, "rolled back pack");
        Ok(())
    }

    fn installed_packs(&self, band: &SdkFeatureBand) -> Result<Vec<PackInfo>> {
        let records_dir = self.layout.pack_records_dir();
        let mut packs = Vec::new();
        for (marker_path, marker_band) in pack_record_markers(&records_dir)? {
            if &marker_band != band {
                continue;
            }
            let raw = fs::read_to_string(&marker_path).with_context(|| {
                format!("failed to read pack record: {}", marker_path.display())
            })?;
            let pack = parse_pack_record(&raw).with_context(|| {
                format!("failed to parse pack record: {}", marker_path.display())
            })?;
            packs.push(pack);
        }

        packs.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(packs)
    }

    fn download_to_offline_cache(
        &self,
        pack: &PackInfo,
        cache: &OfflineCache,
        include_previews: bool,
    ) -> Result<()> {
        if !include_previews && !pack.version.pre.is_empty() {
            return Err(anyhow!(
                "pack {pack} is a preview version and previews were not requested"
            ));
        }

        if !pack.path.is_dir() {
            return Err(anyhow!(
                "pack {pack} has no content at its source path: {}",
                pack.path.display()
            ));
        }

        let destination = cache.pack_dir(&pack.id, &pack.version);
        if destination.exists() {
            debug!(pack = %pack, cache = %cache.path().display(), "pack already staged");
            return Ok(());
        }

        let staging = make_tmp_dir(cache.path(), ".staging")?;
        let staged = staging.join("content");
        let result = copy_dir_recursive(&pack.path, &staged)
            .and_then(|_| move_dir_or_copy(&staged, &destination));
        let _ = fs::remove_dir_all(&staging);
        result.with_context(|| format!("failed to stage pack {pack} into offline cache"))?;

        info!(pack = %pack, cache = %cache.path().display(), "staged pack into offline cache");
        Ok(())
    }

    fn garbage_collect(
        &self,
        resolver: &dyn WorkloadResolver,
        records: &dyn RecordRepository,
    ) -> Result<GcReport> {
        collect_garbage(&self.layout, resolver, records)
    }
}

fn pack_source_dir(pack: &PackInfo, offline_cache: Option<&OfflineCache>) -> Result<PathBuf> {
    let source = match offline_cache {
        Some(cache) => {
            let dir = cache.pack_dir(&pack.id, &pack.version);
            if !dir.is_dir() {
                return Err(anyhow!(
                    "pack {pack} is not staged in offline cache: {}",
                    dir.display()
                ));
            }
            dir
        }
        None => {
            if !pack.path.is_dir() {
                return Err(anyhow!(
                    "pack {pack} has no content at its source path: {}",
                    pack.path.display()
                ));
            }
            pack.path.clone()
        }
    };
    Ok(source)
}

fn write_pack_record(marker_path: &Path, pack: &PackInfo) -> Result<()> {
    if let Some(parent) = marker_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut payload = String::new();
    payload.push_str(&format!("id={}\n", pack.id));
    payload.push_str(&format!("version={}\n", pack.version));
    payload.push_str(&format!("kind={}\n", pack.kind));
    payload.push_str(&format!("path={}\n", pack.path.display()));
    payload.push_str(&format!("installed_at_unix={}\n", current_unix_timestamp()?));

    fs::write(marker_path, payload.as_bytes())
        .with_context(|| format!("failed to write pack record: {}", marker_path.display()))
}

pub(crate) fn parse_pack_record(raw: &str) -> Result<PackInfo> {
    let mut id = None;
    let mut version = None;
    let mut kind = None;
    let mut path = None;

    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        match k {
            "id" => id = Some(PackId::new(v)?),
            "version" => version = Some(Version::parse(v).context("invalid version")?),
            "kind" => kind = Some(PackKind::parse(v)?),
            "path" => path = Some(PathBuf::from(v)),
            _ => {}
        }
    }

    Ok(PackInfo {
        id: id.context("missing id")?,
        version: version.context("missing version")?,
        kind: kind.context("missing kind")?,
        path: path.context("missing path")?,
    })
}

/// All per-band reference markers under the pack-records tree, as
/// (marker path, feature band) pairs. Unparseable stray entries are skipped.
pub(crate) fn pack_record_markers(
    records_dir: &Path,
) -> Result<Vec<(PathBuf, SdkFeatureBand)>> {
    let mut markers = Vec::new();
    let id_entries = match fs::read_dir(records_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(markers),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read {}", records_dir.display()));
        }
    };

    for id_entry in id_entries {
        let id_dir = id_entry?.path();
        if !id_dir.is_dir() {
            continue;
        }
        for version_entry in fs::read_dir(&id_dir)
            .with_context(|| format!("failed to read {}", id_dir.display()))?
        {
            let version_dir = version_entry?.path();
            if !version_dir.is_dir() {
                continue;
            }
            for marker_entry in fs::read_dir(&version_dir)
                .with_context(|| format!("failed to read {}", version_dir.display()))?
            {
                let marker_path = marker_entry?.path();
                if !marker_path.is_file() {
                    continue;
                }
                let Some(name) = marker_path.file_name().and_then(|v| v.to_str()) else {
                    continue;
                };
                let Ok(band) = SdkFeatureBand::from_str(name) else {
                    continue;
                };
                markers.push((marker_path, band));
            }
        }
    }

    Ok(markers)
}
