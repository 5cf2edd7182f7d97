use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use loadout_core::{RecordRepository, SdkFeatureBand, WorkloadId};
use tracing::debug;

/// Filesystem-backed installation record store.
///
/// One marker file per (feature band, workload) under the records root:
/// `<root>/<band>/<workload>.record`. A record is a single durable fact, so
/// the store has set semantics: writing the same record twice is a no-op.
/// Records are written to a temp file and renamed into place so a crash
/// mid-write cannot leave a half-written record behind.
#[derive(Debug, Clone)]
pub struct FsRecordRepository {
    records_root: PathBuf,
}

impl FsRecordRepository {
    pub fn new(records_root: impl Into<PathBuf>) -> Self {
        Self {
            records_root: records_root.into(),
        }
    }

    pub fn records_root(&self) -> &Path {
        &self.records_root
    }

    fn band_dir(&self, band: &SdkFeatureBand) -> PathBuf {
        self.records_root.join(band.to_string())
    }

    fn record_path(&self, workload: &WorkloadId, band: &SdkFeatureBand) -> PathBuf {
        self.band_dir(band).join(format!("{workload}.record"))
    }
}

impl RecordRepository for FsRecordRepository {
    fn write_record(&self, workload: &WorkloadId, band: &SdkFeatureBand) -> Result<()> {
        let path = self.record_path(workload, band);
        if path.exists() {
            debug!(workload = %workload, band = %band, "record already present");
            return Ok(());
        }

        let dir = self.band_dir(band);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create record dir: {}", dir.display()))?;

        let tmp_path = dir.join(format!(
            ".{workload}.record.tmp-{}-{}",
            std::process::id(),
            current_unix_nanos()?
        ));
        let payload = format!(
            "workload={workload}\nfeature_band={band}\ninstalled_at_unix={}\n",
            current_unix_timestamp()?
        );
        let mut file = fs::File::create(&tmp_path)
            .with_context(|| format!("failed to create record file: {}", tmp_path.display()))?;
        file.write_all(payload.as_bytes())
            .with_context(|| format!("failed to write record file: {}", tmp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to flush record file: {}", tmp_path.display()))?;
        drop(file);

        fs::rename(&tmp_path, &path).with_context(|| {
            format!("failed to commit record file: {}", path.display())
        })?;
        debug!(workload = %workload, band = %band, "wrote installation record");
        Ok(())
    }

    fn delete_record(&self, workload: &WorkloadId, band: &SdkFeatureBand) -> Result<()> {
        let path = self.record_path(workload, band);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(workload = %workload, band = %band, "deleted installation record");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("failed to delete record file: {}", path.display())),
        }
    }

    fn installed_workloads(&self, band: &SdkFeatureBand) -> Result<Vec<WorkloadId>> {
        let dir = self.band_dir(band);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read record dir: {}", dir.display()));
            }
        };

        let mut workloads = Vec::new();
        for entry in entries {
            let entry = entry
                .with_context(|| format!("failed to read record dir entry: {}", dir.display()))?;
            let path = entry.path();
            if path.extension().and_then(|v| v.to_str()) != Some("record") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|v| v.to_str()) else {
                continue;
            };
            let workload = WorkloadId::new(stem)
                .with_context(|| format!("invalid record file name: {}", path.display()))?;
            workloads.push(workload);
        }

        workloads.sort();
        workloads.dedup();
        Ok(workloads)
    }

    fn feature_bands_with_records(&self) -> Result<Vec<SdkFeatureBand>> {
        let entries = match fs::read_dir(&self.records_root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!(
                        "failed to read records root: {}",
                        self.records_root.display()
                    )
                });
            }
        };

        let mut bands = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| {
                format!(
                    "failed to read records root entry: {}",
                    self.records_root.display()
                )
            })?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Ok(band) = SdkFeatureBand::from_str(&name) else {
                continue;
            };
            if !self.installed_workloads(&band)?.is_empty() {
                bands.push(band);
            }
        }

        bands.sort();
        bands.dedup();
        Ok(bands)
    }
}

fn current_unix_timestamp() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_secs())
}

fn current_unix_nanos() -> Result<u128> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_nanos())
}
