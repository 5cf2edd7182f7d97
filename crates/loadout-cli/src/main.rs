use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use loadout_core::{
    install_workloads, uninstall_workloads, InstallationUnit, ManifestId, ManifestInstaller,
    ManifestVersion, OfflineCache, PackId, PackInfo, PackInstaller, RecordRepository,
    SdkFeatureBand, WorkloadId, WorkloadInstallError,
};
use loadout_installer::{
    default_user_root, workload_installer_for_unit, FsWorkloadInstaller, FsWorkloadResolver,
    InstallRootLayout, OperationLock,
};
use loadout_records::FsRecordRepository;

#[derive(Parser, Debug)]
#[command(name = "loadout")]
#[command(about = "Workload pack installer for versioned toolchains", long_about = None)]
struct Cli {
    /// Install root; defaults to the per-user location.
    #[arg(long)]
    root: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install one or more workloads for a feature band.
    Install {
        #[arg(required = true)]
        workloads: Vec<String>,
        #[arg(long)]
        band: String,
        /// Read pack content from this offline cache instead of the sources
        /// declared by the manifests.
        #[arg(long)]
        offline_cache: Option<PathBuf>,
    },
    /// Remove workload records and garbage collect unreferenced packs.
    Uninstall {
        #[arg(required = true)]
        workloads: Vec<String>,
        #[arg(long)]
        band: String,
    },
    /// List installed workloads, for one band or all of them.
    List {
        #[arg(long)]
        band: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// List the packs referenced by a feature band.
    ListPacks {
        #[arg(long)]
        band: String,
    },
    /// Delete packs no recorded workload references.
    Gc,
    /// Stage a pack into an offline cache without installing it.
    Cache {
        pack: String,
        #[arg(long)]
        band: String,
        /// Cache directory to stage into.
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        include_previews: bool,
    },
    /// Install or update a workload manifest for a feature band.
    UpdateManifest {
        manifest: String,
        #[arg(long)]
        version: String,
        #[arg(long)]
        band: String,
        /// Feed directory holding `<manifest-id>.toml`.
        #[arg(long)]
        from: Option<PathBuf>,
        #[arg(long)]
        offline_cache: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => default_user_root()?,
    };
    let layout = InstallRootLayout::new(root);

    match cli.command {
        Commands::Install {
            workloads,
            band,
            offline_cache,
        } => {
            let band = parse_band(&band)?;
            let workloads = parse_workloads(&workloads)?;
            let cache = offline_cache.map(OfflineCache::new);
            let installer = workload_installer_for_unit(InstallationUnit::Packs, layout.clone())?;
            let records = FsRecordRepository::new(layout.workload_records_dir());
            let resolver = FsWorkloadResolver::new(layout.clone());

            let _lock = OperationLock::acquire(&layout)?;
            let summary =
                install_workloads(&installer, &records, &resolver, &workloads, &band, cache.as_ref())?;
            for workload in &summary.installed_workloads {
                println!("installed {workload} ({band})");
            }
            for (id, version) in &summary.applied_packs {
                println!("  pack {id}@{version}");
            }
        }
        Commands::Uninstall { workloads, band } => {
            let band = parse_band(&band)?;
            let workloads = parse_workloads(&workloads)?;
            let installer = workload_installer_for_unit(InstallationUnit::Packs, layout.clone())?;
            let records = FsRecordRepository::new(layout.workload_records_dir());
            let resolver = FsWorkloadResolver::new(layout.clone());

            let _lock = OperationLock::acquire(&layout)?;
            let report =
                uninstall_workloads(&installer, &records, &resolver, &workloads, &band)?;
            for workload in &workloads {
                println!("uninstalled {workload} ({band})");
            }
            for (id, version) in &report.deleted_packs {
                println!("  removed pack {id}@{version}");
            }
        }
        Commands::List { band, json } => {
            let records = FsRecordRepository::new(layout.workload_records_dir());
            let bands = match band {
                Some(band) => vec![parse_band(&band)?],
                None => records.feature_bands_with_records()?,
            };

            if json {
                let mut document = serde_json::Map::new();
                for band in &bands {
                    let workloads: Vec<String> = records
                        .installed_workloads(band)?
                        .iter()
                        .map(ToString::to_string)
                        .collect();
                    document.insert(band.to_string(), serde_json::json!(workloads));
                }
                println!("{}", serde_json::to_string_pretty(&document)?);
            } else {
                for band in &bands {
                    for workload in records.installed_workloads(band)? {
                        println!("{workload} ({band})");
                    }
                }
            }
        }
        Commands::ListPacks { band } => {
            let band = parse_band(&band)?;
            let installer = FsWorkloadInstaller::new(layout);
            for pack in installer.installed_packs(&band)? {
                println!("{} ({})", pack, pack.kind);
            }
        }
        Commands::Gc => {
            let installer = workload_installer_for_unit(InstallationUnit::Packs, layout.clone())?;
            let records = FsRecordRepository::new(layout.workload_records_dir());
            let resolver = FsWorkloadResolver::new(layout.clone());

            let _lock = OperationLock::acquire(&layout)?;
            let report = installer.garbage_collect(&resolver, &records)?;
            if report.is_empty() {
                println!("nothing to collect");
            }
            for ((id, version), band) in &report.dropped_references {
                println!("dropped reference {id}@{version} ({band})");
            }
            for (id, version) in &report.deleted_packs {
                println!("removed pack {id}@{version}");
            }
        }
        Commands::Cache {
            pack,
            band,
            path,
            include_previews,
        } => {
            let band = parse_band(&band)?;
            let pack_id = PackId::new(&pack)?;
            let installer = FsWorkloadInstaller::new(layout.clone());
            let resolver = FsWorkloadResolver::new(layout);
            let pack = find_declared_pack(&resolver, &pack_id, &band)?;
            let cache = OfflineCache::new(path);
            std::fs::create_dir_all(cache.path())
                .with_context(|| format!("failed to create {}", cache.path().display()))?;

            installer.download_to_offline_cache(&pack, &cache, include_previews)?;
            println!("staged {pack} into {}", cache.path().display());
        }
        Commands::UpdateManifest {
            manifest,
            version,
            band,
            from,
            offline_cache,
        } => {
            let band = parse_band(&band)?;
            let manifest = ManifestId::new(&manifest)?;
            let version = ManifestVersion::from_str(&version)?;
            let cache = offline_cache.map(OfflineCache::new);
            let mut installer =
                workload_installer_for_unit(InstallationUnit::Packs, layout.clone())?;
            if let Some(feed) = from {
                installer = installer.with_manifest_feed(feed);
            }

            let _lock = OperationLock::acquire(&layout)?;
            installer
                .install_manifest(&manifest, &version, &band, cache.as_ref())
                .map_err(|cause| WorkloadInstallError::ManifestInstall {
                    manifest: manifest.clone(),
                    version: version.clone(),
                    band: band.clone(),
                    cause,
                })?;
            println!("installed manifest {manifest} {version} ({band})");
        }
    }

    Ok(())
}

fn parse_band(raw: &str) -> Result<SdkFeatureBand> {
    SdkFeatureBand::from_str(raw)
}

fn parse_workloads(raw: &[String]) -> Result<Vec<WorkloadId>> {
    raw.iter().map(|id| WorkloadId::new(id.as_str())).collect()
}

/// Looks a pack up in the band's installed manifests by id; the manifests
/// carry its version, kind, and source path.
fn find_declared_pack(
    resolver: &FsWorkloadResolver,
    pack_id: &PackId,
    band: &SdkFeatureBand,
) -> Result<PackInfo> {
    for manifest in resolver.installed_manifests(band)? {
        for entry in &manifest.packs {
            if &entry.id == pack_id {
                return Ok(PackInfo {
                    id: entry.id.clone(),
                    version: entry.version.clone(),
                    kind: entry.kind,
                    path: entry.path.clone(),
                });
            }
        }
    }
    Err(anyhow!(
        "pack '{pack_id}' is not declared by any manifest installed for band {band}"
    ))
}
