use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use loadout_core::{
    install_workloads, uninstall_workloads, InstallationUnit, ManifestId, ManifestInstaller,
    ManifestVersion, OfflineCache, PackId, PackInfo, PackInstallOutcome, PackInstaller, PackKind,
    RecordRepository, SdkFeatureBand, WorkloadId, WorkloadInstallError, WorkloadResolver,
};
use loadout_records::FsRecordRepository;
use semver::Version;

use crate::{
    workload_installer_for_unit, FsWorkloadInstaller, FsWorkloadResolver, InstallRootLayout,
    OperationLock,
};

fn test_root(label: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    path.push(format!(
        "loadout-installer-{label}-{}-{}",
        std::process::id(),
        nanos
    ));
    path
}

fn test_layout(root: &Path) -> InstallRootLayout {
    let layout = InstallRootLayout::new(root.join("install-root"));
    layout.ensure_base_dirs().expect("must create dirs");
    layout
}

fn band(version: &str) -> SdkFeatureBand {
    SdkFeatureBand::from_str(version).expect("must parse feature band")
}

fn workload(id: &str) -> WorkloadId {
    WorkloadId::new(id).expect("must build workload id")
}

/// Lays out a pack content dir in the feed and returns its descriptor.
fn feed_pack(feed: &Path, id: &str, version: &str, kind: PackKind) -> PackInfo {
    let dir = feed.join("packs").join(id).join(version);
    fs::create_dir_all(&dir).expect("must create feed pack dir");
    fs::write(dir.join("payload.bin"), format!("{id}@{version}")).expect("must write payload");
    PackInfo {
        id: PackId::new(id).expect("must build pack id"),
        version: Version::parse(version).expect("must parse version"),
        kind,
        path: dir,
    }
}

fn write_feed_manifest(feed: &Path, manifest_id: &str, raw: &str) -> PathBuf {
    fs::create_dir_all(feed).expect("must create feed dir");
    let path = feed.join(format!("{manifest_id}.toml"));
    fs::write(&path, raw).expect("must write feed manifest");
    path
}

#[test]
fn install_pack_materializes_content_and_band_marker() {
    let root = test_root("install-pack");
    let layout = test_layout(&root);
    let installer = FsWorkloadInstaller::new(layout.clone());
    let pack = feed_pack(&root.join("feed"), "runtime.wasm", "8.0.1", PackKind::Runtime);
    let band = band("8.0.100");

    let outcome = installer
        .install_pack(&pack, &band, None)
        .expect("must install pack");

    assert_eq!(outcome, PackInstallOutcome::Installed);
    let content_dir = layout.pack_content_dir(&pack.id, &pack.version);
    assert!(content_dir.join("payload.bin").exists());
    assert!(layout.pack_record_path(&pack.id, &pack.version, &band).exists());

    let installed = installer.installed_packs(&band).expect("must query");
    assert_eq!(installed.len(), 1);
    assert_eq!(installed[0].id, pack.id);
    assert_eq!(installed[0].version, pack.version);
    assert_eq!(installed[0].kind, PackKind::Runtime);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn reinstalling_a_present_pack_is_a_no_op() {
    let root = test_root("reinstall");
    let layout = test_layout(&root);
    let installer = FsWorkloadInstaller::new(layout);
    let pack = feed_pack(&root.join("feed"), "runtime.wasm", "8.0.1", PackKind::Runtime);
    let band = band("8.0.100");

    installer
        .install_pack(&pack, &band, None)
        .expect("first install must succeed");
    let second = installer
        .install_pack(&pack, &band, None)
        .expect("second install must succeed");
    assert_eq!(second, PackInstallOutcome::AlreadyPresent);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn shared_content_gains_marker_per_band() {
    let root = test_root("shared-bands");
    let layout = test_layout(&root);
    let installer = FsWorkloadInstaller::new(layout.clone());
    let pack = feed_pack(&root.join("feed"), "runtime.wasm", "8.0.1", PackKind::Runtime);
    let band_a = band("8.0.100");
    let band_b = band("8.0.200");

    installer
        .install_pack(&pack, &band_a, None)
        .expect("must install for first band");
    let outcome = installer
        .install_pack(&pack, &band_b, None)
        .expect("must install for second band");

    // Content is shared; the second band only adds its reference marker.
    assert_eq!(outcome, PackInstallOutcome::Installed);
    assert!(layout.pack_record_path(&pack.id, &pack.version, &band_a).exists());
    assert!(layout.pack_record_path(&pack.id, &pack.version, &band_b).exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn install_pack_with_offline_cache_reads_only_from_the_cache() {
    let root = test_root("cache-only");
    let layout = test_layout(&root);
    let installer = FsWorkloadInstaller::new(layout.clone());
    let pack = feed_pack(&root.join("feed"), "runtime.wasm", "8.0.1", PackKind::Runtime);
    let cache = OfflineCache::new(root.join("cache"));
    fs::create_dir_all(cache.path()).expect("must create cache dir");
    let band = band("8.0.100");

    // Not staged yet: the feed copy must not be consulted.
    let err = installer
        .install_pack(&pack, &band, Some(&cache))
        .expect_err("unstaged pack must fail");
    assert!(err.to_string().contains("not staged"), "{err:#}");

    installer
        .download_to_offline_cache(&pack, &cache, false)
        .expect("must stage pack");
    let outcome = installer
        .install_pack(&pack, &band, Some(&cache))
        .expect("staged pack must install");
    assert_eq!(outcome, PackInstallOutcome::Installed);
    assert!(layout
        .pack_content_dir(&pack.id, &pack.version)
        .join("payload.bin")
        .exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn offline_cache_stages_without_installing() {
    let root = test_root("cache-stage");
    let layout = test_layout(&root);
    let installer = FsWorkloadInstaller::new(layout.clone());
    let pack = feed_pack(&root.join("feed"), "pack.d", "1.0.0", PackKind::Tool);
    let cache = OfflineCache::new(root.join("cache"));
    fs::create_dir_all(cache.path()).expect("must create cache dir");

    installer
        .download_to_offline_cache(&pack, &cache, false)
        .expect("must stage pack");

    assert!(cache
        .pack_dir(&pack.id, &pack.version)
        .join("payload.bin")
        .exists());
    assert!(!layout.pack_content_dir(&pack.id, &pack.version).exists());
    assert!(installer
        .installed_packs(&band("8.0.100"))
        .expect("must query")
        .is_empty());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn offline_cache_rejects_previews_unless_requested() {
    let root = test_root("cache-preview");
    let layout = test_layout(&root);
    let installer = FsWorkloadInstaller::new(layout);
    let pack = feed_pack(
        &root.join("feed"),
        "runtime.wasm",
        "9.0.0-preview.2",
        PackKind::Runtime,
    );
    let cache = OfflineCache::new(root.join("cache"));
    fs::create_dir_all(cache.path()).expect("must create cache dir");

    let err = installer
        .download_to_offline_cache(&pack, &cache, false)
        .expect_err("preview pack must be rejected");
    assert!(err.to_string().contains("preview"), "{err:#}");

    installer
        .download_to_offline_cache(&pack, &cache, true)
        .expect("preview pack must stage when requested");
    assert!(cache.pack_dir(&pack.id, &pack.version).exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn rollback_removes_marker_and_unshared_content() {
    let root = test_root("rollback");
    let layout = test_layout(&root);
    let installer = FsWorkloadInstaller::new(layout.clone());
    let pack = feed_pack(&root.join("feed"), "runtime.wasm", "8.0.1", PackKind::Runtime);
    let band = band("8.0.100");

    installer
        .install_pack(&pack, &band, None)
        .expect("must install pack");
    installer
        .rollback_pack(&pack, &band)
        .expect("must roll back pack");

    assert!(!layout.pack_content_dir(&pack.id, &pack.version).exists());
    assert!(!layout.pack_record_path(&pack.id, &pack.version, &band).exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn rollback_keeps_content_referenced_by_another_band() {
    let root = test_root("rollback-shared");
    let layout = test_layout(&root);
    let installer = FsWorkloadInstaller::new(layout.clone());
    let pack = feed_pack(&root.join("feed"), "runtime.wasm", "8.0.1", PackKind::Runtime);
    let band_a = band("8.0.100");
    let band_b = band("8.0.200");

    installer
        .install_pack(&pack, &band_a, None)
        .expect("must install for first band");
    installer
        .install_pack(&pack, &band_b, None)
        .expect("must install for second band");
    installer
        .rollback_pack(&pack, &band_b)
        .expect("must roll back second band");

    assert!(layout
        .pack_content_dir(&pack.id, &pack.version)
        .join("payload.bin")
        .exists());
    assert!(layout.pack_record_path(&pack.id, &pack.version, &band_a).exists());
    assert!(!layout.pack_record_path(&pack.id, &pack.version, &band_b).exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn rollback_tolerates_a_partially_installed_pack() {
    let root = test_root("rollback-partial");
    let layout = test_layout(&root);
    let installer = FsWorkloadInstaller::new(layout);
    let pack = feed_pack(&root.join("feed"), "runtime.wasm", "8.0.1", PackKind::Runtime);

    // Nothing was ever installed; rollback must still succeed.
    installer
        .rollback_pack(&pack, &band("8.0.100"))
        .expect("rollback of an absent pack must not fail");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn installed_packs_are_scoped_by_band() {
    let root = test_root("query-band");
    let layout = test_layout(&root);
    let installer = FsWorkloadInstaller::new(layout);
    let feed = root.join("feed");
    let pack_a = feed_pack(&feed, "pack.a", "1.0.0", PackKind::Runtime);
    let pack_b = feed_pack(&feed, "pack.b", "1.0.0", PackKind::Tool);
    let band_a = band("8.0.100");
    let band_b = band("8.0.200");

    installer
        .install_pack(&pack_a, &band_a, None)
        .expect("must install");
    installer
        .install_pack(&pack_b, &band_b, None)
        .expect("must install");

    let in_a = installer.installed_packs(&band_a).expect("must query");
    assert_eq!(in_a.len(), 1);
    assert_eq!(in_a[0].id, pack_a.id);
    let in_b = installer.installed_packs(&band_b).expect("must query");
    assert_eq!(in_b.len(), 1);
    assert_eq!(in_b[0].id, pack_b.id);
    assert!(installer
        .installed_packs(&band("9.0.100"))
        .expect("must query")
        .is_empty());

    let _ = fs::remove_dir_all(&root);
}

const FEED_MANIFEST: &str = r#"
manifest_id = "toolkit.workloads"
manifest_version = "8.0.3"

[[workloads]]
id = "wasm-tools"
description = "WebAssembly build tooling"
packs = ["runtime.wasm", "templates.wasm"]

[[workloads]]
id = "wasm-extras"
packs = ["runtime.wasm", "tools.wasm"]

[[packs]]
id = "runtime.wasm"
version = "8.0.1"
kind = "runtime"
path = "packs/runtime.wasm/8.0.1"

[[packs]]
id = "templates.wasm"
version = "8.0.1"
kind = "template"
path = "packs/templates.wasm/8.0.1"

[[packs]]
id = "tools.wasm"
version = "8.0.2"
kind = "tool"
path = "packs/tools.wasm/8.0.2"
"#;

fn manifest_id() -> ManifestId {
    ManifestId::new("toolkit.workloads").expect("must build manifest id")
}

fn manifest_version() -> ManifestVersion {
    ManifestVersion::from_str("8.0.3").expect("must parse manifest version")
}

/// Feed with three packs and a two-workload manifest, installed for the band.
fn installed_feed(root: &Path, layout: &InstallRootLayout, band: &SdkFeatureBand) -> FsWorkloadInstaller {
    let feed = root.join("feed");
    feed_pack(&feed, "runtime.wasm", "8.0.1", PackKind::Runtime);
    feed_pack(&feed, "templates.wasm", "8.0.1", PackKind::Template);
    feed_pack(&feed, "tools.wasm", "8.0.2", PackKind::Tool);
    write_feed_manifest(&feed, "toolkit.workloads", FEED_MANIFEST);

    let installer = FsWorkloadInstaller::new(layout.clone()).with_manifest_feed(&feed);
    installer
        .install_manifest(&manifest_id(), &manifest_version(), band, None)
        .expect("must install manifest");
    installer
}

#[test]
fn manifest_install_makes_workloads_resolvable() {
    let root = test_root("manifest-install");
    let layout = test_layout(&root);
    let band = band("8.0.100");
    installed_feed(&root, &layout, &band);

    let resolver = FsWorkloadResolver::new(layout.clone());
    let packs = resolver
        .resolve_packs(&workload("wasm-tools"), &band)
        .expect("must resolve")
        .expect("workload must be defined");
    assert_eq!(packs.len(), 2);
    assert_eq!(packs[0].id.as_str(), "runtime.wasm");
    assert_eq!(packs[1].id.as_str(), "templates.wasm");
    // Installed copy resolves on its own: paths are absolute into the feed.
    assert!(packs[0].path.is_absolute());
    assert!(packs[0].path.join("payload.bin").exists());

    assert_eq!(
        resolver.known_workloads(&band).expect("must list"),
        vec![workload("wasm-extras"), workload("wasm-tools")]
    );
    assert!(resolver
        .resolve_packs(&workload("missing"), &band)
        .expect("must resolve")
        .is_none());
    assert!(resolver
        .resolve_packs(&workload("wasm-tools"), &SdkFeatureBand::from_str("9.0.100").expect("band"))
        .expect("must resolve")
        .is_none());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn manifest_install_rejects_identity_mismatch() {
    let root = test_root("manifest-mismatch");
    let layout = test_layout(&root);
    let feed = root.join("feed");
    write_feed_manifest(&feed, "toolkit.workloads", FEED_MANIFEST);
    let installer = FsWorkloadInstaller::new(layout).with_manifest_feed(&feed);
    let band = band("8.0.100");

    let err = installer
        .install_manifest(
            &manifest_id(),
            &ManifestVersion::from_str("9.9.9").expect("version"),
            &band,
            None,
        )
        .expect_err("version mismatch must fail");
    assert!(err.to_string().contains("expected"), "{err:#}");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn manifest_install_requires_a_source() {
    let root = test_root("manifest-no-source");
    let layout = test_layout(&root);
    let installer = FsWorkloadInstaller::new(layout);

    let err = installer
        .install_manifest(&manifest_id(), &manifest_version(), &band("8.0.100"), None)
        .expect_err("missing source must fail");
    assert!(err.to_string().contains("no manifest feed"), "{err:#}");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn manifest_update_replaces_the_previous_document() {
    let root = test_root("manifest-update");
    let layout = test_layout(&root);
    let band = band("8.0.100");
    let installer = installed_feed(&root, &layout, &band);

    let updated = FEED_MANIFEST.replace("8.0.3", "8.0.4").replace(
        "packs = [\"runtime.wasm\", \"templates.wasm\"]",
        "packs = [\"runtime.wasm\"]",
    );
    write_feed_manifest(&root.join("feed"), "toolkit.workloads", &updated);
    installer
        .install_manifest(
            &manifest_id(),
            &ManifestVersion::from_str("8.0.4").expect("version"),
            &band,
            None,
        )
        .expect("manifest update must succeed");

    let resolver = FsWorkloadResolver::new(layout);
    let packs = resolver
        .resolve_packs(&workload("wasm-tools"), &band)
        .expect("must resolve")
        .expect("workload must be defined");
    assert_eq!(packs.len(), 1);
    assert_eq!(packs[0].id.as_str(), "runtime.wasm");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn end_to_end_install_uninstall_and_garbage_collection() {
    let root = test_root("end-to-end");
    let layout = test_layout(&root);
    let band = band("8.0.100");
    let installer = installed_feed(&root, &layout, &band);
    let records = FsRecordRepository::new(layout.workload_records_dir());
    let resolver = FsWorkloadResolver::new(layout.clone());

    install_workloads(
        &installer,
        &records,
        &resolver,
        &[workload("wasm-tools"), workload("wasm-extras")],
        &band,
        None,
    )
    .expect("install must succeed");

    assert_eq!(
        records.installed_workloads(&band).expect("must query"),
        vec![workload("wasm-extras"), workload("wasm-tools")]
    );
    assert_eq!(installer.installed_packs(&band).expect("must query").len(), 3);

    // Dropping wasm-extras frees tools.wasm but keeps the shared runtime.
    let report = uninstall_workloads(
        &installer,
        &records,
        &resolver,
        &[workload("wasm-extras")],
        &band,
    )
    .expect("uninstall must succeed");

    let deleted: Vec<String> = report
        .deleted_packs
        .iter()
        .map(|(id, version)| format!("{id}@{version}"))
        .collect();
    assert_eq!(deleted, vec!["tools.wasm@8.0.2"]);
    let remaining = installer.installed_packs(&band).expect("must query");
    assert_eq!(remaining.len(), 2);
    assert!(layout
        .pack_content_dir(
            &PackId::new("runtime.wasm").expect("pack id"),
            &Version::parse("8.0.1").expect("version")
        )
        .exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn failed_install_rolls_back_partial_packs_on_disk() {
    let root = test_root("rollback-e2e");
    let layout = test_layout(&root);
    let band = band("8.0.100");
    let installer = installed_feed(&root, &layout, &band);
    let records = FsRecordRepository::new(layout.workload_records_dir());
    let resolver = FsWorkloadResolver::new(layout.clone());

    // templates.wasm loses its feed content after manifest install, so the
    // second pack of wasm-tools fails mid-operation.
    fs::remove_dir_all(root.join("feed").join("packs").join("templates.wasm"))
        .expect("must remove feed content");

    let err = install_workloads(
        &installer,
        &records,
        &resolver,
        &[workload("wasm-tools")],
        &band,
        None,
    )
    .expect_err("install must fail");

    assert!(matches!(err, WorkloadInstallError::PackInstall { .. }));
    assert!(installer
        .installed_packs(&band)
        .expect("must query")
        .is_empty());
    assert!(records
        .installed_workloads(&band)
        .expect("must query")
        .is_empty());
    assert!(!layout
        .pack_content_dir(
            &PackId::new("runtime.wasm").expect("pack id"),
            &Version::parse("8.0.1").expect("version")
        )
        .exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn failed_install_leaves_earlier_completed_installs_untouched() {
    let root = test_root("keep-earlier");
    let layout = test_layout(&root);
    let band = band("8.0.100");
    let installer = installed_feed(&root, &layout, &band);
    let records = FsRecordRepository::new(layout.workload_records_dir());
    let resolver = FsWorkloadResolver::new(layout.clone());

    install_workloads(&installer, &records, &resolver, &[workload("wasm-extras")], &band, None)
        .expect("first install must succeed");

    // A later operation fails mid-pack; the earlier operation's record and
    // packs are not its to undo.
    fs::remove_dir_all(root.join("feed").join("packs").join("templates.wasm"))
        .expect("must remove feed content");
    install_workloads(&installer, &records, &resolver, &[workload("wasm-tools")], &band, None)
        .expect_err("second install must fail");

    assert_eq!(
        records.installed_workloads(&band).expect("must query"),
        vec![workload("wasm-extras")]
    );
    let remaining = installer.installed_packs(&band).expect("must query");
    assert_eq!(remaining.len(), 2);
    assert!(layout
        .pack_content_dir(
            &PackId::new("runtime.wasm").expect("pack id"),
            &Version::parse("8.0.1").expect("version")
        )
        .exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn failed_manifest_update_leaves_previous_document_intact() {
    let root = test_root("manifest-atomic");
    let layout = test_layout(&root);
    let band = band("8.0.100");
    let installer = installed_feed(&root, &layout, &band);

    // The feed now carries a corrupt revision: wasm-tools references a pack
    // the document does not declare.
    let broken = FEED_MANIFEST.replace("8.0.3", "8.0.4").replace(
        "packs = [\"runtime.wasm\", \"templates.wasm\"]",
        "packs = [\"runtime.wasm\", \"missing.pack\"]",
    );
    write_feed_manifest(&root.join("feed"), "toolkit.workloads", &broken);
    let err = installer
        .install_manifest(
            &manifest_id(),
            &ManifestVersion::from_str("8.0.4").expect("version"),
            &band,
            None,
        )
        .expect_err("corrupt manifest must be rejected");
    assert!(format!("{err:#}").contains("undeclared pack"), "{err:#}");

    // The previously installed document is still readable and unchanged.
    let resolver = FsWorkloadResolver::new(layout);
    let manifests = resolver.installed_manifests(&band).expect("must list");
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0].manifest_version, manifest_version());
    let packs = resolver
        .resolve_packs(&workload("wasm-tools"), &band)
        .expect("must resolve")
        .expect("workload must be defined");
    assert_eq!(packs.len(), 2);
    assert_eq!(packs[1].id.as_str(), "templates.wasm");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn gc_never_removes_packs_recorded_in_another_band() {
    let root = test_root("gc-cross-band");
    let layout = test_layout(&root);
    let band_a = band("8.0.100");
    let band_b = band("8.0.200");
    let installer = installed_feed(&root, &layout, &band_a);
    installer
        .install_manifest(&manifest_id(), &manifest_version(), &band_b, None)
        .expect("must install manifest for second band");
    let records = FsRecordRepository::new(layout.workload_records_dir());
    let resolver = FsWorkloadResolver::new(layout.clone());

    install_workloads(&installer, &records, &resolver, &[workload("wasm-tools")], &band_a, None)
        .expect("install must succeed");
    install_workloads(&installer, &records, &resolver, &[workload("wasm-tools")], &band_b, None)
        .expect("install must succeed");

    uninstall_workloads(&installer, &records, &resolver, &[workload("wasm-tools")], &band_a)
        .expect("uninstall must succeed");

    // Band B still has a record, so the shared content survives.
    assert!(layout
        .pack_content_dir(
            &PackId::new("runtime.wasm").expect("pack id"),
            &Version::parse("8.0.1").expect("version")
        )
        .exists());
    assert!(installer
        .installed_packs(&band_a)
        .expect("must query")
        .is_empty());
    assert_eq!(installer.installed_packs(&band_b).expect("must query").len(), 2);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn gc_reconciles_orphaned_content_without_any_marker() {
    let root = test_root("gc-orphan");
    let layout = test_layout(&root);
    let installer = FsWorkloadInstaller::new(layout.clone());
    let records = FsRecordRepository::new(layout.workload_records_dir());
    let resolver = FsWorkloadResolver::new(layout.clone());

    // Simulates a process killed mid-install: content on disk, no marker,
    // no record.
    let orphan = layout.pack_content_dir(
        &PackId::new("orphan.pack").expect("pack id"),
        &Version::parse("1.0.0").expect("version"),
    );
    fs::create_dir_all(&orphan).expect("must create orphan content");
    fs::write(orphan.join("payload.bin"), b"stale").expect("must write orphan payload");

    let report = installer
        .garbage_collect(&resolver, &records)
        .expect("gc must succeed");

    assert!(!orphan.exists());
    assert_eq!(report.deleted_packs.len(), 1);
    assert_eq!(report.deleted_packs[0].0.as_str(), "orphan.pack");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn gc_is_idempotent() {
    let root = test_root("gc-idempotent");
    let layout = test_layout(&root);
    let band = band("8.0.100");
    let installer = installed_feed(&root, &layout, &band);
    let records = FsRecordRepository::new(layout.workload_records_dir());
    let resolver = FsWorkloadResolver::new(layout.clone());

    install_workloads(&installer, &records, &resolver, &[workload("wasm-tools")], &band, None)
        .expect("install must succeed");

    let first = installer
        .garbage_collect(&resolver, &records)
        .expect("gc must succeed");
    assert!(first.is_empty());
    let second = installer
        .garbage_collect(&resolver, &records)
        .expect("gc must succeed");
    assert!(second.is_empty());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn operation_lock_is_exclusive_and_released_on_drop() {
    let root = test_root("lock");
    let layout = test_layout(&root);

    let lock = OperationLock::acquire(&layout).expect("must acquire lock");
    assert_eq!(lock.path(), layout.lock_path());
    let err = OperationLock::acquire(&layout).expect_err("second acquire must fail");
    assert!(err.to_string().contains("install root lock"), "{err:#}");

    drop(lock);
    OperationLock::acquire(&layout).expect("must reacquire after drop");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn stale_lock_file_from_a_dead_process_is_reclaimed() {
    let root = test_root("lock-stale");
    let layout = test_layout(&root);

    // A killed process leaves the lock file behind but the kernel has
    // already released its advisory lock, so the file alone must not block
    // the next operation.
    fs::write(layout.lock_path(), "999999999\n").expect("must plant stale lock file");

    let lock = OperationLock::acquire(&layout).expect("stale lock file must be reclaimable");
    drop(lock);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn factory_supports_packs_and_rejects_bundle() {
    let root = test_root("factory");
    let layout = InstallRootLayout::new(root.join("install-root"));

    let installer = workload_installer_for_unit(InstallationUnit::Packs, layout.clone())
        .expect("pack unit must be supported");
    assert!(installer.layout().packs_dir().exists());

    let err = workload_installer_for_unit(InstallationUnit::Bundle, layout)
        .expect_err("bundle unit must be rejected");
    assert!(err.to_string().contains("not supported"), "{err:#}");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn pack_record_round_trip() {
    let raw = "id=runtime.wasm\nversion=8.0.1\nkind=runtime\npath=/feed/packs/runtime.wasm/8.0.1\ninstalled_at_unix=123\n";
    let pack = crate::packs::parse_pack_record(raw).expect("must parse");
    assert_eq!(pack.id.as_str(), "runtime.wasm");
    assert_eq!(pack.version, Version::parse("8.0.1").expect("version"));
    assert_eq!(pack.kind, PackKind::Runtime);
    assert_eq!(pack.path, PathBuf::from("/feed/packs/runtime.wasm/8.0.1"));
}

#[test]
fn pack_record_rejects_missing_fields() {
    let raw = "id=runtime.wasm\nversion=8.0.1\n";
    let err = crate::packs::parse_pack_record(raw).expect_err("must reject");
    assert!(err.to_string().contains("missing kind"), "{err:#}");
}
