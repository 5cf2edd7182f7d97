use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use semver::Version;
use serde::{Deserialize, Serialize, Serializer};

/// Names a logical optional feature bundle. Opaque, compared by value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkloadId(String);

impl WorkloadId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_id_token(&id).with_context(|| format!("invalid workload id '{id}'"))?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WorkloadId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Addresses an installable pack artifact together with its version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackId(String);

impl PackId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_id_token(&id).with_context(|| format!("invalid pack id '{id}'"))?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PackId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Identifies the document mapping workloads to packs. A (ManifestId,
/// ManifestVersion) pair is immutable once published.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestId(String);

impl ManifestId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_id_token(&id).with_context(|| format!("invalid manifest id '{id}'"))?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ManifestId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestVersion(Version);

impl ManifestVersion {
    pub fn new(version: Version) -> Self {
        Self(version)
    }

    pub fn version(&self) -> &Version {
        &self.0
    }
}

impl fmt::Display for ManifestVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ManifestVersion {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let version =
            Version::parse(s).with_context(|| format!("invalid manifest version '{s}'"))?;
        Ok(Self(version))
    }
}

/// A coarse version bucket under which installation state is partitioned.
///
/// Derived from a full toolchain version by truncating the patch to its
/// hundreds band and dropping prerelease/build metadata, so 8.0.203-preview.1
/// and 8.0.299 both land in band 8.0.200.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SdkFeatureBand {
    major: u64,
    minor: u64,
    patch_band: u64,
}

impl SdkFeatureBand {
    pub fn from_version(version: &Version) -> Self {
        Self {
            major: version.major,
            minor: version.minor,
            patch_band: version.patch - version.patch % 100,
        }
    }
}

impl fmt::Display for SdkFeatureBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch_band)
    }
}

impl FromStr for SdkFeatureBand {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let version =
            Version::parse(s).with_context(|| format!("invalid feature band version '{s}'"))?;
        Ok(Self::from_version(&version))
    }
}

impl Serialize for SdkFeatureBand {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Local staging area holding pack content for disconnected installation.
/// When present, install operations read from it instead of the pack source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfflineCache(PathBuf);

impl OfflineCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub fn pack_dir(&self, id: &PackId, version: &Version) -> PathBuf {
        self.0.join(id.as_str()).join(version.to_string())
    }
}

/// Granularity of install/uninstall operations. Units are alternate
/// strategies, mutually exclusive per installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallationUnit {
    Packs,
    Bundle,
}

impl InstallationUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Packs => "packs",
            Self::Bundle => "bundle",
        }
    }
}

impl fmt::Display for InstallationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Ids end up as path segments under the install root, so reject anything
// that is not a plain dotted token.
fn validate_id_token(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(anyhow!("id must not be empty"));
    }
    if let Some(bad) = id
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.')))
    {
        return Err(anyhow!("id contains invalid character '{bad}'"));
    }
    if id.starts_with('.') || id.ends_with('.') {
        return Err(anyhow!("id must not start or end with '.'"));
    }
    Ok(())
}
