use std::fmt;
use std::path::PathBuf;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::ids::PackId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackKind {
    Runtime,
    Framework,
    Sdk,
    Template,
    Tool,
    Library,
}

impl PackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Runtime => "runtime",
            Self::Framework => "framework",
            Self::Sdk => "sdk",
            Self::Template => "template",
            Self::Tool => "tool",
            Self::Library => "library",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "runtime" => Ok(Self::Runtime),
            "framework" => Ok(Self::Framework),
            "sdk" => Ok(Self::Sdk),
            "template" => Ok(Self::Template),
            "tool" => Ok(Self::Tool),
            "library" => Ok(Self::Library),
            _ => Err(anyhow::anyhow!("invalid pack kind: {value}")),
        }
    }
}

impl fmt::Display for PackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content address of a pack. Identical packs referenced by multiple
/// workloads are installed once and shared under this key.
pub type PackKey = (PackId, Version);

/// Describes one installable artifact. `path` is the location of the pack's
/// content in the originating source (feed directory or offline cache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackInfo {
    pub id: PackId,
    pub version: Version,
    pub kind: PackKind,
    pub path: PathBuf,
}

impl PackInfo {
    pub fn key(&self) -> PackKey {
        (self.id.clone(), self.version.clone())
    }
}

impl fmt::Display for PackInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.version)
    }
}
