use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Opaque name of one artifact in the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactIdentifier(String);

impl ArtifactIdentifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the identifier can be used as a single file name component
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self.0 != "."
            && self.0 != ".."
            && !self.0.contains(['/', '\\', '\0'])
    }
}

impl fmt::Display for ArtifactIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactIdentifier {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ArtifactIdentifier {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Artifact as reported by the remote catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub identifier: ArtifactIdentifier,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalItemKind {
    Upload,
    DownloadedArchive,
}

/// File staged in one of the working directories
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalItem {
    pub identifier: ArtifactIdentifier,
    pub path: PathBuf,
    pub kind: LocalItemKind,
}
