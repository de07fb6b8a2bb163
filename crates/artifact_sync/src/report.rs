use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::types::ArtifactIdentifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RemoteUnavailable,
    NotFound,
    Conflict,
    CorruptArchive,
    Io,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub identifier: ArtifactIdentifier,
    pub kind: FailureKind,
    pub message: String,
}

impl ItemFailure {
    pub fn from_error(identifier: ArtifactIdentifier, error: &SyncError) -> Self {
        Self {
            identifier,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Per-item outcome of one synchronisation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub uploaded: Vec<ArtifactIdentifier>,
    pub upload_failures: Vec<ItemFailure>,
    pub downloaded: Vec<ArtifactIdentifier>,
    pub download_failures: Vec<ItemFailure>,
    pub extracted: Vec<ArtifactIdentifier>,
    pub extract_failures: Vec<ItemFailure>,
}

impl SyncReport {
    /// True if any item failed for a reason other than an upload conflict.
    ///
    /// A conflict means the artifact is already stored remotely, which is the
    /// same end state as skipping it during planning.
    pub fn has_failures(&self) -> bool {
        self.upload_failures
            .iter()
            .any(|failure| failure.kind != FailureKind::Conflict)
            || !self.download_failures.is_empty()
            || !self.extract_failures.is_empty()
    }

    pub fn failure_count(&self) -> usize {
        self.upload_failures.len() + self.download_failures.len() + self.extract_failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uploaded.is_empty()
            && self.downloaded.is_empty()
            && self.extracted.is_empty()
            && self.failure_count() == 0
    }

    pub(crate) fn sort(&mut self) {
        self.uploaded.sort();
        self.downloaded.sort();
        self.extracted.sort();
        for failures in [
            &mut self.upload_failures,
            &mut self.download_failures,
            &mut self.extract_failures,
        ] {
            failures.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(id: &str, kind: FailureKind) -> ItemFailure {
        ItemFailure {
            identifier: id.into(),
            kind,
            message: String::new(),
        }
    }

    #[test]
    fn test_conflicts_are_not_failures() {
        let report = SyncReport {
            uploaded: vec!["b".into()],
            upload_failures: vec![failure("a", FailureKind::Conflict)],
            ..Default::default()
        };
        assert!(!report.has_failures());
        assert_eq!(report.failure_count(), 1);
    }

    #[test]
    fn test_extract_failure_counts() {
        let report = SyncReport {
            extract_failures: vec![failure("y", FailureKind::CorruptArchive)],
            ..Default::default()
        };
        assert!(report.has_failures());
    }

    #[test]
    fn test_report_serializes_snake_case_kinds() {
        let report = SyncReport {
            download_failures: vec![failure("x", FailureKind::NotFound)],
            ..Default::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["download_failures"][0]["kind"], "not_found");
        assert_eq!(json["download_failures"][0]["identifier"], "x");
    }
}
