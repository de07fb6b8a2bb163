use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::SyncResult;
use crate::types::{ArtifactIdentifier, LocalItem, LocalItemKind};

/// File name conventions for the two working directories
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingConvention {
    pub upload_extension: String,
    pub archive_extension: String,
}

impl Default for NamingConvention {
    fn default() -> Self {
        Self {
            upload_extension: "gz".to_string(),
            archive_extension: "zip".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocalCache {
    naming: NamingConvention,
}

impl LocalCache {
    pub fn new(naming: NamingConvention) -> Self {
        Self { naming }
    }

    /// Compressed outputs in `work_dir` that are ready for upload
    pub fn list_upload_candidates(&self, work_dir: &Path) -> SyncResult<Vec<LocalItem>> {
        list_items(work_dir, &self.naming.upload_extension, LocalItemKind::Upload)
    }

    /// Archives in `archive_dir` that have already been downloaded
    pub fn list_downloaded_archives(&self, archive_dir: &Path) -> SyncResult<Vec<LocalItem>> {
        list_items(
            archive_dir,
            &self.naming.archive_extension,
            LocalItemKind::DownloadedArchive,
        )
    }

    /// File name an archive for `identifier` is stored under
    pub fn archive_file_name(&self, identifier: &ArtifactIdentifier) -> String {
        format!("{}.{}", identifier, self.naming.archive_extension)
    }
}

fn list_items(dir: &Path, extension: &str, kind: LocalItemKind) -> SyncResult<Vec<LocalItem>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!("Directory {} does not exist, nothing staged", dir.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut items = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| ext == extension);
        if !matches {
            continue;
        }

        let stem = match path.file_stem().and_then(|stem| stem.to_str()) {
            Some(stem) if !stem.is_empty() => stem.to_string(),
            _ => continue,
        };

        items.push(LocalItem {
            identifier: ArtifactIdentifier::new(stem),
            path,
            kind,
        });
    }

    tracing::debug!("Found {} {:?} items in {}", items.len(), kind, dir.display());
    Ok(items)
}
