use std::fs::File;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{ByteStream, RemoteCatalog};
use crate::error::{SyncError, SyncResult};
use crate::types::{ArtifactIdentifier, ArtifactRecord};

const ARTIFACT_EXTENSION: &str = "zip";

/// Artifact store kept in a plain directory.
///
/// Every artifact is `<root>/<identifier>.zip`, a zip holding the published
/// file under its original name, mirroring how hosted artifact services hand
/// back uploads as zip downloads.
#[derive(Debug, Clone)]
pub struct FsCatalog {
    root: PathBuf,
}

impl FsCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn artifact_path(&self, identifier: &ArtifactIdentifier) -> SyncResult<PathBuf> {
        if !identifier.is_path_safe() {
            return Err(SyncError::InvalidIdentifier {
                identifier: identifier.clone(),
            });
        }
        Ok(self.root.join(format!("{}.{}", identifier, ARTIFACT_EXTENSION)))
    }

    fn unavailable(&self, e: io::Error) -> SyncError {
        SyncError::remote_unavailable(format!("{}: {}", self.root.display(), e))
    }

    fn write_artifact(
        root: &Path,
        target: &Path,
        identifier: &ArtifactIdentifier,
        source: &Path,
    ) -> SyncResult<()> {
        let unavailable =
            |e: &dyn std::fmt::Display| SyncError::remote_unavailable(format!("{}: {}", root.display(), e));

        if !root.is_dir() {
            return Err(unavailable(&"store directory is missing"));
        }
        if target.exists() {
            return Err(SyncError::Conflict {
                identifier: identifier.clone(),
            });
        }

        let mut input = File::open(source)?;
        let entry_name = source
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| identifier.to_string());

        let mut staged = tempfile::NamedTempFile::new_in(root).map_err(|e| unavailable(&e))?;
        {
            let mut writer = ZipWriter::new(staged.as_file_mut());
            // Payloads are already compressed
            let options = FileOptions::default().compression_method(CompressionMethod::Stored);
            writer
                .start_file(entry_name, options)
                .map_err(|e| unavailable(&e))?;
            io::copy(&mut input, &mut writer)?;
            writer.finish().map_err(|e| unavailable(&e))?;
        }

        staged.persist_noclobber(target).map_err(|e| {
            if e.error.kind() == ErrorKind::AlreadyExists {
                SyncError::Conflict {
                    identifier: identifier.clone(),
                }
            } else {
                unavailable(&e.error)
            }
        })?;

        Ok(())
    }
}

#[async_trait]
impl RemoteCatalog for FsCatalog {
    async fn list_artifacts(&self) -> SyncResult<Vec<ArtifactRecord>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| self.unavailable(e))?;

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| self.unavailable(e))? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(ARTIFACT_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };

            let metadata = entry.metadata().await.map_err(|e| self.unavailable(e))?;
            if !metadata.is_file() {
                continue;
            }

            records.push(ArtifactRecord {
                identifier: ArtifactIdentifier::new(stem),
                size_bytes: metadata.len(),
            });
        }

        tracing::debug!("Listed {} artifacts in {}", records.len(), self.root.display());
        Ok(records)
    }

    async fn fetch(&self, identifier: &ArtifactIdentifier) -> SyncResult<ByteStream> {
        let data = tokio::fs::read(self.artifact_path(identifier)?)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => SyncError::NotFound {
                    identifier: identifier.clone(),
                },
                _ => self.unavailable(e),
            })?;

        Ok(Box::pin(tokio_stream::once(Ok(Bytes::from(data)))))
    }

    async fn publish(&self, identifier: &ArtifactIdentifier, path: &Path) -> SyncResult<()> {
        let root = self.root.clone();
        let target = self.artifact_path(identifier)?;
        let identifier = identifier.clone();
        let source = path.to_path_buf();

        tokio::task::spawn_blocking(move || {
            Self::write_artifact(&root, &target, &identifier, &source)
        })
        .await
        .map_err(|e| SyncError::Internal {
            message: format!("Publish task aborted: {}", e),
        })?
    }
}
