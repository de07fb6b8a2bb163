use std::fs::{self, DirEntry, File};
use std::path::{Component, Path, PathBuf};

use zip::ZipArchive;

use crate::error::{SyncError, SyncResult};
use crate::types::ArtifactIdentifier;

/// Unpacks downloaded zip archives into an extraction root.
///
/// Each archive is first unpacked into a private staging directory inside the
/// destination. Its top-level entries are moved into place only once the whole
/// archive has been read, so a truncated or corrupt archive never leaves files
/// behind. Archives extracted concurrently into the same destination are
/// expected to have disjoint top-level entries.
pub struct ArchiveExpander;

/// One top-level entry moved into the destination, and whatever it displaced
struct Placement {
    target: PathBuf,
    displaced: Option<PathBuf>,
}

impl ArchiveExpander {
    /// Expand `archive_path` into `destination`, returning the top-level paths placed
    pub fn expand(
        identifier: &ArtifactIdentifier,
        archive_path: &Path,
        destination: &Path,
    ) -> SyncResult<Vec<PathBuf>> {
        let corrupt = |message: String| SyncError::CorruptArchive {
            identifier: identifier.clone(),
            message,
        };

        fs::create_dir_all(destination)
            .map_err(|e| corrupt(format!("Failed to create {}: {}", destination.display(), e)))?;

        // Removed on drop, whichever way we leave this function
        let staging = tempfile::Builder::new()
            .prefix(".extract-")
            .tempdir_in(destination)
            .map_err(|e| corrupt(format!("Failed to create staging directory: {}", e)))?;

        Self::unpack(archive_path, staging.path()).map_err(corrupt)?;
        let placed = Self::promote(staging.path(), destination).map_err(corrupt)?;

        tracing::debug!(
            "Extracted {} ({} top-level entries) into {}",
            identifier,
            placed.len(),
            destination.display()
        );
        Ok(placed)
    }

    /// Async wrapper running the extraction on the blocking pool
    pub async fn expand_blocking(
        identifier: ArtifactIdentifier,
        archive_path: PathBuf,
        destination: PathBuf,
    ) -> SyncResult<Vec<PathBuf>> {
        let task_identifier = identifier.clone();
        tokio::task::spawn_blocking(move || {
            Self::expand(&task_identifier, &archive_path, &destination)
        })
        .await
        .map_err(|e| SyncError::CorruptArchive {
            identifier,
            message: format!("Extraction task aborted: {}", e),
        })?
    }

    /// True when every top-level entry of the archive already exists in `destination`.
    ///
    /// An archive that cannot be read is never considered expanded.
    pub fn is_expanded(archive_path: &Path, destination: &Path) -> bool {
        let Ok(file) = File::open(archive_path) else {
            return false;
        };
        let Ok(archive) = ZipArchive::new(file) else {
            return false;
        };

        let expanded = archive
            .file_names()
            .filter_map(|name| match Path::new(name).components().next() {
                Some(Component::Normal(top)) => Some(destination.join(top)),
                _ => None,
            })
            .all(|path| fs::symlink_metadata(path).is_ok());
        expanded
    }

    fn unpack(archive_path: &Path, staging: &Path) -> Result<(), String> {
        let file = File::open(archive_path)
            .map_err(|e| format!("Failed to open archive {}: {}", archive_path.display(), e))?;
        let mut archive =
            ZipArchive::new(file).map_err(|e| format!("Failed to read archive: {}", e))?;

        archive
            .extract(staging)
            .map_err(|e| format!("Failed to extract archive: {}", e))
    }

    /// Move every staged top-level entry into `destination`.
    ///
    /// An entry already at the target is set aside first and put back if a
    /// later move fails, so a failed promotion leaves `destination` as it was.
    fn promote(staging: &Path, destination: &Path) -> Result<Vec<PathBuf>, String> {
        let entries = fs::read_dir(staging)
            .and_then(|entries| entries.collect::<Result<Vec<_>, _>>())
            .map_err(|e| format!("Failed to read staging directory: {}", e))?;

        let displaced_root = tempfile::Builder::new()
            .prefix(".replaced-")
            .tempdir_in(destination)
            .map_err(|e| format!("Failed to create displacement directory: {}", e))?;

        let mut placed = Vec::new();
        for entry in entries {
            match Self::place(&entry, destination, displaced_root.path()) {
                Ok(placement) => placed.push(placement),
                Err(message) => {
                    Self::rollback(&placed);
                    return Err(message);
                }
            }
        }

        Ok(placed.into_iter().map(|placement| placement.target).collect())
    }

    fn place(entry: &DirEntry, destination: &Path, displaced_root: &Path) -> Result<Placement, String> {
        let name = entry.file_name();
        let target = destination.join(&name);

        let displaced = if fs::symlink_metadata(&target).is_ok() {
            let aside = displaced_root.join(&name);
            fs::rename(&target, &aside)
                .map_err(|e| format!("Failed to set aside existing {:?}: {}", name, e))?;
            Some(aside)
        } else {
            None
        };

        if let Err(e) = fs::rename(entry.path(), &target) {
            if let Some(aside) = &displaced {
                Self::restore(aside, &target);
            }
            return Err(format!("Failed to move {:?} into place: {}", name, e));
        }

        Ok(Placement { target, displaced })
    }

    fn rollback(placed: &[Placement]) {
        for placement in placed.iter().rev() {
            let path = &placement.target;
            let removed = if path.is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            };
            if let Err(e) = removed {
                tracing::warn!("Failed to roll back {}: {}", path.display(), e);
                continue;
            }
            if let Some(aside) = &placement.displaced {
                Self::restore(aside, path);
            }
        }
    }

    fn restore(aside: &Path, target: &Path) {
        if let Err(e) = fs::rename(aside, target) {
            tracing::warn!("Failed to restore {}: {}", target.display(), e);
        }
    }
}
