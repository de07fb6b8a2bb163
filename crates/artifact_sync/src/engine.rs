use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_stream::StreamExt;

use crate::archive::ArchiveExpander;
use crate::catalog::RemoteCatalog;
use crate::error::{SyncError, SyncResult};
use crate::local_cache::{LocalCache, NamingConvention};
use crate::report::{ItemFailure, SyncReport};
use crate::types::{ArtifactIdentifier, ArtifactRecord, LocalItem, LocalItemKind};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Directory newly downloaded archives are unpacked into
    pub extraction_root: PathBuf,
    /// Whether remote artifacts are pulled down as well as local ones pushed up
    pub download: bool,
    /// Ceiling on simultaneous transfers; `None` is unbounded
    pub max_concurrent_transfers: Option<usize>,
    pub naming: NamingConvention,
}

impl SyncOptions {
    pub fn new(extraction_root: impl Into<PathBuf>) -> Self {
        Self {
            extraction_root: extraction_root.into(),
            download: false,
            max_concurrent_transfers: None,
            naming: NamingConvention::default(),
        }
    }

    pub fn with_download(mut self, download: bool) -> Self {
        self.download = download;
        self
    }

    pub fn with_max_concurrent_transfers(mut self, limit: Option<usize>) -> Self {
        self.max_concurrent_transfers = limit;
        self
    }

    pub fn with_naming(mut self, naming: NamingConvention) -> Self {
        self.naming = naming;
        self
    }
}

/// Work decided for one pass, sorted by identifier.
///
/// An identifier known on both sides appears in neither transfer list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub to_upload: Vec<LocalItem>,
    pub to_download: Vec<ArtifactRecord>,
    /// Archives already in the archive directory whose contents are missing
    /// from the extraction root
    pub to_extract: Vec<LocalItem>,
}

impl SyncPlan {
    /// Diff the remote listing against what is staged locally.
    ///
    /// `downloaded` is `None` when the download path is disabled.
    pub fn compute(
        remote: &[ArtifactRecord],
        uploads: &[LocalItem],
        downloaded: Option<&[LocalItem]>,
    ) -> Self {
        let remote_ids: HashSet<&ArtifactIdentifier> =
            remote.iter().map(|record| &record.identifier).collect();

        let to_upload: BTreeMap<&ArtifactIdentifier, &LocalItem> = uploads
            .iter()
            .filter(|item| !remote_ids.contains(&item.identifier))
            .map(|item| (&item.identifier, item))
            .collect();

        let to_download = match downloaded {
            Some(downloaded) => {
                let present: HashSet<&ArtifactIdentifier> = downloaded
                    .iter()
                    .chain(uploads)
                    .map(|item| &item.identifier)
                    .collect();

                let mut pending = BTreeMap::new();
                for record in remote {
                    if !present.contains(&record.identifier) {
                        pending.entry(&record.identifier).or_insert(record);
                    }
                }
                pending.into_values().cloned().collect()
            }
            None => Vec::new(),
        };

        Self {
            to_upload: to_upload.into_values().cloned().collect(),
            to_download,
            to_extract: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_upload.is_empty() && self.to_download.is_empty() && self.to_extract.is_empty()
    }
}

/// Orchestrates one reconciliation pass between the local cache and the remote store
pub struct SyncEngine {
    catalog: Arc<dyn RemoteCatalog>,
    local_cache: LocalCache,
    options: SyncOptions,
    transfer_limit: Option<Semaphore>,
}

impl SyncEngine {
    pub fn new(catalog: Arc<dyn RemoteCatalog>, options: SyncOptions) -> Self {
        let transfer_limit = options
            .max_concurrent_transfers
            .map(|limit| Semaphore::new(limit.max(1)));

        Self {
            catalog,
            local_cache: LocalCache::new(options.naming.clone()),
            options,
            transfer_limit,
        }
    }

    /// List the remote catalog once and diff it against the local directories
    pub async fn plan(&self, work_dir: &Path, archive_dir: &Path) -> SyncResult<SyncPlan> {
        let remote = self.catalog.list_artifacts().await.map_err(|e| match e {
            SyncError::RemoteUnavailable { .. } => e,
            other => SyncError::remote_unavailable(other.to_string()),
        })?;

        let uploads = self.local_cache.list_upload_candidates(work_dir)?;
        let downloaded = if self.options.download {
            Some(self.local_cache.list_downloaded_archives(archive_dir)?)
        } else {
            None
        };

        let mut plan = SyncPlan::compute(&remote, &uploads, downloaded.as_deref());
        plan.to_extract = self.pending_extraction(downloaded.unwrap_or_default());
        tracing::info!(
            "Sync plan: {} remote, {} local, {} to upload, {} to download, {} to extract",
            remote.len(),
            uploads.len(),
            plan.to_upload.len(),
            plan.to_download.len(),
            plan.to_extract.len()
        );
        Ok(plan)
    }

    /// Archives left by an earlier pass that were never fully extracted
    fn pending_extraction(&self, mut archives: Vec<LocalItem>) -> Vec<LocalItem> {
        let root = &self.options.extraction_root;
        archives.retain(|archive| !ArchiveExpander::is_expanded(&archive.path, root));
        archives.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        archives
    }

    /// Run a full pass: plan, transfer, extract.
    ///
    /// Extraction covers the archives downloaded in this pass plus any left
    /// unextracted by an earlier one. An archive that fails to extract is
    /// deleted so the next pass downloads it again.
    ///
    /// Only a failure to compute the plan is returned as an error. Every
    /// per-item failure ends up in the report once all launched operations
    /// have finished.
    pub async fn synchronize(&self, work_dir: &Path, archive_dir: &Path) -> SyncResult<SyncReport> {
        let plan = self.plan(work_dir, archive_dir).await?;

        let ((uploaded, upload_failures), (downloaded, download_failures)) = tokio::join!(
            self.upload_all(&plan.to_upload),
            self.download_all(&plan.to_download, archive_dir),
        );

        let pending: Vec<LocalItem> = plan
            .to_extract
            .iter()
            .chain(&downloaded)
            .cloned()
            .collect();
        let (extracted, extract_failures) = self.extract_all(&pending).await;

        let mut report = SyncReport {
            uploaded,
            upload_failures,
            downloaded: downloaded.into_iter().map(|item| item.identifier).collect(),
            download_failures,
            extracted,
            extract_failures,
        };
        report.sort();
        Ok(report)
    }

    async fn acquire(&self) -> Option<SemaphorePermit<'_>> {
        match &self.transfer_limit {
            // The semaphore is never closed
            Some(limit) => limit.acquire().await.ok(),
            None => None,
        }
    }

    async fn upload_all(&self, items: &[LocalItem]) -> (Vec<ArtifactIdentifier>, Vec<ItemFailure>) {
        let outcomes = join_all(items.iter().map(|item| async move {
            let _permit = self.acquire().await;
            tracing::info!("Uploading {}", item.path.display());
            let outcome = self.catalog.publish(&item.identifier, &item.path).await;
            (item.identifier.clone(), outcome)
        }))
        .await;

        let mut uploaded = Vec::new();
        let mut failures = Vec::new();
        for (identifier, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    tracing::info!("Uploaded {} successfully", identifier);
                    uploaded.push(identifier);
                }
                Err(e @ SyncError::Conflict { .. }) => {
                    tracing::info!("{} already exists remotely, skipping", identifier);
                    failures.push(ItemFailure::from_error(identifier, &e));
                }
                Err(e) => {
                    tracing::warn!("Upload of {} failed: {}", identifier, e);
                    failures.push(ItemFailure::from_error(identifier, &e));
                }
            }
        }
        (uploaded, failures)
    }

    async fn download_all(
        &self,
        records: &[ArtifactRecord],
        archive_dir: &Path,
    ) -> (Vec<LocalItem>, Vec<ItemFailure>) {
        let outcomes = join_all(records.iter().map(|record| async move {
            let _permit = self.acquire().await;
            let outcome = self.download_one(&record.identifier, archive_dir).await;
            (record.identifier.clone(), outcome)
        }))
        .await;

        let mut downloaded = Vec::new();
        let mut failures = Vec::new();
        for (identifier, outcome) in outcomes {
            match outcome {
                Ok(item) => {
                    tracing::info!("Downloaded {} to {}", identifier, item.path.display());
                    downloaded.push(item);
                }
                Err(e) => {
                    tracing::warn!("Download of {} failed: {}", identifier, e);
                    failures.push(ItemFailure::from_error(identifier, &e));
                }
            }
        }
        (downloaded, failures)
    }

    /// Stream one artifact into `<archive_dir>/<identifier>.<ext>`.
    ///
    /// Content lands in a `.part` file first so an interrupted download is
    /// never listed as a downloaded archive.
    async fn download_one(
        &self,
        identifier: &ArtifactIdentifier,
        archive_dir: &Path,
    ) -> SyncResult<LocalItem> {
        if !identifier.is_path_safe() {
            return Err(SyncError::InvalidIdentifier {
                identifier: identifier.clone(),
            });
        }

        let file_name = self.local_cache.archive_file_name(identifier);
        let final_path = archive_dir.join(&file_name);
        let part_path = archive_dir.join(format!("{}.part", file_name));

        let result: SyncResult<()> = async {
            let mut stream = self.catalog.fetch(identifier).await?;
            tokio::fs::create_dir_all(archive_dir).await?;

            let mut file = tokio::fs::File::create(&part_path).await?;
            while let Some(chunk) = stream.next().await {
                file.write_all(&chunk?).await?;
            }
            file.flush().await?;
            drop(file);

            tokio::fs::rename(&part_path, &final_path).await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            if let Err(cleanup) = tokio::fs::remove_file(&part_path).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove {}: {}", part_path.display(), cleanup);
                }
            }
            return Err(e);
        }

        Ok(LocalItem {
            identifier: identifier.clone(),
            path: final_path,
            kind: LocalItemKind::DownloadedArchive,
        })
    }

    async fn extract_all(&self, archives: &[LocalItem]) -> (Vec<ArtifactIdentifier>, Vec<ItemFailure>) {
        let root = &self.options.extraction_root;
        let outcomes = join_all(archives.iter().map(|archive| async move {
            let outcome = ArchiveExpander::expand_blocking(
                archive.identifier.clone(),
                archive.path.clone(),
                root.clone(),
            )
            .await;
            (archive, outcome)
        }))
        .await;

        let mut extracted = Vec::new();
        let mut failures = Vec::new();
        for (archive, outcome) in outcomes {
            match outcome {
                Ok(_) => {
                    tracing::info!("Extracted {} into {}", archive.identifier, root.display());
                    extracted.push(archive.identifier.clone());
                }
                Err(e) => {
                    tracing::warn!("Extraction of {} failed: {}", archive.identifier, e);
                    Self::discard(&archive.path).await;
                    failures.push(ItemFailure::from_error(archive.identifier.clone(), &e));
                }
            }
        }
        (extracted, failures)
    }

    /// Drop an unusable archive so it is no longer counted as downloaded
    async fn discard(path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}
