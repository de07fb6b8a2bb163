use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use artifact_sync::{FsCatalog, HttpCatalog, HttpCatalogConfig, RemoteCatalog, SyncOptions};

use crate::cli::{DirArgs, SyncArgs};

pub const RUNNER_TEMP_VAR: &str = "RUNNER_TEMP";
pub const UPLOAD_DIR_NAME: &str = "turbo-cache";
pub const ARCHIVE_DIR_NAME: &str = "turbo-archives";
pub const EXTRACT_DIR_NAME: &str = "turbo-downloads";
pub const SERVER_LOG_NAME: &str = "out.log";

/// Local directories one sync pass works with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDirs {
    pub work_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub extract_dir: PathBuf,
}

impl CacheDirs {
    /// Fill unset directories from the runner's scratch root
    pub fn resolve(args: &DirArgs, runner_temp: &Path) -> Self {
        Self {
            work_dir: args
                .work_dir
                .clone()
                .unwrap_or_else(|| runner_temp.join(UPLOAD_DIR_NAME)),
            archive_dir: args
                .archive_dir
                .clone()
                .unwrap_or_else(|| runner_temp.join(ARCHIVE_DIR_NAME)),
            extract_dir: args
                .extract_dir
                .clone()
                .unwrap_or_else(|| runner_temp.join(EXTRACT_DIR_NAME)),
        }
    }

    pub async fn ensure(&self) -> Result<()> {
        for dir in [&self.work_dir, &self.archive_dir, &self.extract_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

/// `$RUNNER_TEMP`, or the system temp dir off the runner
pub fn runner_temp() -> PathBuf {
    std::env::var_os(RUNNER_TEMP_VAR)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

pub fn sync_options(args: &SyncArgs, dirs: &CacheDirs) -> SyncOptions {
    SyncOptions::new(&dirs.extract_dir)
        .with_download(args.download)
        .with_max_concurrent_transfers(args.max_concurrency)
}

pub fn build_catalog(args: &SyncArgs) -> Result<Arc<dyn RemoteCatalog>> {
    if let Some(url) = &args.remote.remote_url {
        let config = HttpCatalogConfig::new(url.trim_end_matches('/'))
            .with_token(args.token.clone())
            .with_timeout(Duration::from_secs(args.request_timeout_secs));
        let catalog = HttpCatalog::new(config).context("Failed to build artifact store client")?;
        tracing::info!("🌐 Using artifact store at {}", url);
        return Ok(Arc::new(catalog));
    }

    if let Some(dir) = &args.remote.remote_dir {
        tracing::info!("📁 Using artifact directory {}", dir.display());
        return Ok(Arc::new(FsCatalog::new(dir)));
    }

    anyhow::bail!("No artifact store configured: pass --remote-url or --remote-dir")
}
