//! Query surface over the remote artifact store.

mod filesystem;
mod http;

use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::error::SyncResult;
use crate::types::{ArtifactIdentifier, ArtifactRecord};

pub use self::filesystem::FsCatalog;
pub use self::http::{HttpCatalog, HttpCatalogConfig};

/// Artifact content as it arrives from the store
pub type ByteStream = Pin<Box<dyn Stream<Item = SyncResult<Bytes>> + Send>>;

/// Remote artifact store operations used by the sync engine.
///
/// Implementations carry their own transport timeouts; the engine adds none.
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// List every artifact currently known to the store.
    ///
    /// Must be side-effect free. Fails with `RemoteUnavailable` if the store
    /// cannot be reached.
    async fn list_artifacts(&self) -> SyncResult<Vec<ArtifactRecord>>;

    /// Stream the content of an artifact.
    ///
    /// Fails with `NotFound` if the artifact vanished since it was listed.
    async fn fetch(&self, identifier: &ArtifactIdentifier) -> SyncResult<ByteStream>;

    /// Publish the file at `path` as a new artifact.
    ///
    /// Fails with `Conflict` if the identifier already exists remotely.
    async fn publish(&self, identifier: &ArtifactIdentifier, path: &Path) -> SyncResult<()>;
}
