/*!
# Artifact Sync

Reconciles a build agent's local artifact cache with a remote artifact store.

The engine lists the remote catalog once, diffs it against the locally staged
files, fans out uploads and downloads concurrently, and unpacks freshly
downloaded archives into a shared extraction root. Failures of individual
items are recorded in the [`SyncReport`] instead of aborting the batch.
*/

pub mod archive;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod local_cache;
pub mod report;
pub mod types;

pub use archive::ArchiveExpander;
pub use catalog::{ByteStream, FsCatalog, HttpCatalog, HttpCatalogConfig, RemoteCatalog};
pub use engine::{SyncEngine, SyncOptions, SyncPlan};
pub use error::{SyncError, SyncResult};
pub use local_cache::{LocalCache, NamingConvention};
pub use report::{FailureKind, ItemFailure, SyncReport};
pub use types::{ArtifactIdentifier, ArtifactRecord, LocalItem, LocalItemKind};
