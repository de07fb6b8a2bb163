/*!
# Sync Integration Tests

End-to-end passes of the sync engine against an in-memory catalog and the
directory-backed catalog: planning, partial failure containment, archive
extraction, idempotence and the transfer ceiling.
*/

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use artifact_sync::{
    ArtifactIdentifier, ArtifactRecord, ByteStream, FailureKind, FsCatalog, RemoteCatalog,
    SyncEngine, SyncError, SyncOptions, SyncResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;

/// Catalog double with scripted failures
#[derive(Default)]
struct MockCatalog {
    records: Vec<ArtifactRecord>,
    contents: HashMap<String, Vec<u8>>,
    publish_failures: HashMap<String, FailureKind>,
    unavailable: bool,
    publish_delay: Duration,
    published: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockCatalog {
    fn with_remote(ids: &[&str]) -> Self {
        Self {
            records: ids
                .iter()
                .map(|id| ArtifactRecord {
                    identifier: (*id).into(),
                    size_bytes: 0,
                })
                .collect(),
            ..Default::default()
        }
    }

    fn published(&self) -> Vec<String> {
        let mut published = self.published.lock().unwrap().clone();
        published.sort();
        published
    }
}

#[async_trait]
impl RemoteCatalog for MockCatalog {
    async fn list_artifacts(&self) -> SyncResult<Vec<ArtifactRecord>> {
        if self.unavailable {
            return Err(SyncError::remote_unavailable("connection refused"));
        }
        Ok(self.records.clone())
    }

    async fn fetch(&self, identifier: &ArtifactIdentifier) -> SyncResult<ByteStream> {
        let data = self
            .contents
            .get(identifier.as_str())
            .cloned()
            .ok_or_else(|| SyncError::NotFound {
                identifier: identifier.clone(),
            })?;

        // Two chunks to exercise streaming into the part file
        let split = data.len() / 2;
        let chunks = vec![
            Ok(Bytes::copy_from_slice(&data[..split])),
            Ok(Bytes::copy_from_slice(&data[split..])),
        ];
        Ok(Box::pin(tokio_stream::iter(chunks)))
    }

    async fn publish(&self, identifier: &ArtifactIdentifier, path: &Path) -> SyncResult<()> {
        assert!(path.exists(), "publishing a file that is not staged");

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(self.publish_delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.publish_failures.get(identifier.as_str()) {
            Some(FailureKind::Conflict) => Err(SyncError::Conflict {
                identifier: identifier.clone(),
            }),
            Some(_) => Err(SyncError::remote_unavailable("upload rejected")),
            None => {
                self.published.lock().unwrap().push(identifier.to_string());
                Ok(())
            }
        }
    }
}

struct Workspace {
    _root: TempDir,
    work_dir: std::path::PathBuf,
    archive_dir: std::path::PathBuf,
    extract_dir: std::path::PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let work_dir = root.path().join("turbo-cache");
        let archive_dir = root.path().join("turbo-archives");
        let extract_dir = root.path().join("turbo-downloads");
        for dir in [&work_dir, &archive_dir, &extract_dir] {
            std::fs::create_dir_all(dir).unwrap();
        }
        Self {
            _root: root,
            work_dir,
            archive_dir,
            extract_dir,
        }
    }

    fn stage(&self, names: &[&str]) {
        for name in names {
            std::fs::write(self.work_dir.join(name), format!("content of {}", name)).unwrap();
        }
    }

    fn options(&self) -> SyncOptions {
        SyncOptions::new(&self.extract_dir)
    }
}

fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, zip::write::FileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn ids(list: &[ArtifactIdentifier]) -> Vec<&str> {
    list.iter().map(|id| id.as_str()).collect()
}

#[tokio::test]
async fn test_uploads_only_what_remote_lacks() {
    let ws = Workspace::new();
    ws.stage(&["a.gz", "c.gz", "out.log"]);
    let catalog = Arc::new(MockCatalog::with_remote(&["a", "b"]));
    let engine = SyncEngine::new(catalog.clone(), ws.options());

    let plan = engine.plan(&ws.work_dir, &ws.archive_dir).await.unwrap();
    let planned: Vec<&str> = plan
        .to_upload
        .iter()
        .map(|item| item.identifier.as_str())
        .collect();
    assert_eq!(planned, vec!["c"]);

    let report = engine
        .synchronize(&ws.work_dir, &ws.archive_dir)
        .await
        .unwrap();

    assert_eq!(ids(&report.uploaded), vec!["c"]);
    assert!(report.upload_failures.is_empty());
    assert!(report.downloaded.is_empty());
    assert_eq!(catalog.published(), vec!["c"]);
    assert!(!report.has_failures());
}

#[tokio::test]
async fn test_failed_upload_does_not_block_siblings() {
    let ws = Workspace::new();
    ws.stage(&["a.gz", "b.gz", "d.gz"]);
    let mut catalog = MockCatalog::with_remote(&[]);
    catalog
        .publish_failures
        .insert("a".to_string(), FailureKind::Conflict);
    catalog
        .publish_failures
        .insert("d".to_string(), FailureKind::RemoteUnavailable);
    let catalog = Arc::new(catalog);
    let engine = SyncEngine::new(catalog.clone(), ws.options());

    let report = engine
        .synchronize(&ws.work_dir, &ws.archive_dir)
        .await
        .unwrap();

    assert_eq!(ids(&report.uploaded), vec!["b"]);
    let failures: Vec<(&str, FailureKind)> = report
        .upload_failures
        .iter()
        .map(|failure| (failure.identifier.as_str(), failure.kind))
        .collect();
    assert_eq!(
        failures,
        vec![
            ("a", FailureKind::Conflict),
            ("d", FailureKind::RemoteUnavailable)
        ]
    );
    assert!(report.has_failures());
}

#[tokio::test]
async fn test_conflict_only_is_not_a_failure() {
    let ws = Workspace::new();
    ws.stage(&["a.gz", "b.gz"]);
    let mut catalog = MockCatalog::with_remote(&[]);
    catalog
        .publish_failures
        .insert("a".to_string(), FailureKind::Conflict);
    let engine = SyncEngine::new(Arc::new(catalog), ws.options());

    let report = engine
        .synchronize(&ws.work_dir, &ws.archive_dir)
        .await
        .unwrap();

    assert_eq!(ids(&report.uploaded), vec!["b"]);
    assert!(!report.has_failures());
}

#[tokio::test]
async fn test_unreachable_catalog_aborts_the_pass() {
    let ws = Workspace::new();
    ws.stage(&["a.gz"]);
    let catalog = Arc::new(MockCatalog {
        unavailable: true,
        ..Default::default()
    });
    let engine = SyncEngine::new(catalog.clone(), ws.options().with_download(true));

    let err = engine
        .synchronize(&ws.work_dir, &ws.archive_dir)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::RemoteUnavailable { .. }));
    assert!(catalog.published().is_empty());
}

#[tokio::test]
async fn test_corrupt_archive_is_isolated() {
    let ws = Workspace::new();
    let mut catalog = MockCatalog::with_remote(&["x", "y"]);
    catalog.contents.insert(
        "x".to_string(),
        zip_bytes(&[("x.gz", b"cached build output")]),
    );
    catalog
        .contents
        .insert("y".to_string(), b"this is not a zip archive".to_vec());
    let engine = SyncEngine::new(Arc::new(catalog), ws.options().with_download(true));

    let report = engine
        .synchronize(&ws.work_dir, &ws.archive_dir)
        .await
        .unwrap();

    assert_eq!(ids(&report.downloaded), vec!["x", "y"]);
    assert_eq!(ids(&report.extracted), vec!["x"]);
    assert_eq!(report.extract_failures.len(), 1);
    assert_eq!(report.extract_failures[0].identifier.as_str(), "y");
    assert_eq!(report.extract_failures[0].kind, FailureKind::CorruptArchive);

    assert_eq!(
        std::fs::read(ws.extract_dir.join("x.gz")).unwrap(),
        b"cached build output"
    );
    let visible: Vec<_> = std::fs::read_dir(&ws.extract_dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(visible.len(), 1);
    assert!(ws.archive_dir.join("x.zip").exists());
    // Unusable archives are dropped so they count as absent next time
    assert!(!ws.archive_dir.join("y.zip").exists());
}

#[tokio::test]
async fn test_leftover_archive_is_extracted() {
    let ws = Workspace::new();
    std::fs::write(
        ws.archive_dir.join("x.zip"),
        zip_bytes(&[("x.gz", b"from an earlier pass")]),
    )
    .unwrap();
    let catalog = Arc::new(MockCatalog::with_remote(&["x"]));
    let engine = SyncEngine::new(catalog, ws.options().with_download(true));

    let report = engine
        .synchronize(&ws.work_dir, &ws.archive_dir)
        .await
        .unwrap();

    assert!(report.downloaded.is_empty());
    assert_eq!(ids(&report.extracted), vec!["x"]);
    assert_eq!(
        std::fs::read(ws.extract_dir.join("x.gz")).unwrap(),
        b"from an earlier pass"
    );

    let again = engine
        .synchronize(&ws.work_dir, &ws.archive_dir)
        .await
        .unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn test_corrupt_archive_is_fetched_again() {
    let ws = Workspace::new();

    let mut broken = MockCatalog::with_remote(&["y"]);
    broken
        .contents
        .insert("y".to_string(), b"truncated upload".to_vec());
    let engine = SyncEngine::new(Arc::new(broken), ws.options().with_download(true));
    let first = engine
        .synchronize(&ws.work_dir, &ws.archive_dir)
        .await
        .unwrap();
    assert_eq!(first.extract_failures.len(), 1);

    let mut repaired = MockCatalog::with_remote(&["y"]);
    repaired
        .contents
        .insert("y".to_string(), zip_bytes(&[("y.gz", b"repaired")]));
    let engine = SyncEngine::new(Arc::new(repaired), ws.options().with_download(true));
    let second = engine
        .synchronize(&ws.work_dir, &ws.archive_dir)
        .await
        .unwrap();

    assert_eq!(ids(&second.downloaded), vec!["y"]);
    assert_eq!(ids(&second.extracted), vec!["y"]);
    assert_eq!(std::fs::read(ws.extract_dir.join("y.gz")).unwrap(), b"repaired");
}

#[tokio::test]
async fn test_vanished_artifact_is_recorded_per_item() {
    let ws = Workspace::new();
    let mut catalog = MockCatalog::with_remote(&["gone", "kept"]);
    catalog
        .contents
        .insert("kept".to_string(), zip_bytes(&[("kept.gz", b"k")]));
    let engine = SyncEngine::new(Arc::new(catalog), ws.options().with_download(true));

    let report = engine
        .synchronize(&ws.work_dir, &ws.archive_dir)
        .await
        .unwrap();

    assert_eq!(ids(&report.downloaded), vec!["kept"]);
    assert_eq!(report.download_failures.len(), 1);
    assert_eq!(report.download_failures[0].kind, FailureKind::NotFound);
    assert!(!ws.archive_dir.join("gone.zip").exists());
    assert!(!ws.archive_dir.join("gone.zip.part").exists());
    assert_eq!(ids(&report.extracted), vec!["kept"]);
}

#[tokio::test]
async fn test_second_pass_has_nothing_to_do() {
    let ws = Workspace::new();
    let store = TempDir::new().unwrap();
    let seed = TempDir::new().unwrap();
    let seed_file = seed.path().join("b.gz");
    std::fs::write(&seed_file, b"remote only").unwrap();

    let catalog = Arc::new(FsCatalog::new(store.path()));
    catalog.publish(&"b".into(), &seed_file).await.unwrap();
    ws.stage(&["a.gz", "c.gz"]);

    let engine = SyncEngine::new(catalog, ws.options().with_download(true));

    let first = engine
        .synchronize(&ws.work_dir, &ws.archive_dir)
        .await
        .unwrap();
    assert_eq!(ids(&first.uploaded), vec!["a", "c"]);
    assert_eq!(ids(&first.downloaded), vec!["b"]);
    assert_eq!(ids(&first.extracted), vec!["b"]);
    assert_eq!(
        std::fs::read(ws.extract_dir.join("b.gz")).unwrap(),
        b"remote only"
    );

    let plan = engine.plan(&ws.work_dir, &ws.archive_dir).await.unwrap();
    assert!(plan.is_empty());

    let second = engine
        .synchronize(&ws.work_dir, &ws.archive_dir)
        .await
        .unwrap();
    assert!(second.is_empty());
}

#[tokio::test]
async fn test_transfer_ceiling_is_respected() {
    let ws = Workspace::new();
    let names: Vec<String> = (0..6).map(|i| format!("item-{}.gz", i)).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    ws.stage(&refs);

    let bounded = Arc::new(MockCatalog {
        publish_delay: Duration::from_millis(20),
        ..Default::default()
    });
    let engine = SyncEngine::new(
        bounded.clone(),
        ws.options().with_max_concurrent_transfers(Some(2)),
    );
    let report = engine
        .synchronize(&ws.work_dir, &ws.archive_dir)
        .await
        .unwrap();
    assert_eq!(report.uploaded.len(), 6);
    assert_eq!(bounded.max_in_flight.load(Ordering::SeqCst), 2);

    let unbounded = Arc::new(MockCatalog {
        publish_delay: Duration::from_millis(20),
        ..Default::default()
    });
    let engine = SyncEngine::new(unbounded.clone(), ws.options());
    engine
        .synchronize(&ws.work_dir, &ws.archive_dir)
        .await
        .unwrap();
    assert_eq!(unbounded.max_in_flight.load(Ordering::SeqCst), 6);
}
