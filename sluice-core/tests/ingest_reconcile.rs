use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use filetime::{FileTime, set_file_mtime};
use sluice_core::{
    CompletionReport, FileEvent, FileStore, IngestConfig, IngestContext, IngestOutcome,
    LibraryIngestor, Sha256Fingerprinter, SkipReason,
};
use sluice_model::{FileStatus, Library, LibraryFile, NodeId};
use tempfile::TempDir;

#[path = "support/mod.rs"]
mod support;

use support::{Harness, worker};

struct Fixture {
    dir: TempDir,
    harness: Harness,
    ingestor: LibraryIngestor,
    ctx: IngestContext,
}

impl Fixture {
    fn new(edit: impl FnOnce(&mut Library)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut library = Library::new("Media", dir.path());
        edit(&mut library);
        let harness = Harness::new([library.clone()]);
        let ingestor = LibraryIngestor::new(
            harness.store.clone(),
            Arc::new(Sha256Fingerprinter::default()),
            harness.events.clone(),
            IngestConfig::default(),
        );
        let ctx = IngestContext::new(library).unwrap();
        Self {
            dir,
            harness,
            ingestor,
            ctx,
        }
    }

    fn write(&self, relative: &str, body: &[u8]) -> std::path::PathBuf {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, body).unwrap();
        path
    }

    async fn ingest(&self, path: &Path) -> IngestOutcome {
        self.ingestor.ingest(&self.ctx, path, Utc::now()).await.unwrap()
    }

    async fn record(&self, path: &Path) -> Option<LibraryFile> {
        self.harness
            .store
            .get_by_path(&path.to_string_lossy())
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn new_file_is_added_with_hold_and_event() {
    let fixture = Fixture::new(|lib| lib.hold_minutes = 30);
    let mut events = fixture.harness.events.subscribe();
    let path = fixture.write("a.mkv", b"alpha");

    let before = Utc::now();
    let outcome = fixture.ingest(&path).await;
    assert!(matches!(outcome, IngestOutcome::Added(_)));

    let record = fixture.record(&path).await.unwrap();
    assert_eq!(record.status, FileStatus::Unprocessed);
    assert_eq!(record.relative_path, "a.mkv");
    assert_eq!(record.original_size, 5);
    assert!(!record.fingerprint.is_empty());
    assert!(record.hold_until >= before + Duration::minutes(29));
    assert!(matches!(events.try_recv().unwrap(), FileEvent::FileAdded { .. }));
}

#[tokio::test]
async fn rediscovering_an_unchanged_file_is_a_no_op() {
    let fixture = Fixture::new(|_| {});
    let path = fixture.write("a.mkv", b"alpha");
    let IngestOutcome::Added(uid) = fixture.ingest(&path).await else {
        panic!("expected add");
    };

    let mut stored = fixture.harness.store.get_by_uid(uid).await.unwrap().unwrap();
    stored.status = FileStatus::Processed;
    fixture.harness.store.update_one(&stored).await.unwrap();

    assert_eq!(fixture.ingest(&path).await, IngestOutcome::Known(uid));
    assert_eq!(fixture.harness.store.len().await, 1);
    let again = fixture.harness.store.get_by_uid(uid).await.unwrap().unwrap();
    assert_eq!(again.status, FileStatus::Processed);
}

#[tokio::test]
async fn modified_content_is_requeued() {
    let fixture = Fixture::new(|_| {});
    let path = fixture.write("a.mkv", b"alpha");
    let IngestOutcome::Added(uid) = fixture.ingest(&path).await else {
        panic!("expected add");
    };
    let mut stored = fixture.harness.store.get_by_uid(uid).await.unwrap().unwrap();
    let original_fp = stored.fingerprint.clone();
    stored.status = FileStatus::Processed;
    stored.final_size = 3;
    fixture.harness.store.update_one(&stored).await.unwrap();

    fs::write(&path, b"alpha, but longer").unwrap();
    let later = FileTime::from_unix_time(Utc::now().timestamp() + 3_600, 0);
    set_file_mtime(&path, later).unwrap();

    assert_eq!(fixture.ingest(&path).await, IngestOutcome::Requeued(uid));
    let record = fixture.harness.store.get_by_uid(uid).await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Unprocessed);
    assert_eq!(record.final_size, 0);
    assert_ne!(record.fingerprint, original_fp);
    assert_eq!(record.original_size, 17);
}

#[tokio::test]
async fn touched_but_identical_file_stays_known() {
    let fixture = Fixture::new(|_| {});
    let path = fixture.write("a.mkv", b"alpha");
    let IngestOutcome::Added(uid) = fixture.ingest(&path).await else {
        panic!("expected add");
    };
    let later = FileTime::from_unix_time(Utc::now().timestamp() + 3_600, 0);
    set_file_mtime(&path, later).unwrap();

    assert_eq!(fixture.ingest(&path).await, IngestOutcome::Known(uid));
    let record = fixture.harness.store.get_by_uid(uid).await.unwrap().unwrap();
    assert_eq!(record.last_write_time.timestamp(), later.unix_seconds());
}

#[tokio::test]
async fn moved_file_updates_the_existing_record() {
    let fixture = Fixture::new(|_| {});
    let from = fixture.write("old/a.mkv", b"same bytes");
    let IngestOutcome::Added(uid) = fixture.ingest(&from).await else {
        panic!("expected add");
    };

    let to = fixture.dir.path().join("new/a.mkv");
    fs::create_dir_all(to.parent().unwrap()).unwrap();
    fs::rename(&from, &to).unwrap();

    assert_eq!(fixture.ingest(&to).await, IngestOutcome::Moved(uid));
    assert_eq!(fixture.harness.store.len().await, 1);
    let record = fixture.record(&to).await.unwrap();
    assert_eq!(record.uid, uid);
    assert_eq!(record.relative_path, "new/a.mkv");
    assert!(fixture.record(&from).await.is_none());
}

#[tokio::test]
async fn copy_of_present_file_is_a_duplicate() {
    let fixture = Fixture::new(|_| {});
    let first = fixture.write("a.mkv", b"same bytes");
    let IngestOutcome::Added(original_uid) = fixture.ingest(&first).await else {
        panic!("expected add");
    };
    let copy = fixture.write("copy/a.mkv", b"same bytes");

    let outcome = fixture.ingest(&copy).await;
    let IngestOutcome::Duplicate { uid, original } = outcome else {
        panic!("expected duplicate, got {outcome:?}");
    };
    assert_eq!(original, original_uid);
    let record = fixture.harness.store.get_by_uid(uid).await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Duplicate);
    assert_eq!(record.duplicate_uid, Some(original_uid));
    assert_eq!(
        record.duplicate_name,
        Some(first.to_string_lossy().to_string())
    );
    assert_eq!(fixture.harness.store.len().await, 2);
}

#[tokio::test]
async fn downloads_directory_reprocesses_processed_files() {
    let fixture = Fixture::new(|lib| lib.downloads_directory = true);
    let path = fixture.write("a.mkv", b"alpha");
    let IngestOutcome::Added(uid) = fixture.ingest(&path).await else {
        panic!("expected add");
    };
    let mut stored = fixture.harness.store.get_by_uid(uid).await.unwrap().unwrap();
    stored.status = FileStatus::Processed;
    fixture.harness.store.update_one(&stored).await.unwrap();

    assert_eq!(fixture.ingest(&path).await, IngestOutcome::Requeued(uid));
    let record = fixture.harness.store.get_by_uid(uid).await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Unprocessed);
}

#[tokio::test]
async fn filters_and_detection_skip_paths() {
    let fixture = Fixture::new(|lib| {
        lib.extensions = vec!["mkv".into()];
        lib.detection.size_bytes =
            sluice_model::DetectionRange::new(sluice_model::MatchRange::GreaterThan, 3, 0);
    });
    let wrong_ext = fixture.write("a.nfo", b"alpha");
    let hidden = fixture.write(".hidden/a.mkv", b"alpha");
    let tiny = fixture.write("b.mkv", b"ab");
    let missing = fixture.dir.path().join("gone.mkv");

    assert_eq!(
        fixture.ingest(&wrong_ext).await,
        IngestOutcome::Skipped(SkipReason::Filtered)
    );
    assert_eq!(
        fixture.ingest(&hidden).await,
        IngestOutcome::Skipped(SkipReason::Filtered)
    );
    assert_eq!(
        fixture.ingest(&tiny).await,
        IngestOutcome::Skipped(SkipReason::Detection)
    );
    assert_eq!(
        fixture.ingest(&missing).await,
        IngestOutcome::Skipped(SkipReason::Missing)
    );
    assert_eq!(
        fixture.ingest(fixture.dir.path().join(".hidden").as_path()).await,
        IngestOutcome::Skipped(SkipReason::WrongKind)
    );
    assert!(fixture.harness.store.is_empty().await);
}

#[tokio::test]
async fn folder_mode_waits_for_writes_to_settle() {
    let fixture = Fixture::new(|lib| {
        lib.folders = true;
        lib.wait_time_seconds = 60;
    });
    let episode = fixture.write("show/e01.mkv", b"episode one");
    let folder = fixture.dir.path().join("show");

    let IngestOutcome::RetryLater { after } = fixture.ingest(&folder).await else {
        panic!("expected the folder to be left settling");
    };
    assert!(after > std::time::Duration::from_secs(50));
    assert!(after <= std::time::Duration::from_secs(60));

    let old = FileTime::from_unix_time(Utc::now().timestamp() - 600, 0);
    set_file_mtime(&episode, old).unwrap();
    set_file_mtime(&folder, old).unwrap();
    let outcome = fixture.ingest(&folder).await;
    assert!(matches!(outcome, IngestOutcome::Added(_)), "{outcome:?}");

    let record = fixture.record(&folder).await.unwrap();
    assert!(record.is_directory);
    assert_eq!(record.original_size, 11);
    assert_eq!(
        fixture.ingest(&episode).await,
        IngestOutcome::Skipped(SkipReason::WrongKind)
    );
}

#[tokio::test]
async fn rewrite_during_processing_keeps_the_claim() {
    let fixture = Fixture::new(|lib| lib.max_runners = 1);
    let path = fixture.write("a.mkv", b"alpha");
    let IngestOutcome::Added(uid) = fixture.ingest(&path).await else {
        panic!("expected add");
    };

    let request = worker(NodeId::new());
    let claimed = fixture.harness.claims.next_file(&request).await.unwrap().unwrap();
    assert_eq!(claimed.uid, uid);

    // The flow rewrites its input in place while it still holds the claim.
    fs::write(&path, b"alpha, transcoded").unwrap();
    let later = FileTime::from_unix_time(Utc::now().timestamp() + 3_600, 0);
    set_file_mtime(&path, later).unwrap();

    assert_eq!(fixture.ingest(&path).await, IngestOutcome::Claimed(uid));
    let record = fixture.harness.store.get_by_uid(uid).await.unwrap().unwrap();
    assert_eq!(record.status, FileStatus::Processing);
    assert_eq!(record.worker_id, Some(request.worker_id));
    assert_eq!(fixture.harness.registry.snapshot().len(), 1);

    let report = CompletionReport {
        worker_id: request.worker_id,
        success: true,
        final_size: 17,
        final_fingerprint: None,
        executed_nodes: Vec::new(),
        output_path: None,
        failure_reason: None,
        final_metadata: Default::default(),
    };
    let done = fixture.harness.claims.complete(uid, report).await.unwrap();
    assert_eq!(done.status, FileStatus::Processed);
    assert!(fixture.harness.registry.snapshot().is_empty());

    // Once the claim is over, the rewrite is seen as new content and the
    // library has a free slot for it.
    assert_eq!(fixture.ingest(&path).await, IngestOutcome::Requeued(uid));
    let other = worker(NodeId::new());
    let reclaimed = fixture.harness.claims.next_file(&other).await.unwrap().unwrap();
    assert_eq!(reclaimed.uid, uid);
    assert_eq!(reclaimed.worker_id, Some(other.worker_id));
}
