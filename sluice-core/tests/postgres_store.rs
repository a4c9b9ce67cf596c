//! Postgres adapter behaviour. Needs `DATABASE_URL` pointing at a server the
//! test harness may create scratch databases on.

use chrono::{Duration, Utc};
use sluice_core::{
    FileOrdering, FilePredicate, FileQuery, FileStore, PostgresFileStore, SortField, SortTerm,
};
use sluice_model::{FileStatus, Library, LibraryFile, NodeId, ProcessingOrder, WorkerId};
use sqlx::PgPool;

fn file(library: &Library, relative: &str, size: u64) -> LibraryFile {
    let mut file = LibraryFile::discovered(library, library.path.join(relative).to_string_lossy());
    file.original_size = size;
    file.fingerprint = format!("fp-{relative}");
    file
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn round_trips_and_looks_up_records(pool: PgPool) {
    let store = PostgresFileStore::new(pool).await.expect("store");
    let library = Library::new("Movies", "/media/movies");
    let mut a = file(&library, "a.mkv", 10);
    a.executed_nodes.push(sluice_model::ExecutedNode {
        node_name: "probe".into(),
        node_uid: None,
        output: 1,
        processing_time_ms: 5,
    });
    a.original_metadata.insert("codec".into(), "h264".into());
    a.flags.force_processing = true;
    store.insert_one(&a).await.unwrap();

    let fetched = store.get_by_uid(a.uid).await.unwrap().unwrap();
    assert_eq!(fetched.name, a.name);
    assert_eq!(fetched.flags, a.flags);
    assert_eq!(fetched.executed_nodes, a.executed_nodes);
    assert_eq!(fetched.original_metadata, a.original_metadata);
    assert_eq!(fetched.hold_until, a.hold_until);
    assert_eq!(
        fetched.date_created.timestamp_micros(),
        a.date_created.timestamp_micros()
    );
    assert_eq!(
        store.get_by_path(&a.name).await.unwrap().map(|f| f.uid),
        Some(a.uid)
    );
    assert_eq!(
        store.get_by_fingerprint("fp-a.mkv").await.unwrap().map(|f| f.uid),
        Some(a.uid)
    );
    assert!(store.get_by_fingerprint("").await.unwrap().is_none());

    assert_eq!(store.delete_by_uids(&[a.uid]).await.unwrap(), 1);
    assert!(store.get_by_uid(a.uid).await.unwrap().is_none());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn conditional_updates_have_one_winner(pool: PgPool) {
    let store = PostgresFileStore::new(pool).await.expect("store");
    let library = Library::new("Movies", "/media/movies");
    let a = file(&library, "a.mkv", 10);
    store.insert_one(&a).await.unwrap();

    let mut first = a.clone();
    first.status = FileStatus::Processing;
    first.worker_id = Some(WorkerId::new());
    first.node_id = Some(NodeId::new());
    let mut second = first.clone();
    second.worker_id = Some(WorkerId::new());

    let (won_a, won_b) = tokio::join!(
        store.conditional_update_status(a.uid, FileStatus::Unprocessed, &first),
        store.conditional_update_status(a.uid, FileStatus::Unprocessed, &second),
    );
    assert_ne!(won_a.unwrap(), won_b.unwrap());

    let owner = store.get_by_uid(a.uid).await.unwrap().unwrap().worker_id.unwrap();
    let mut done = first.clone();
    done.status = FileStatus::Processed;
    let other = if Some(owner) == first.worker_id {
        second.worker_id.unwrap()
    } else {
        first.worker_id.unwrap()
    };
    assert!(!store.conditional_update_owned(a.uid, other, &done).await.unwrap());
    assert!(store.conditional_update_owned(a.uid, owner, &done).await.unwrap());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn queries_follow_library_strategies(pool: PgPool) {
    let store = PostgresFileStore::new(pool).await.expect("store");
    let mut alpha = Library::new("Alpha", "/media/alpha");
    alpha.processing_order = ProcessingOrder::Alphabetical;
    let mut small = Library::new("Small", "/media/small");
    small.processing_order = ProcessingOrder::SmallestFirst;

    let base = Utc::now() - Duration::hours(1);
    let mut rows = vec![
        file(&alpha, "c.mkv", 1),
        file(&small, "big.mkv", 300),
        file(&alpha, "a.mkv", 1),
        file(&small, "tiny.mkv", 3),
        file(&alpha, "b.mkv", 1),
    ];
    for (i, row) in rows.iter_mut().enumerate() {
        row.date_created = base + Duration::seconds(i as i64);
    }
    let mut held = file(&alpha, "held.mkv", 1);
    held.hold_until = Utc::now() + Duration::hours(1);
    rows.push(held);
    store.insert_many(&rows).await.unwrap();

    let ordering = FileOrdering::with_strategies(&[
        (alpha.id, ProcessingOrder::Alphabetical),
        (small.id, ProcessingOrder::SmallestFirst),
    ]);
    let query = FileQuery::new(
        FilePredicate::StatusIs(FileStatus::Unprocessed)
            .and(FilePredicate::HoldAtOrBefore(Utc::now())),
    )
    .ordered(ordering);
    let names: Vec<String> = store
        .query(&query)
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.relative_path)
        .collect();
    assert_eq!(names, ["a.mkv", "b.mkv", "c.mkv", "tiny.mkv", "big.mkv"]);

    let count = store
        .count(&FilePredicate::StatusIs(FileStatus::Unprocessed))
        .await
        .unwrap();
    assert_eq!(count, 6);

    let newest = store
        .query(
            &FileQuery::new(FilePredicate::All)
                .ordered(FileOrdering::by(SortTerm::desc(SortField::DateCreated)))
                .page(0, Some(1)),
        )
        .await
        .unwrap();
    assert_eq!(newest.len(), 1);
}
