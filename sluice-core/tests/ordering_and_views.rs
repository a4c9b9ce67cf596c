use chrono::{Duration, Utc};
use sluice_core::{EligibilityRequest, FileStore};
use sluice_model::time::epoch_floor;
use sluice_model::{FileStatus, FileView, Library, NodeId, ProcessingOrder};

#[path = "support/mod.rs"]
mod support;

use support::{Harness, worker};

fn names(files: &[sluice_model::LibraryFile]) -> Vec<String> {
    files.iter().map(|f| f.relative_path.clone()).collect()
}

#[tokio::test]
async fn each_library_follows_its_declared_order() {
    let mut alpha = Library::new("Alpha", "/media/alpha");
    alpha.processing_order = ProcessingOrder::Alphabetical;
    let mut small = Library::new("Small", "/media/small");
    small.processing_order = ProcessingOrder::SmallestFirst;
    let harness = Harness::new([alpha.clone(), small.clone()]);

    harness.seed(&alpha, "charlie.mkv", 1).await;
    harness.seed(&small, "big.mkv", 3_000).await;
    harness.seed(&alpha, "alpha.mkv", 1).await;
    harness.seed(&small, "tiny.mkv", 10).await;
    harness.seed(&alpha, "bravo.mkv", 1).await;
    harness.seed(&small, "medium.mkv", 500).await;

    let upcoming = harness.admin.upcoming(10, Utc::now()).await.unwrap();
    let alpha_order: Vec<_> = upcoming
        .iter()
        .filter(|f| f.library_id == alpha.id)
        .map(|f| f.relative_path.as_str())
        .collect();
    let small_order: Vec<_> = upcoming
        .iter()
        .filter(|f| f.library_id == small.id)
        .map(|f| f.relative_path.as_str())
        .collect();
    assert_eq!(alpha_order, ["alpha.mkv", "bravo.mkv", "charlie.mkv"]);
    assert_eq!(small_order, ["tiny.mkv", "medium.mkv", "big.mkv"]);
}

#[tokio::test]
async fn as_found_libraries_use_discovery_order() {
    let library = Library::new("Movies", "/media/movies");
    let harness = Harness::new([library.clone()]);
    harness.seed(&library, "b.mkv", 1).await;
    harness.seed(&library, "a.mkv", 1).await;
    harness.seed(&library, "c.mkv", 1).await;

    let upcoming = harness.admin.upcoming(10, Utc::now()).await.unwrap();
    assert_eq!(names(&upcoming), ["b.mkv", "a.mkv", "c.mkv"]);
}

#[tokio::test]
async fn largest_first_sorts_by_size_descending() {
    let mut library = Library::new("Movies", "/media/movies");
    library.processing_order = ProcessingOrder::LargestFirst;
    let harness = Harness::new([library.clone()]);
    harness.seed(&library, "medium.mkv", 500).await;
    harness.seed(&library, "tiny.mkv", 10).await;
    harness.seed(&library, "huge.mkv", 9_000).await;
    harness.seed(&library, "big.mkv", 3_000).await;

    let upcoming = harness.admin.upcoming(10, Utc::now()).await.unwrap();
    assert_eq!(
        names(&upcoming),
        ["huge.mkv", "big.mkv", "medium.mkv", "tiny.mkv"]
    );

    let claimed = harness.claims.next_file(&worker(NodeId::new())).await.unwrap().unwrap();
    assert_eq!(claimed.relative_path, "huge.mkv");
}

#[tokio::test]
async fn newest_and_oldest_first_follow_creation_time() {
    let mut newest = Library::new("Newest", "/media/newest");
    newest.processing_order = ProcessingOrder::NewestFirst;
    let mut oldest = Library::new("Oldest", "/media/oldest");
    oldest.processing_order = ProcessingOrder::OldestFirst;
    let harness = Harness::new([newest.clone(), oldest.clone()]);

    // Discovery order deliberately disagrees with creation time.
    let now = Utc::now();
    for library in [&newest, &oldest] {
        for (name, age_days) in [("mid.mkv", 10), ("new.mkv", 1), ("old.mkv", 30)] {
            harness
                .seed_with(library, name, |f| {
                    f.creation_time = now - Duration::days(age_days)
                })
                .await;
        }
    }

    let upcoming = harness.admin.upcoming(10, now).await.unwrap();
    let order_of = |id| {
        upcoming
            .iter()
            .filter(|f| f.library_id == id)
            .map(|f| f.relative_path.as_str())
            .collect::<Vec<_>>()
    };
    assert_eq!(order_of(newest.id), ["new.mkv", "mid.mkv", "old.mkv"]);
    assert_eq!(order_of(oldest.id), ["old.mkv", "mid.mkv", "new.mkv"]);
}

#[tokio::test]
async fn random_order_returns_every_file_and_varies() {
    let mut library = Library::new("Shuffled", "/media/shuffled");
    library.processing_order = ProcessingOrder::Random;
    let harness = Harness::new([library.clone()]);
    let mut expected = Vec::new();
    for i in 0..8 {
        let name = format!("f{i}.mkv");
        harness.seed(&library, &name, 100).await;
        expected.push(name);
    }

    let mut orders = std::collections::HashSet::new();
    for _ in 0..20 {
        let upcoming = harness.admin.upcoming(10, Utc::now()).await.unwrap();
        let order = names(&upcoming);
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(sorted, expected, "every file is listed exactly once");
        orders.insert(order);
    }
    assert!(orders.len() > 1, "order should change between requests");
}

#[tokio::test]
async fn strategy_libraries_are_drained_before_as_found_ones() {
    let as_found = Library::new("Inbox", "/media/inbox");
    let mut sized = Library::new("Sized", "/media/sized");
    sized.processing_order = ProcessingOrder::SmallestFirst;
    let harness = Harness::new([as_found.clone(), sized.clone()]);

    harness.seed(&as_found, "first.mkv", 1).await;
    harness.seed(&sized, "b.mkv", 200).await;
    harness.seed(&sized, "a.mkv", 100).await;
    harness.seed(&as_found, "second.mkv", 1).await;

    let upcoming = harness.admin.upcoming(10, Utc::now()).await.unwrap();
    assert_eq!(
        names(&upcoming),
        ["a.mkv", "b.mkv", "first.mkv", "second.mkv"]
    );

    // Capping the strategy library lets the as-found files through.
    let request = worker(NodeId::new());
    let mut capped = sized.clone();
    capped.max_runners = 1;
    harness.catalog.upsert(capped).await;
    let claimed = harness.claims.next_file(&request).await.unwrap().unwrap();
    assert_eq!(claimed.relative_path, "a.mkv");
    let next = harness.claims.next_file(&worker(NodeId::new())).await.unwrap().unwrap();
    assert_eq!(next.relative_path, "first.mkv");
}

#[tokio::test]
async fn move_to_top_jumps_the_queue_in_request_order() {
    let library = Library::new("Movies", "/media/movies");
    let harness = Harness::new([library.clone()]);
    harness.seed(&library, "a.mkv", 1).await;
    let b = harness.seed(&library, "b.mkv", 1).await;
    let c = harness.seed(&library, "c.mkv", 1).await;

    harness.admin.move_to_top(&[c.uid, b.uid]).await.unwrap();
    let upcoming = harness.admin.upcoming(10, Utc::now()).await.unwrap();
    assert_eq!(names(&upcoming), ["c.mkv", "b.mkv", "a.mkv"]);

    let claimed = harness.claims.next_file(&worker(NodeId::new())).await.unwrap().unwrap();
    assert_eq!(claimed.uid, c.uid);
}

#[tokio::test]
async fn hold_moves_files_between_views() {
    let library = Library::new("Movies", "/media/movies");
    let harness = Harness::new([library.clone()]);
    let now = Utc::now();
    let held = harness
        .seed_with(&library, "held.mkv", |f| f.hold_until = now + Duration::hours(1))
        .await;
    let ready = harness
        .seed_with(&library, "ready.mkv", |f| f.hold_until = now - Duration::minutes(1))
        .await;

    let unprocessed = harness
        .admin
        .list(&EligibilityRequest::for_view(FileView::default()), now)
        .await
        .unwrap();
    assert_eq!(unprocessed.iter().map(|f| f.uid).collect::<Vec<_>>(), [ready.uid]);

    let on_hold = harness
        .admin
        .list(&EligibilityRequest::for_view(FileView::OnHold), now)
        .await
        .unwrap();
    assert_eq!(on_hold.iter().map(|f| f.uid).collect::<Vec<_>>(), [held.uid]);

    harness.admin.unhold(&[held.uid]).await.unwrap();
    let stored = harness.store.get_by_uid(held.uid).await.unwrap().unwrap();
    assert_eq!(stored.hold_until, epoch_floor());
    assert_eq!(
        harness.eligibility.count(FileView::OnHold, now).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn summary_counts_stored_and_derived_views() {
    let library = Library::new("Movies", "/media/movies");
    let mut off = Library::new("Off", "/media/off");
    off.enabled = false;
    let harness = Harness::new([library.clone(), off.clone()]);
    harness.seed(&library, "a.mkv", 1).await;
    harness.seed(&library, "b.mkv", 1).await;
    harness.seed(&off, "c.mkv", 1).await;
    harness
        .seed_with(&library, "d.mkv", |f| f.status = FileStatus::Duplicate)
        .await;

    let summary = harness.admin.summary(Utc::now()).await.unwrap();
    assert_eq!(summary.count(FileView::Stored(FileStatus::Unprocessed)), 2);
    assert_eq!(summary.count(FileView::Stored(FileStatus::Duplicate)), 1);
    assert_eq!(summary.count(FileView::Disabled), 1);
    assert_eq!(summary.count(FileView::OutOfSchedule), 0);
    assert_eq!(summary.count(FileView::OnHold), 0);
}

#[tokio::test]
async fn reprocess_resets_run_artifacts() {
    let library = Library::new("Movies", "/media/movies");
    let harness = Harness::new([library.clone()]);
    let file = harness
        .seed_with(&library, "done.mkv", |f| {
            f.status = FileStatus::Processed;
            f.final_size = 10;
            f.output_path = Some("/out/done.mkv".into());
            f.failure_reason = Some("old".into());
            f.process_on_node = Some(NodeId::new());
            f.processing_ended = Utc::now();
            f.original_metadata.insert("codec".into(), "h264".into());
            f.final_metadata.insert("codec".into(), "hevc".into());
        })
        .await;

    let mut events = harness.events.subscribe();
    harness.admin.reprocess(&[file.uid], None).await.unwrap();
    let reset = harness.store.get_by_uid(file.uid).await.unwrap().unwrap();
    assert_eq!(reset.status, FileStatus::Unprocessed);
    assert_eq!(reset.final_size, 0);
    assert!(reset.output_path.is_none());
    assert!(reset.failure_reason.is_none());
    assert!(reset.process_on_node.is_none());
    assert!(reset.executed_nodes.is_empty());
    assert!(reset.original_metadata.is_empty());
    assert!(reset.final_metadata.is_empty());
    assert_eq!(reset.processing_ended, epoch_floor());
    assert_eq!(reset.fingerprint, file.fingerprint);
    assert_eq!(events.try_recv().unwrap().file_uid(), file.uid);
}

#[tokio::test]
async fn recently_finished_lists_newest_first() {
    let library = Library::new("Movies", "/media/movies");
    let harness = Harness::new([library.clone()]);
    let now = Utc::now();
    let older = harness
        .seed_with(&library, "older.mkv", |f| {
            f.status = FileStatus::Processed;
            f.processing_ended = now - Duration::hours(2);
        })
        .await;
    let newer = harness
        .seed_with(&library, "newer.mkv", |f| {
            f.status = FileStatus::ProcessingFailed;
            f.processing_ended = now - Duration::hours(1);
        })
        .await;
    harness.seed(&library, "pending.mkv", 1).await;

    let recent = harness.admin.recently_finished(10).await.unwrap();
    assert_eq!(
        recent.iter().map(|f| f.uid).collect::<Vec<_>>(),
        [newer.uid, older.uid]
    );
}

#[tokio::test]
async fn delete_removes_rows() {
    let library = Library::new("Movies", "/media/movies");
    let harness = Harness::new([library.clone()]);
    let a = harness.seed(&library, "a.mkv", 1).await;
    harness.seed(&library, "b.mkv", 1).await;
    assert_eq!(harness.admin.delete(&[a.uid]).await.unwrap(), 1);
    assert!(harness.store.get_by_uid(a.uid).await.unwrap().is_none());
    assert_eq!(harness.store.len().await, 1);
}
