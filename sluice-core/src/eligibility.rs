//! Eligibility and ordering of stored files across libraries.
//!
//! Every request takes a fresh snapshot of library state (enabled, schedule,
//! live runner counts) and turns it into one [`FileQuery`] that the store
//! evaluates. Library gating applies only to the `Unprocessed` view; the
//! derived views each apply just their own predicate.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sluice_model::{
    FileStatus, FileUid, FileView, Library, LibraryFile, LibraryId, NodeId,
    ProcessingOrder,
};
use tracing::{debug, warn};

use crate::catalog::LibraryCatalog;
use crate::database::filter::{
    FileOrdering, FilePredicate, FileQuery, SortField, SortTerm,
};
use crate::database::ports::FileStore;
use crate::error::Result;
use crate::runners::RunnerCounts;
use crate::status::LibraryGate;

/// Caller-side narrowing applied on top of the view's own predicate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EligibilityRequest {
    pub view: FileView,
    /// Restrict to these uids when set.
    pub allow: Option<Vec<FileUid>>,
    pub deny: Vec<FileUid>,
    pub max_size: Option<u64>,
    /// Requesting node; files pinned to another node are excluded.
    pub node: Option<NodeId>,
    pub skip: usize,
    pub take: Option<usize>,
}

impl EligibilityRequest {
    pub fn for_view(view: FileView) -> Self {
        Self {
            view,
            ..Self::default()
        }
    }

    pub fn for_node(node: NodeId) -> Self {
        Self {
            node: Some(node),
            ..Self::default()
        }
    }

    pub fn take(mut self, take: usize) -> Self {
        self.take = Some(take);
        self
    }
}

/// Library state captured once per request.
#[derive(Debug, Clone)]
pub struct LibrarySnapshot {
    pub libraries: Vec<(Library, LibraryGate)>,
}

impl LibrarySnapshot {
    pub fn gate(&self, id: LibraryId) -> Option<&LibraryGate> {
        self.libraries
            .iter()
            .find(|(library, _)| library.id == id)
            .map(|(_, gate)| gate)
    }

    fn ids_where(&self, pred: impl Fn(&LibraryGate) -> bool) -> Vec<LibraryId> {
        self.libraries
            .iter()
            .filter(|(_, gate)| pred(gate))
            .map(|(library, _)| library.id)
            .collect()
    }

    fn known_ids(&self) -> Vec<LibraryId> {
        self.ids_where(|_| true)
    }

    fn strategies(&self) -> Vec<(LibraryId, ProcessingOrder)> {
        self.libraries
            .iter()
            .filter(|(library, _)| library.processing_order != ProcessingOrder::AsFound)
            .map(|(library, _)| (library.id, library.processing_order))
            .collect()
    }
}

pub struct EligibilityEngine {
    store: Arc<dyn FileStore>,
    catalog: Arc<dyn LibraryCatalog>,
    runners: Arc<dyn RunnerCounts>,
}

impl fmt::Debug for EligibilityEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EligibilityEngine")
            .field(
                "store_type",
                &std::any::type_name_of_val(self.store.as_ref()),
            )
            .field(
                "catalog_type",
                &std::any::type_name_of_val(self.catalog.as_ref()),
            )
            .finish()
    }
}

impl EligibilityEngine {
    pub fn new(
        store: Arc<dyn FileStore>,
        catalog: Arc<dyn LibraryCatalog>,
        runners: Arc<dyn RunnerCounts>,
    ) -> Self {
        Self {
            store,
            catalog,
            runners,
        }
    }

    pub async fn snapshot(&self, now: DateTime<Utc>) -> Result<LibrarySnapshot> {
        let libraries = self.catalog.list().await?;
        Ok(LibrarySnapshot {
            libraries: libraries
                .into_iter()
                .map(|library| {
                    let gate = LibraryGate::evaluate(
                        &library,
                        self.runners.running(library.id),
                        now,
                    );
                    (library, gate)
                })
                .collect(),
        })
    }

    /// Ordered candidates for `request`. Fails closed: any error is logged
    /// and yields no candidates.
    pub async fn candidates(
        &self,
        request: &EligibilityRequest,
        now: DateTime<Utc>,
    ) -> Vec<LibraryFile> {
        match self.try_candidates(request, now).await {
            Ok(files) => files,
            Err(err) => {
                warn!(
                    target: "eligibility",
                    view = %request.view,
                    error = %err,
                    "eligibility query failed; returning no candidates"
                );
                Vec::new()
            }
        }
    }

    pub async fn try_candidates(
        &self,
        request: &EligibilityRequest,
        now: DateTime<Utc>,
    ) -> Result<Vec<LibraryFile>> {
        let snapshot = self.snapshot(now).await?;
        let use_strategies = request.view == FileView::Stored(FileStatus::Unprocessed)
            && self.strategies_in_play(&snapshot).await?;
        let query = build_query(request, &snapshot, now, use_strategies);
        let files = self.store.query(&query).await?;
        debug!(
            target: "eligibility",
            view = %request.view,
            strategies = use_strategies,
            count = files.len(),
            "candidates selected"
        );
        Ok(files)
    }

    /// Number of files in `view` right now.
    pub async fn count(&self, view: FileView, now: DateTime<Utc>) -> Result<u64> {
        let snapshot = self.snapshot(now).await?;
        let request = EligibilityRequest::for_view(view);
        let predicate = view_predicate(&request, &snapshot, now);
        self.store.count(&predicate).await
    }

    /// Per-library strategies are only worth sorting by when at least one
    /// such library has something unprocessed.
    async fn strategies_in_play(&self, snapshot: &LibrarySnapshot) -> Result<bool> {
        let ids: Vec<LibraryId> =
            snapshot.strategies().into_iter().map(|(id, _)| id).collect();
        if ids.is_empty() {
            return Ok(false);
        }
        let pending = self
            .store
            .count(
                &FilePredicate::StatusIs(FileStatus::Unprocessed)
                    .and(FilePredicate::LibraryIn(ids)),
            )
            .await?;
        Ok(pending > 0)
    }
}

/// Translate a request plus library snapshot into a store query.
pub fn build_query(
    request: &EligibilityRequest,
    snapshot: &LibrarySnapshot,
    now: DateTime<Utc>,
    use_strategies: bool,
) -> FileQuery {
    let ordering = match request.view {
        FileView::Stored(FileStatus::Unprocessed) if use_strategies => {
            FileOrdering::with_strategies(&snapshot.strategies())
        }
        FileView::Stored(FileStatus::Processing) => {
            FileOrdering::by(SortTerm::asc(SortField::ProcessingStarted))
        }
        FileView::Stored(FileStatus::Processed | FileStatus::ProcessingFailed) => {
            FileOrdering::by(SortTerm::desc(SortField::ProcessingEnded))
        }
        FileView::Stored(FileStatus::Duplicate | FileStatus::MappingIssue) => {
            FileOrdering::by(SortTerm::asc(SortField::DateCreated))
        }
        _ => FileOrdering::default_unprocessed(),
    };
    FileQuery::new(view_predicate(request, snapshot, now))
        .ordered(ordering)
        .page(request.skip, request.take)
}

fn view_predicate(
    request: &EligibilityRequest,
    snapshot: &LibrarySnapshot,
    now: DateTime<Utc>,
) -> FilePredicate {
    let unprocessed = FilePredicate::StatusIs(FileStatus::Unprocessed);
    let not_forced = FilePredicate::Forced.not();

    let base = match request.view {
        FileView::Stored(FileStatus::Unprocessed) => {
            let admitted = snapshot.ids_where(LibraryGate::admits);
            unprocessed
                .and(FilePredicate::LibraryIn(snapshot.known_ids()))
                .and(FilePredicate::LibraryIn(admitted).or(FilePredicate::Forced))
                .and(FilePredicate::HoldAtOrBefore(now))
        }
        FileView::Stored(status) => FilePredicate::StatusIs(status),
        FileView::Disabled => unprocessed.and(not_forced).and(
            FilePredicate::LibraryIn(snapshot.ids_where(|g| !g.enabled))
                .or(FilePredicate::LibraryIn(snapshot.known_ids()).not()),
        ),
        FileView::OutOfSchedule => unprocessed.and(not_forced).and(
            FilePredicate::LibraryIn(
                snapshot.ids_where(|g| g.enabled && !g.in_schedule),
            ),
        ),
        FileView::OnHold => unprocessed.and(FilePredicate::HoldAfter(now)),
    };

    let mut predicate = base;
    if let Some(allow) = &request.allow {
        predicate = predicate.and(FilePredicate::UidIn(allow.clone()));
    }
    if !request.deny.is_empty() {
        predicate = predicate.and(FilePredicate::UidNotIn(request.deny.clone()));
    }
    if let Some(max) = request.max_size {
        predicate = predicate.and(FilePredicate::MaxSize(max));
    }
    if let Some(node) = request.node {
        predicate = predicate.and(FilePredicate::AvailableToNode(node));
    }
    predicate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::in_view;
    use sluice_model::{FileFlags, Schedule};

    fn snapshot(libraries: Vec<Library>) -> LibrarySnapshot {
        let now = Utc::now();
        LibrarySnapshot {
            libraries: libraries
                .into_iter()
                .map(|l| {
                    let gate = LibraryGate::evaluate(&l, 0, now);
                    (l, gate)
                })
                .collect(),
        }
    }

    #[test]
    fn unprocessed_predicate_agrees_with_view_classification() {
        let now = Utc::now();
        let open = Library::new("open", "/open");
        let mut closed = Library::new("closed", "/closed");
        closed.schedule = Schedule::never();
        let mut off = Library::new("off", "/off");
        off.enabled = false;
        let snap = snapshot(vec![open.clone(), closed.clone(), off.clone()]);

        let request = EligibilityRequest::default();
        let predicate = view_predicate(&request, &snap, now);

        for library in [&open, &closed, &off] {
            for forced in [false, true] {
                let mut file = LibraryFile::discovered(library, "/x/a");
                if forced {
                    file.flags = FileFlags::forced();
                }
                let gate = snap.gate(library.id);
                let blocked = in_view(&file, FileView::Disabled, gate, now)
                    || in_view(&file, FileView::OutOfSchedule, gate, now);
                assert_eq!(predicate.matches(&file), !blocked, "{} forced={forced}", library.name);
            }
        }
    }

    #[test]
    fn unknown_libraries_are_never_eligible() {
        let now = Utc::now();
        let known = Library::new("known", "/k");
        let stranger = Library::new("stranger", "/s");
        let snap = snapshot(vec![known]);
        let mut file = LibraryFile::discovered(&stranger, "/s/a");
        file.flags = FileFlags::forced();
        let predicate = view_predicate(&EligibilityRequest::default(), &snap, now);
        assert!(!predicate.matches(&file));
        let disabled = view_predicate(
            &EligibilityRequest::for_view(FileView::Disabled),
            &snap,
            now,
        );
        file.flags = FileFlags::default();
        assert!(disabled.matches(&file));
    }

    #[test]
    fn caller_filters_narrow_the_view() {
        let now = Utc::now();
        let library = Library::new("L", "/l");
        let snap = snapshot(vec![library.clone()]);
        let mut small = LibraryFile::discovered(&library, "/l/small");
        small.original_size = 10;
        let mut big = LibraryFile::discovered(&library, "/l/big");
        big.original_size = 1000;

        let request = EligibilityRequest {
            max_size: Some(100),
            deny: vec![small.uid],
            ..EligibilityRequest::default()
        };
        let predicate = view_predicate(&request, &snap, now);
        assert!(!predicate.matches(&small));
        assert!(!predicate.matches(&big));

        let request = EligibilityRequest {
            allow: Some(vec![big.uid]),
            ..EligibilityRequest::default()
        };
        let predicate = view_predicate(&request, &snap, now);
        assert!(predicate.matches(&big));
        assert!(!predicate.matches(&small));
    }

    #[test]
    fn finished_views_sort_newest_first() {
        let snap = snapshot(vec![]);
        let query = build_query(
            &EligibilityRequest::for_view(FileView::Stored(FileStatus::Processed)),
            &snap,
            Utc::now(),
            false,
        );
        assert_eq!(
            query.ordering,
            FileOrdering::by(SortTerm::desc(SortField::ProcessingEnded))
        );
    }
}
