//! Administrative operations over stored files.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sluice_model::time::epoch_floor;
use sluice_model::{FileStatus, FileUid, FileView, LibraryFile, NodeId};
use tracing::info;

use crate::database::filter::{FileOrdering, FilePredicate, FileQuery, SortField, SortTerm};
use crate::database::ports::FileStore;
use crate::eligibility::{EligibilityEngine, EligibilityRequest};
use crate::error::Result;
use crate::events::{FileEvent, FileEventPublisher};
use crate::runners::LiveRunnerRegistry;

/// Count of files in one view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewCount {
    pub view: FileView,
    pub count: u64,
}

/// Counts for every stored status plus the derived views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub generated_at: DateTime<Utc>,
    pub views: Vec<ViewCount>,
}

impl StatusSummary {
    pub fn count(&self, view: FileView) -> u64 {
        self.views
            .iter()
            .find(|entry| entry.view == view)
            .map_or(0, |entry| entry.count)
    }
}

pub struct FileAdmin {
    store: Arc<dyn FileStore>,
    eligibility: Arc<EligibilityEngine>,
    registry: Arc<LiveRunnerRegistry>,
    events: Arc<dyn FileEventPublisher>,
}

impl fmt::Debug for FileAdmin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileAdmin")
            .field("eligibility", &self.eligibility)
            .finish()
    }
}

impl FileAdmin {
    pub fn new(
        store: Arc<dyn FileStore>,
        eligibility: Arc<EligibilityEngine>,
        registry: Arc<LiveRunnerRegistry>,
        events: Arc<dyn FileEventPublisher>,
    ) -> Self {
        Self {
            store,
            eligibility,
            registry,
            events,
        }
    }

    /// Apply `edit` to each existing file and write it back. Missing uids are
    /// skipped. Returns the updated records.
    async fn edit_each(
        &self,
        uids: &[FileUid],
        mut edit: impl FnMut(usize, &mut LibraryFile),
    ) -> Result<Vec<LibraryFile>> {
        let mut updated = Vec::with_capacity(uids.len());
        for (index, uid) in uids.iter().enumerate() {
            let Some(mut file) = self.store.get_by_uid(*uid).await? else {
                continue;
            };
            edit(index, &mut file);
            file.date_modified = Utc::now();
            self.store.update_one(&file).await?;
            updated.push(file);
        }
        Ok(updated)
    }

    /// Reset files to `Unprocessed`, optionally pinning them to one node.
    pub async fn reprocess(
        &self,
        uids: &[FileUid],
        pin_to: Option<NodeId>,
    ) -> Result<Vec<LibraryFile>> {
        let files = self
            .edit_each(uids, |_, file| {
                file.reset_for_reprocess();
                file.process_on_node = pin_to;
            })
            .await?;
        for file in &files {
            self.registry.release(file.uid);
            self.events.publish(FileEvent::FileAdded {
                library_id: file.library_id,
                file: Box::new(file.clone()),
            });
        }
        info!(count = files.len(), pinned = pin_to.is_some(), "files queued for reprocessing");
        Ok(files)
    }

    pub async fn set_force_processing(
        &self,
        uids: &[FileUid],
        force: bool,
    ) -> Result<Vec<LibraryFile>> {
        self.edit_each(uids, |_, file| file.flags.force_processing = force)
            .await
    }

    /// Give the files manual order `1..=n` in request order.
    pub async fn move_to_top(&self, uids: &[FileUid]) -> Result<Vec<LibraryFile>> {
        self.edit_each(uids, |index, file| {
            file.order = i32::try_from(index + 1).unwrap_or(i32::MAX);
        })
        .await
    }

    pub async fn unhold(&self, uids: &[FileUid]) -> Result<Vec<LibraryFile>> {
        self.edit_each(uids, |_, file| file.hold_until = epoch_floor())
            .await
    }

    pub async fn delete(&self, uids: &[FileUid]) -> Result<u64> {
        for uid in uids {
            self.registry.release(*uid);
        }
        let removed = self.store.delete_by_uids(uids).await?;
        info!(removed, "files deleted");
        Ok(removed)
    }

    pub async fn summary(&self, now: DateTime<Utc>) -> Result<StatusSummary> {
        let mut views: Vec<FileView> =
            FileStatus::ALL.into_iter().map(FileView::Stored).collect();
        views.extend([FileView::Disabled, FileView::OutOfSchedule, FileView::OnHold]);

        let mut counts = Vec::with_capacity(views.len());
        for view in views {
            counts.push(ViewCount {
                view,
                count: self.eligibility.count(view, now).await?,
            });
        }
        Ok(StatusSummary {
            generated_at: now,
            views: counts,
        })
    }

    /// Paged listing of one view in its natural order.
    pub async fn list(
        &self,
        request: &EligibilityRequest,
        now: DateTime<Utc>,
    ) -> Result<Vec<LibraryFile>> {
        self.eligibility.try_candidates(request, now).await
    }

    /// The next `limit` files a worker would receive.
    pub async fn upcoming(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<LibraryFile>> {
        self.eligibility
            .try_candidates(&EligibilityRequest::default().take(limit), now)
            .await
    }

    /// The last `limit` files that finished processing, newest first.
    pub async fn recently_finished(&self, limit: usize) -> Result<Vec<LibraryFile>> {
        let query = FileQuery::new(
            FilePredicate::StatusIs(FileStatus::Processed)
                .or(FilePredicate::StatusIs(FileStatus::ProcessingFailed)),
        )
        .ordered(FileOrdering::by(SortTerm::desc(SortField::ProcessingEnded)))
        .page(0, Some(limit));
        self.store.query(&query).await
    }
}
