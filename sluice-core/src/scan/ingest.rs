//! Turns one discovered path into at most one store write.

use std::fmt;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sluice_model::time::{epoch_floor, normalize};
use sluice_model::{FileStatus, FileUid, Library, LibraryFile};
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::IngestConfig;
use crate::database::ports::FileStore;
use crate::error::{Result, SluiceError};
use crate::events::{FileEvent, FileEventPublisher};
use crate::fingerprint::{Fingerprinter, fingerprint_or_empty};
use crate::scan::filters::PathFilter;
use crate::scan::reconcile::{
    KnownPath, Observed, UnknownPath, classify_known, classify_unknown,
    fingerprint_changed,
};

/// Why a path was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Missing,
    Filtered,
    WrongKind,
    Detection,
    Inaccessible,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Skipped(SkipReason),
    Added(FileUid),
    Requeued(FileUid),
    Moved(FileUid),
    Duplicate { uid: FileUid, original: FileUid },
    Known(FileUid),
    /// A worker holds the record; the change is picked up after the claim ends.
    Claimed(FileUid),
    /// Folder still being written; nothing below it has been quiet for the
    /// library's wait window yet. `after` is what remains of that window.
    RetryLater { after: std::time::Duration },
}

/// A library plus its compiled filter.
#[derive(Debug, Clone)]
pub struct IngestContext {
    pub library: Library,
    pub filter: PathFilter,
}

impl IngestContext {
    pub fn new(library: Library) -> Result<Self> {
        let filter = PathFilter::new(&library)?;
        Ok(Self { library, filter })
    }
}

pub struct LibraryIngestor {
    store: Arc<dyn FileStore>,
    fingerprinter: Arc<dyn Fingerprinter>,
    events: Arc<dyn FileEventPublisher>,
    config: IngestConfig,
}

impl fmt::Debug for LibraryIngestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryIngestor")
            .field("config", &self.config)
            .finish()
    }
}

fn to_utc(time: std::io::Result<std::time::SystemTime>) -> Option<DateTime<Utc>> {
    time.ok().map(|t| normalize(DateTime::<Utc>::from(t)))
}

/// Size and newest write time of every file below `dir`. Symlinks are not
/// followed.
fn folder_totals(dir: &Path) -> std::io::Result<(u64, Option<DateTime<Utc>>)> {
    let mut size = 0u64;
    let mut newest: Option<DateTime<Utc>> = None;
    for entry in WalkDir::new(dir).min_depth(1).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = entry.metadata()?;
        size = size.saturating_add(meta.len());
        if let Some(written) = to_utc(meta.modified()) {
            newest = Some(newest.map_or(written, |n| n.max(written)));
        }
    }
    Ok((size, newest))
}

impl LibraryIngestor {
    pub fn new(
        store: Arc<dyn FileStore>,
        fingerprinter: Arc<dyn Fingerprinter>,
        events: Arc<dyn FileEventPublisher>,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            fingerprinter,
            events,
            config,
        }
    }

    /// Filter, inspect and reconcile `path`. Filesystem errors drop the path
    /// for this pass; store errors propagate.
    pub async fn ingest(
        &self,
        ctx: &IngestContext,
        path: &Path,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        let library = &ctx.library;
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(_) => return Ok(IngestOutcome::Skipped(SkipReason::Missing)),
        };
        if library.folders != meta.is_dir() {
            return Ok(IngestOutcome::Skipped(SkipReason::WrongKind));
        }
        if !ctx.filter.admits_path(path, meta.is_dir()) {
            return Ok(IngestOutcome::Skipped(SkipReason::Filtered));
        }

        let observed = match self.observe(path, &meta).await {
            Ok(observed) => observed,
            Err(err) => {
                warn!(
                    target: "ingest::scan",
                    library = %library.name,
                    path = %path.display(),
                    error = %err,
                    "failed to inspect path"
                );
                return Ok(IngestOutcome::Skipped(SkipReason::Missing));
            }
        };

        if !ctx.filter.admits_detection(
            observed.creation_time,
            observed.last_write_time,
            observed.size,
            now,
        ) {
            return Ok(IngestOutcome::Skipped(SkipReason::Detection));
        }

        if library.folders && library.wait_time_seconds > 0 {
            let window = Duration::seconds(i64::from(library.wait_time_seconds));
            let quiet = now - observed.last_write_time;
            if quiet < window {
                let after = (window - quiet).to_std().unwrap_or_default();
                debug!(
                    target: "ingest::scan",
                    path = %path.display(),
                    remaining_ms = after.as_millis() as u64,
                    "folder still settling"
                );
                return Ok(IngestOutcome::RetryLater { after });
            }
        }

        if !library.skip_file_access_tests
            && !observed.is_directory
            && let Err(err) = tokio::fs::File::open(path).await
        {
            debug!(
                target: "ingest::scan",
                path = %path.display(),
                error = %err,
                "file not readable yet; dropping"
            );
            return Ok(IngestOutcome::Skipped(SkipReason::Inaccessible));
        }

        let name = path.to_string_lossy().to_string();
        match self.store.get_by_path(&name).await? {
            Some(existing) => self.reconcile_known(ctx, path, existing, observed, now).await,
            None => self.reconcile_unknown(ctx, path, observed, now).await,
        }
    }

    async fn observe(&self, path: &Path, meta: &Metadata) -> Result<Observed> {
        let written = to_utc(meta.modified()).unwrap_or_else(epoch_floor);
        let created = to_utc(meta.created()).unwrap_or(written);
        if !meta.is_dir() {
            return Ok(Observed {
                is_directory: false,
                size: meta.len(),
                creation_time: created,
                last_write_time: written,
            });
        }
        let dir: PathBuf = path.to_path_buf();
        let (size, newest) = spawn_blocking(move || folder_totals(&dir))
            .await
            .map_err(|e| SluiceError::Internal(format!("folder walk panicked: {e}")))??;
        Ok(Observed {
            is_directory: true,
            size,
            creation_time: created,
            last_write_time: newest.map_or(written, |n| n.max(written)),
        })
    }

    fn hold_until(&self, library: &Library, now: DateTime<Utc>) -> DateTime<Utc> {
        if library.hold_minutes == 0 {
            epoch_floor()
        } else {
            now + Duration::minutes(i64::from(library.hold_minutes))
        }
    }

    fn apply_observed(file: &mut LibraryFile, observed: &Observed) {
        file.is_directory = observed.is_directory;
        file.original_size = observed.size;
        file.creation_time = observed.creation_time;
        file.last_write_time = observed.last_write_time;
    }

    async fn requeue(
        &self,
        ctx: &IngestContext,
        mut file: LibraryFile,
        observed: &Observed,
        fingerprint: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        file.reset_for_reprocess();
        Self::apply_observed(&mut file, observed);
        if let Some(fp) = fingerprint {
            file.fingerprint = fp;
            file.final_fingerprint.clear();
        }
        file.hold_until = self.hold_until(&ctx.library, now);
        file.flow_id = ctx.library.flow_id;
        file.flow_name = ctx.library.flow_name.clone();
        self.store.update_one(&file).await?;
        info!(
            target: "ingest::scan",
            library = %ctx.library.name,
            path = %file.name,
            "file re-queued"
        );
        let uid = file.uid;
        self.events.publish(FileEvent::FileAdded {
            library_id: ctx.library.id,
            file: Box::new(file),
        });
        Ok(IngestOutcome::Requeued(uid))
    }

    async fn reconcile_known(
        &self,
        ctx: &IngestContext,
        path: &Path,
        existing: LibraryFile,
        observed: Observed,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        let tolerance = self.config.timestamp_tolerance();
        match classify_known(&existing, &ctx.library, &observed, tolerance) {
            KnownPath::Known => Ok(IngestOutcome::Known(existing.uid)),
            KnownPath::Claimed => {
                debug!(
                    target: "ingest::scan",
                    path = %existing.name,
                    worker = ?existing.worker_id,
                    "file is being processed; leaving claim in place"
                );
                Ok(IngestOutcome::Claimed(existing.uid))
            }
            KnownPath::Reprocess | KnownPath::Modified => {
                self.requeue(ctx, existing, &observed, None, now).await
            }
            KnownPath::CheckFingerprint => {
                let fp = fingerprint_or_empty(self.fingerprinter.as_ref(), path).await;
                if fingerprint_changed(&existing, &fp) {
                    return self.requeue(ctx, existing, &observed, Some(fp), now).await;
                }
                // Same content: remember the new timestamps so the next pass
                // doesn't hash again.
                let uid = existing.uid;
                let mut refreshed = existing;
                refreshed.creation_time = observed.creation_time;
                refreshed.last_write_time = observed.last_write_time;
                self.store.update_one(&refreshed).await?;
                Ok(IngestOutcome::Known(uid))
            }
        }
    }

    async fn reconcile_unknown(
        &self,
        ctx: &IngestContext,
        path: &Path,
        observed: Observed,
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome> {
        let library = &ctx.library;
        let fingerprint = if library.use_fingerprinting {
            fingerprint_or_empty(self.fingerprinter.as_ref(), path).await
        } else {
            String::new()
        };

        let matched = if fingerprint.is_empty() {
            None
        } else {
            self.store.get_by_fingerprint(&fingerprint).await?
        };
        let original_exists = match &matched {
            Some(original) => tokio::fs::try_exists(&original.name).await.unwrap_or(false),
            None => false,
        };

        let name = path.to_string_lossy().to_string();
        match classify_unknown(library, path, matched, original_exists) {
            UnknownPath::Moved { from } => {
                let uid = from.uid;
                let previous = from.name.clone();
                let mut moved = from;
                moved.name = name;
                moved.relative_path = library.relative_path(path);
                moved.library_id = library.id;
                moved.library_name = library.name.clone();
                moved.date_modified = now;
                self.store.update_one(&moved).await?;
                info!(
                    target: "ingest::scan",
                    library = %library.name,
                    from = %previous,
                    to = %moved.name,
                    "file moved"
                );
                Ok(IngestOutcome::Moved(uid))
            }
            UnknownPath::Duplicate { original } => {
                let mut duplicate = LibraryFile::discovered(library, name);
                Self::apply_observed(&mut duplicate, &observed);
                duplicate.status = FileStatus::Duplicate;
                duplicate.fingerprint = fingerprint;
                duplicate.duplicate_uid = Some(original.uid);
                duplicate.duplicate_name = Some(original.name.clone());
                self.store.insert_one(&duplicate).await?;
                info!(
                    target: "ingest::scan",
                    library = %library.name,
                    path = %duplicate.name,
                    original = %original.name,
                    "duplicate detected"
                );
                Ok(IngestOutcome::Duplicate {
                    uid: duplicate.uid,
                    original: original.uid,
                })
            }
            UnknownPath::New => {
                let mut file = LibraryFile::discovered(library, name);
                Self::apply_observed(&mut file, &observed);
                file.fingerprint = fingerprint;
                file.hold_until = self.hold_until(library, now);
                file.date_created = now;
                file.date_modified = now;
                self.store.insert_one(&file).await?;
                info!(
                    target: "ingest::scan",
                    library = %library.name,
                    path = %file.name,
                    size = file.original_size,
                    "file added"
                );
                let uid = file.uid;
                self.events.publish(FileEvent::FileAdded {
                    library_id: library.id,
                    file: Box::new(file),
                });
                Ok(IngestOutcome::Added(uid))
            }
        }
    }
}
