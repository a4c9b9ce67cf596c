//! Derived views over stored file status.
//!
//! `Disabled`, `OutOfSchedule` and `OnHold` are never stored; they are pure
//! predicates over `Unprocessed` rows, the owning library's live state and
//! the current time.

use chrono::{DateTime, Local, Utc};
use sluice_model::{FileStatus, FileView, Library, LibraryFile};

/// Live admission state of one library at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryGate {
    pub enabled: bool,
    pub in_schedule: bool,
    pub at_capacity: bool,
}

impl LibraryGate {
    /// Evaluate `library` with `running` in-flight runners. The schedule is
    /// read in server local time.
    pub fn evaluate(library: &Library, running: usize, now: DateTime<Utc>) -> Self {
        Self {
            enabled: library.enabled,
            in_schedule: library.schedule.is_active_at(&now.with_timezone(&Local)),
            at_capacity: library.has_runner_cap()
                && running >= library.max_runners as usize,
        }
    }

    /// Whether unforced files of this library may be handed out right now.
    pub fn admits(&self) -> bool {
        self.enabled && self.in_schedule && !self.at_capacity
    }
}

/// Whether `file` belongs to `view`. Each derived view checks only its own
/// defining predicate, so a file may be in several derived views at once.
/// A `None` gate means the library is unknown and is treated as disabled.
pub fn in_view(
    file: &LibraryFile,
    view: FileView,
    gate: Option<&LibraryGate>,
    now: DateTime<Utc>,
) -> bool {
    match view {
        FileView::Stored(status) => file.status == status,
        FileView::Disabled => {
            file.status == FileStatus::Unprocessed
                && !file.is_forced()
                && gate.is_none_or(|g| !g.enabled)
        }
        FileView::OutOfSchedule => {
            file.status == FileStatus::Unprocessed
                && !file.is_forced()
                && gate.is_some_and(|g| g.enabled && !g.in_schedule)
        }
        FileView::OnHold => {
            file.status == FileStatus::Unprocessed && file.is_on_hold(now)
        }
    }
}

/// Primary view a file is listed under.
pub fn classify(
    file: &LibraryFile,
    gate: Option<&LibraryGate>,
    now: DateTime<Utc>,
) -> FileView {
    if file.status != FileStatus::Unprocessed {
        return FileView::Stored(file.status);
    }
    for view in [FileView::Disabled, FileView::OutOfSchedule, FileView::OnHold] {
        if in_view(file, view, gate, now) {
            return view;
        }
    }
    FileView::Stored(FileStatus::Unprocessed)
}
