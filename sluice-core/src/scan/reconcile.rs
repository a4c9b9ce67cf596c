//! Pure decisions for reconciling a discovered path against stored records.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use sluice_model::{FileStatus, Library, LibraryFile};

/// Filesystem facts gathered for one discovered path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observed {
    pub is_directory: bool,
    pub size: u64,
    pub creation_time: DateTime<Utc>,
    pub last_write_time: DateTime<Utc>,
}

/// Outcome for a path that already has a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownPath {
    /// A worker holds the file. Leave the claim alone; the next pass after it
    /// ends sees the change.
    Claimed,
    /// Downloads directory re-delivered a processed file.
    Reprocess,
    /// Timestamps moved; compare a fresh fingerprint to decide.
    CheckFingerprint,
    /// Treat as new content.
    Modified,
    /// Nothing to do.
    Known,
}

/// Outcome for a path with no record.
#[derive(Debug, Clone, PartialEq)]
pub enum UnknownPath {
    New,
    /// Same content moved here from `from`; update that record in place.
    Moved { from: LibraryFile },
    /// Same content still exists at `original`.
    Duplicate { original: LibraryFile },
}

fn differs(a: DateTime<Utc>, b: DateTime<Utc>, tolerance: Duration) -> bool {
    (a - b).abs() > tolerance
}

pub fn classify_known(
    existing: &LibraryFile,
    library: &Library,
    observed: &Observed,
    tolerance: Duration,
) -> KnownPath {
    if existing.status == FileStatus::Processing {
        return KnownPath::Claimed;
    }
    if library.downloads_directory && existing.status == FileStatus::Processed {
        return KnownPath::Reprocess;
    }
    let created_moved = differs(existing.creation_time, observed.creation_time, tolerance);
    let written_moved = differs(existing.last_write_time, observed.last_write_time, tolerance);
    if library.use_fingerprinting {
        if created_moved || written_moved {
            return KnownPath::CheckFingerprint;
        }
    } else if library.reprocess_recreated_files && created_moved {
        return KnownPath::Modified;
    }
    KnownPath::Known
}

/// A fresh non-empty fingerprint that matches neither stored fingerprint
/// means the content changed.
pub fn fingerprint_changed(existing: &LibraryFile, fingerprint: &str) -> bool {
    !fingerprint.is_empty()
        && fingerprint != existing.fingerprint
        && fingerprint != existing.final_fingerprint
}

pub fn classify_unknown(
    library: &Library,
    path: &Path,
    fingerprint_match: Option<LibraryFile>,
    original_exists: bool,
) -> UnknownPath {
    let Some(original) = fingerprint_match else {
        return UnknownPath::New;
    };
    if Path::new(&original.name) == path {
        return UnknownPath::New;
    }
    if original_exists {
        UnknownPath::Duplicate { original }
    } else if library.update_moved_files {
        UnknownPath::Moved { from: original }
    } else {
        UnknownPath::New
    }
}
