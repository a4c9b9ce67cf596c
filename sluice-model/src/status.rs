use std::fmt;

use crate::error::{ModelError, Result};

/// Persisted lifecycle state of a library file.
///
/// The numeric codes are the storage representation and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FileStatus {
    Unprocessed,
    Processed,
    Processing,
    ProcessingFailed,
    Duplicate,
    MappingIssue,
}

impl FileStatus {
    pub const ALL: [FileStatus; 6] = [
        FileStatus::Unprocessed,
        FileStatus::Processing,
        FileStatus::Processed,
        FileStatus::ProcessingFailed,
        FileStatus::Duplicate,
        FileStatus::MappingIssue,
    ];

    pub fn code(self) -> i32 {
        match self {
            FileStatus::Unprocessed => 0,
            FileStatus::Processed => 1,
            FileStatus::Processing => 2,
            FileStatus::ProcessingFailed => 4,
            FileStatus::Duplicate => 5,
            FileStatus::MappingIssue => 6,
        }
    }

    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(FileStatus::Unprocessed),
            1 => Ok(FileStatus::Processed),
            2 => Ok(FileStatus::Processing),
            4 => Ok(FileStatus::ProcessingFailed),
            5 => Ok(FileStatus::Duplicate),
            6 => Ok(FileStatus::MappingIssue),
            other => Err(ModelError::InvalidStatus(other)),
        }
    }

    /// Whether a worker-driven transition from `self` to `next` is legal.
    ///
    /// Administrative resets go through
    /// [`LibraryFile::reset_for_reprocess`](crate::file::LibraryFile::reset_for_reprocess)
    /// and are not modelled here.
    pub fn can_transition_to(self, next: FileStatus) -> bool {
        matches!(
            (self, next),
            (FileStatus::Unprocessed, FileStatus::Processing)
                | (FileStatus::Processing, FileStatus::Processed)
                | (FileStatus::Processing, FileStatus::ProcessingFailed)
                | (FileStatus::Processing, FileStatus::Unprocessed)
        )
    }

    /// Terminal states carry a processing result.
    pub fn is_finished(self) -> bool {
        matches!(self, FileStatus::Processed | FileStatus::ProcessingFailed)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FileStatus::Unprocessed => "unprocessed",
            FileStatus::Processed => "processed",
            FileStatus::Processing => "processing",
            FileStatus::ProcessingFailed => "processing_failed",
            FileStatus::Duplicate => "duplicate",
            FileStatus::MappingIssue => "mapping_issue",
        };
        f.write_str(label)
    }
}

/// A listing view over the file table.
///
/// `Disabled`, `OutOfSchedule` and `OnHold` are computed from library state
/// and the current time; they never appear in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FileView {
    Stored(FileStatus),
    Disabled,
    OutOfSchedule,
    OnHold,
}

impl Default for FileView {
    fn default() -> Self {
        FileView::Stored(FileStatus::Unprocessed)
    }
}

impl FileView {
    pub fn parse(raw: &str) -> Result<Self> {
        let view = match raw.trim().to_ascii_lowercase().as_str() {
            "" | "unprocessed" => FileView::Stored(FileStatus::Unprocessed),
            "processing" => FileView::Stored(FileStatus::Processing),
            "processed" => FileView::Stored(FileStatus::Processed),
            "processing_failed" | "failed" => {
                FileView::Stored(FileStatus::ProcessingFailed)
            }
            "duplicate" => FileView::Stored(FileStatus::Duplicate),
            "mapping_issue" => FileView::Stored(FileStatus::MappingIssue),
            "disabled" => FileView::Disabled,
            "out_of_schedule" => FileView::OutOfSchedule,
            "on_hold" => FileView::OnHold,
            other => {
                return Err(ModelError::InvalidValue(format!(
                    "unknown file view `{other}`"
                )));
            }
        };
        Ok(view)
    }
}

impl fmt::Display for FileView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileView::Stored(status) => status.fmt(f),
            FileView::Disabled => f.write_str("disabled"),
            FileView::OutOfSchedule => f.write_str("out_of_schedule"),
            FileView::OnHold => f.write_str("on_hold"),
        }
    }
}

/// Named per-file flags. Bit values are only meaningful at the storage boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FileFlags {
    pub force_processing: bool,
}

impl FileFlags {
    const FORCE_PROCESSING_BIT: i32 = 1;

    pub fn forced() -> Self {
        Self {
            force_processing: true,
        }
    }

    pub fn bits(self) -> i32 {
        let mut bits = 0;
        if self.force_processing {
            bits |= Self::FORCE_PROCESSING_BIT;
        }
        bits
    }

    /// Unknown bits are ignored so older rows written by newer servers still load.
    pub fn from_bits(bits: i32) -> Self {
        Self {
            force_processing: bits & Self::FORCE_PROCESSING_BIT != 0,
        }
    }

    pub fn is_empty(self) -> bool {
        self.bits() == 0
    }
}
