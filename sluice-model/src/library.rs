use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::error::{ModelError, Result};
use crate::ids::{FlowId, LibraryId};
use crate::schedule::Schedule;

/// How a library's unprocessed files are ordered when handed to workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ProcessingOrder {
    #[default]
    AsFound,
    Random,
    SmallestFirst,
    LargestFirst,
    NewestFirst,
    OldestFirst,
    Alphabetical,
}

impl ProcessingOrder {
    pub const ALL: [ProcessingOrder; 7] = [
        ProcessingOrder::AsFound,
        ProcessingOrder::Random,
        ProcessingOrder::SmallestFirst,
        ProcessingOrder::LargestFirst,
        ProcessingOrder::NewestFirst,
        ProcessingOrder::OldestFirst,
        ProcessingOrder::Alphabetical,
    ];
}

impl fmt::Display for ProcessingOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ProcessingOrder::AsFound => "as_found",
            ProcessingOrder::Random => "random",
            ProcessingOrder::SmallestFirst => "smallest_first",
            ProcessingOrder::LargestFirst => "largest_first",
            ProcessingOrder::NewestFirst => "newest_first",
            ProcessingOrder::OldestFirst => "oldest_first",
            ProcessingOrder::Alphabetical => "alphabetical",
        };
        f.write_str(label)
    }
}

/// How new paths are discovered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ScanMode {
    /// Recursive filesystem notifications plus periodic scans.
    #[default]
    Watch,
    /// Periodic recursive walks only.
    Scan,
}

/// Comparison applied by a [`DetectionRange`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MatchRange {
    #[default]
    Any,
    GreaterThan,
    LessThan,
    Between,
    NotBetween,
}

/// A `{mode, low, high}` admission triple over one numeric file attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DetectionRange {
    pub mode: MatchRange,
    pub low: i64,
    pub high: i64,
}

impl DetectionRange {
    pub fn new(mode: MatchRange, low: i64, high: i64) -> Self {
        Self { mode, low, high }
    }

    pub fn any() -> Self {
        Self::default()
    }

    pub fn matches(&self, value: i64) -> bool {
        match self.mode {
            MatchRange::Any => true,
            MatchRange::GreaterThan => value > self.low,
            MatchRange::LessThan => value < self.low,
            MatchRange::Between => value >= self.low && value <= self.high,
            MatchRange::NotBetween => value < self.low || value > self.high,
        }
    }
}

/// The three independent detection checks a library may configure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DetectionRanges {
    /// Minutes since the file was created.
    pub created_age_minutes: DetectionRange,
    /// Minutes since the file was last written.
    pub write_age_minutes: DetectionRange,
    /// Size in bytes (total of contained files in folder mode).
    pub size_bytes: DetectionRange,
}

impl DetectionRanges {
    pub fn is_unrestricted(&self) -> bool {
        self.created_age_minutes.mode == MatchRange::Any
            && self.write_age_minutes.mode == MatchRange::Any
            && self.size_bytes.mode == MatchRange::Any
    }
}

/// A watched folder plus the policy that governs its files.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Library {
    pub id: LibraryId,
    pub name: String,
    pub enabled: bool,
    pub path: PathBuf,
    pub schedule: Schedule,
    /// In-flight cap across all nodes. `0` means unlimited.
    pub max_runners: u32,
    pub processing_order: ProcessingOrder,
    pub flow_id: Option<FlowId>,
    pub flow_name: Option<String>,
    pub filter: Option<String>,
    pub exclusion_filter: Option<String>,
    pub extensions: Vec<String>,
    /// Treat each top-level directory as one unit of work.
    pub folders: bool,
    pub scan_mode: ScanMode,
    /// Seconds between periodic full scans; `None` uses the server default.
    pub scan_interval_seconds: Option<u64>,
    pub use_fingerprinting: bool,
    pub update_moved_files: bool,
    pub reprocess_recreated_files: bool,
    pub hold_minutes: u32,
    pub wait_time_seconds: u32,
    pub downloads_directory: bool,
    pub exclude_hidden: bool,
    pub skip_file_access_tests: bool,
    pub detection: DetectionRanges,
    pub last_scanned: Option<DateTime<Utc>>,
}

impl Library {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: LibraryId::new(),
            name: name.into(),
            enabled: true,
            path: path.into(),
            schedule: Schedule::always(),
            max_runners: 0,
            processing_order: ProcessingOrder::AsFound,
            flow_id: None,
            flow_name: None,
            filter: None,
            exclusion_filter: None,
            extensions: Vec::new(),
            folders: false,
            scan_mode: ScanMode::Watch,
            scan_interval_seconds: None,
            use_fingerprinting: true,
            update_moved_files: true,
            reprocess_recreated_files: false,
            hold_minutes: 0,
            wait_time_seconds: 0,
            downloads_directory: false,
            exclude_hidden: true,
            skip_file_access_tests: false,
            detection: DetectionRanges::default(),
            last_scanned: None,
        }
    }

    pub fn has_runner_cap(&self) -> bool {
        self.max_runners > 0
    }

    /// Relative path of `path` inside this library, falling back to the full
    /// path when it lives elsewhere.
    pub fn relative_path(&self, path: &std::path::Path) -> String {
        path.strip_prefix(&self.path)
            .unwrap_or(path)
            .to_string_lossy()
            .trim_start_matches(['/', '\\'])
            .to_string()
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ModelError::InvalidValue(format!(
                "library {} has an empty name",
                self.id
            )));
        }
        if self.path.as_os_str().is_empty() {
            return Err(ModelError::InvalidValue(format!(
                "library `{}` has an empty path",
                self.name
            )));
        }
        for range in [
            self.detection.created_age_minutes,
            self.detection.write_age_minutes,
            self.detection.size_bytes,
        ] {
            if matches!(range.mode, MatchRange::Between | MatchRange::NotBetween)
                && range.low > range.high
            {
                return Err(ModelError::InvalidValue(format!(
                    "library `{}` has a detection range with low {} above high {}",
                    self.name, range.low, range.high
                )));
            }
        }
        Ok(())
    }
}
