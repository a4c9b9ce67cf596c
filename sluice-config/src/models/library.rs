use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sluice_model::{
    DetectionRanges, FlowId, Library, LibraryId, ProcessingOrder, ScanMode, Schedule,
};

use crate::error::ConfigError;

/// One `[[libraries]]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryDefinition {
    /// Stable id. When omitted it is derived from the name, so renaming a
    /// library without pinning its id orphans its files.
    pub id: Option<LibraryId>,
    pub name: String,
    pub path: PathBuf,
    pub enabled: bool,
    /// 672 `'0'`/`'1'` characters, one per quarter hour from Sunday 00:00.
    /// Empty means always on.
    pub schedule: String,
    /// `0` means unlimited.
    pub max_runners: u32,
    pub processing_order: ProcessingOrder,
    pub flow_id: Option<FlowId>,
    pub flow_name: Option<String>,
    pub filter: Option<String>,
    pub exclusion_filter: Option<String>,
    pub extensions: Vec<String>,
    pub folders: bool,
    pub scan_mode: ScanMode,
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
}

impl Default for LibraryDefinition {
    fn default() -> Self {
        let base = Library::new("", "");
        Self {
            id: None,
            name: String::new(),
            path: PathBuf::new(),
            enabled: base.enabled,
            schedule: String::new(),
            max_runners: base.max_runners,
            processing_order: base.processing_order,
            flow_id: None,
            flow_name: None,
            filter: None,
            exclusion_filter: None,
            extensions: Vec::new(),
            folders: base.folders,
            scan_mode: base.scan_mode,
            scan_interval_seconds: None,
            use_fingerprinting: base.use_fingerprinting,
            update_moved_files: base.update_moved_files,
            reprocess_recreated_files: base.reprocess_recreated_files,
            hold_minutes: base.hold_minutes,
            wait_time_seconds: base.wait_time_seconds,
            downloads_directory: base.downloads_directory,
            exclude_hidden: base.exclude_hidden,
            skip_file_access_tests: base.skip_file_access_tests,
            detection: base.detection,
        }
    }
}

/// Deterministic id for a library defined only by name.
pub fn derived_library_id(name: &str) -> LibraryId {
    let digest = Sha256::digest(format!("sluice-library:{}", name.trim()).as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    LibraryId::from(uuid::Builder::from_random_bytes(bytes).into_uuid())
}

impl LibraryDefinition {
    pub fn resolved_id(&self) -> LibraryId {
        self.id.unwrap_or_else(|| derived_library_id(&self.name))
    }

    /// Build the runtime [`Library`].
    pub fn to_library(&self) -> Result<Library, ConfigError> {
        let schedule = Schedule::parse(&self.schedule).map_err(|err| ConfigError::Library {
            name: self.name.clone(),
            reason: err.to_string(),
        })?;

        let mut library = Library::new(self.name.trim(), self.path.clone());
        library.id = self.resolved_id();
        library.enabled = self.enabled;
        library.schedule = schedule;
        library.max_runners = self.max_runners;
        library.processing_order = self.processing_order;
        library.flow_id = self.flow_id;
        library.flow_name = self.flow_name.clone();
        library.filter = self.filter.clone();
        library.exclusion_filter = self.exclusion_filter.clone();
        library.extensions = self.extensions.clone();
        library.folders = self.folders;
        library.scan_mode = self.scan_mode;
        library.scan_interval_seconds = self.scan_interval_seconds;
        library.use_fingerprinting = self.use_fingerprinting;
        library.update_moved_files = self.update_moved_files;
        library.reprocess_recreated_files = self.reprocess_recreated_files;
        library.hold_minutes = self.hold_minutes;
        library.wait_time_seconds = self.wait_time_seconds;
        library.downloads_directory = self.downloads_directory;
        library.exclude_hidden = self.exclude_hidden;
        library.skip_file_access_tests = self.skip_file_access_tests;
        library.detection = self.detection;

        library.validate().map_err(|err| ConfigError::Library {
            name: self.name.clone(),
            reason: err.to_string(),
        })?;
        Ok(library)
    }
}
