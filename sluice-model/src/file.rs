use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::ids::{FileUid, FlowId, LibraryId, NodeId, WorkerId};
use crate::library::Library;
use crate::status::{FileFlags, FileStatus};
use crate::time::{epoch_floor, normalize};

/// One step a flow executed while processing a file.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExecutedNode {
    pub node_name: String,
    pub node_uid: Option<String>,
    /// Output connection the step left through (0 = failure).
    pub output: i32,
    pub processing_time_ms: u64,
}

pub type Metadata = BTreeMap<String, String>;

/// The unit of work: one file (or folder) known to a library.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LibraryFile {
    pub uid: FileUid,
    /// Absolute path.
    pub name: String,
    pub relative_path: String,
    pub status: FileStatus,
    pub flags: FileFlags,
    pub is_directory: bool,
    pub fingerprint: String,
    pub final_fingerprint: String,
    pub original_size: u64,
    pub final_size: u64,
    pub creation_time: DateTime<Utc>,
    pub last_write_time: DateTime<Utc>,
    pub date_created: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
    pub hold_until: DateTime<Utc>,
    pub processing_started: DateTime<Utc>,
    pub processing_ended: DateTime<Utc>,
    pub library_id: LibraryId,
    pub library_name: String,
    pub flow_id: Option<FlowId>,
    pub flow_name: Option<String>,
    pub node_id: Option<NodeId>,
    pub node_name: Option<String>,
    pub worker_id: Option<WorkerId>,
    pub process_on_node: Option<NodeId>,
    pub output_path: Option<String>,
    pub duplicate_uid: Option<FileUid>,
    pub duplicate_name: Option<String>,
    pub failure_reason: Option<String>,
    pub executed_nodes: Vec<ExecutedNode>,
    pub original_metadata: Metadata,
    pub final_metadata: Metadata,
    /// Manual priority. `0` means unset.
    pub order: i32,
}

impl LibraryFile {
    /// Build a fresh record for a path discovered in `library`.
    pub fn discovered(library: &Library, name: impl Into<String>) -> Self {
        let now = Utc::now();
        let name = name.into();
        let relative_path = library.relative_path(std::path::Path::new(&name));
        Self {
            uid: FileUid::new(),
            name,
            relative_path,
            status: FileStatus::Unprocessed,
            flags: FileFlags::default(),
            is_directory: false,
            fingerprint: String::new(),
            final_fingerprint: String::new(),
            original_size: 0,
            final_size: 0,
            creation_time: epoch_floor(),
            last_write_time: epoch_floor(),
            date_created: now,
            date_modified: now,
            hold_until: epoch_floor(),
            processing_started: epoch_floor(),
            processing_ended: epoch_floor(),
            library_id: library.id,
            library_name: library.name.clone(),
            flow_id: library.flow_id,
            flow_name: library.flow_name.clone(),
            node_id: None,
            node_name: None,
            worker_id: None,
            process_on_node: None,
            output_path: None,
            duplicate_uid: None,
            duplicate_name: None,
            failure_reason: None,
            executed_nodes: Vec::new(),
            original_metadata: Metadata::new(),
            final_metadata: Metadata::new(),
            order: 0,
        }
    }

    pub fn is_forced(&self) -> bool {
        self.flags.force_processing
    }

    pub fn is_on_hold(&self, now: DateTime<Utc>) -> bool {
        self.hold_until > now
    }

    /// Clamp every date to the epoch floor.
    pub fn normalize_dates(&mut self) {
        self.creation_time = normalize(self.creation_time);
        self.last_write_time = normalize(self.last_write_time);
        self.date_created = normalize(self.date_created);
        self.date_modified = normalize(self.date_modified);
        self.hold_until = normalize(self.hold_until);
        self.processing_started = normalize(self.processing_started);
        self.processing_ended = normalize(self.processing_ended);
    }

    /// Normalized copy, ready for a store write.
    pub fn normalized(mut self) -> Self {
        self.normalize_dates();
        self
    }

    /// Drop ownership by any node/worker.
    pub fn clear_ownership(&mut self) {
        self.node_id = None;
        self.node_name = None;
        self.worker_id = None;
    }

    /// Clear everything a previous processing run produced.
    pub fn clear_run_artifacts(&mut self) {
        self.executed_nodes.clear();
        self.final_metadata.clear();
        self.final_size = 0;
        self.output_path = None;
        self.failure_reason = None;
        self.processing_ended = epoch_floor();
    }

    /// Full reset back to `Unprocessed` so the file is processed again.
    ///
    /// The fingerprint is kept so moves and duplicates are still recognised.
    pub fn reset_for_reprocess(&mut self) {
        self.status = FileStatus::Unprocessed;
        self.clear_ownership();
        self.clear_run_artifacts();
        self.original_metadata.clear();
        self.process_on_node = None;
        self.processing_started = epoch_floor();
        self.date_modified = Utc::now();
    }
}
