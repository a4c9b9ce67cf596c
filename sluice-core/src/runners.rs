//! Live registry of in-flight claims, queried fresh for per-library counts.

use std::fmt;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sluice_model::{FileUid, LibraryFile, LibraryId, NodeId, WorkerId};

/// Read side consumed by the eligibility engine.
pub trait RunnerCounts: Send + Sync {
    /// Number of files currently being processed for `library`.
    fn running(&self, library: LibraryId) -> usize;
}

/// One reserved runner slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerSlot {
    pub file: FileUid,
    pub worker: WorkerId,
    pub node: NodeId,
    pub started_at: DateTime<Utc>,
}

impl RunnerSlot {
    pub fn new(file: FileUid, worker: WorkerId, node: NodeId) -> Self {
        Self {
            file,
            worker,
            node,
            started_at: Utc::now(),
        }
    }
}

/// Per-library slot lists. Reservation holds the library's shard lock, so
/// check-and-reserve against a cap is atomic.
#[derive(Default)]
pub struct LiveRunnerRegistry {
    libraries: DashMap<LibraryId, Vec<RunnerSlot>>,
}

impl fmt::Debug for LiveRunnerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total: usize = self.libraries.iter().map(|e| e.value().len()).sum();
        f.debug_struct("LiveRunnerRegistry")
            .field("libraries", &self.libraries.len())
            .field("running", &total)
            .finish()
    }
}

impl LiveRunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot unless `library` already has `cap` runners. A cap of
    /// zero is unlimited. Reserving the same file twice is a no-op success.
    pub fn try_reserve(&self, library: LibraryId, cap: u32, slot: RunnerSlot) -> bool {
        let mut slots = self.libraries.entry(library).or_default();
        if slots.iter().any(|s| s.file == slot.file) {
            return true;
        }
        if cap > 0 && slots.len() >= cap as usize {
            return false;
        }
        slots.push(slot);
        true
    }

    /// Reserve without checking the cap (forced files).
    pub fn reserve(&self, library: LibraryId, slot: RunnerSlot) {
        self.try_reserve(library, 0, slot);
    }

    /// Release the slot held for `file`. Returns whether one existed.
    pub fn release(&self, file: FileUid) -> bool {
        let mut released = false;
        for mut entry in self.libraries.iter_mut() {
            let before = entry.len();
            entry.retain(|s| s.file != file);
            released |= entry.len() != before;
        }
        released
    }

    /// Release every slot matching `pred`; returns the released files.
    fn release_where(&self, pred: impl Fn(&RunnerSlot) -> bool) -> Vec<FileUid> {
        let mut released = Vec::new();
        for mut entry in self.libraries.iter_mut() {
            entry.retain(|s| {
                if pred(s) {
                    released.push(s.file);
                    false
                } else {
                    true
                }
            });
        }
        released
    }

    pub fn release_worker(&self, worker: WorkerId) -> Vec<FileUid> {
        self.release_where(|s| s.worker == worker)
    }

    pub fn release_node(&self, node: NodeId) -> Vec<FileUid> {
        self.release_where(|s| s.node == node)
    }

    /// Rebuild slots for files that are already `Processing` (startup).
    pub fn restore<'a>(&self, files: impl IntoIterator<Item = &'a LibraryFile>) {
        for file in files {
            if let (Some(worker), Some(node)) = (file.worker_id, file.node_id) {
                let mut slot = RunnerSlot::new(file.uid, worker, node);
                slot.started_at = file.processing_started;
                self.reserve(file.library_id, slot);
            }
        }
    }

    pub fn snapshot(&self) -> Vec<(LibraryId, RunnerSlot)> {
        self.libraries
            .iter()
            .flat_map(|entry| {
                let library = *entry.key();
                entry
                    .value()
                    .iter()
                    .cloned()
                    .map(move |slot| (library, slot))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

impl RunnerCounts for LiveRunnerRegistry {
    fn running(&self, library: LibraryId) -> usize {
        self.libraries.get(&library).map_or(0, |slots| slots.len())
    }
}
