//! Claim protocol: hand a worker exactly one file and track it to completion.
//!
//! Exclusivity comes from the store's conditional update keyed on
//! `(uid, status = Unprocessed)`. A runner slot is reserved before that
//! update so `max_runners` holds under concurrency, and released again when
//! the claim is lost.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sluice_model::time::epoch_floor;
use sluice_model::{
    ExecutedNode, FileStatus, FileUid, Library, LibraryFile, LibraryId,
    Metadata, NodeId, WorkerId,
};
use tracing::{debug, info, warn};

use crate::catalog::LibraryCatalog;
use crate::config::ClaimConfig;
use crate::database::filter::{FilePredicate, FileQuery};
use crate::database::ports::FileStore;
use crate::eligibility::{EligibilityEngine, EligibilityRequest};
use crate::error::{Result, SluiceError};
use crate::events::{FileEvent, FileEventPublisher};
use crate::runners::{LiveRunnerRegistry, RunnerSlot};

/// A worker asking for its next file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub node_id: NodeId,
    pub node_name: String,
    pub worker_id: WorkerId,
    #[serde(default)]
    pub allow: Option<Vec<FileUid>>,
    #[serde(default)]
    pub deny: Vec<FileUid>,
    #[serde(default)]
    pub max_size: Option<u64>,
}

impl ClaimRequest {
    pub fn new(node_id: NodeId, node_name: impl Into<String>, worker_id: WorkerId) -> Self {
        Self {
            node_id,
            node_name: node_name.into(),
            worker_id,
            allow: None,
            deny: Vec::new(),
            max_size: None,
        }
    }
}

/// In-flight progress written without releasing ownership.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressReport {
    pub executed_nodes: Vec<ExecutedNode>,
    pub final_size: Option<u64>,
    pub final_metadata: Option<Metadata>,
}

/// Terminal outcome of processing one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub worker_id: WorkerId,
    pub success: bool,
    #[serde(default)]
    pub final_size: u64,
    #[serde(default)]
    pub final_fingerprint: Option<String>,
    #[serde(default)]
    pub executed_nodes: Vec<ExecutedNode>,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub final_metadata: Metadata,
}

pub struct ClaimService {
    store: Arc<dyn FileStore>,
    catalog: Arc<dyn LibraryCatalog>,
    eligibility: Arc<EligibilityEngine>,
    registry: Arc<LiveRunnerRegistry>,
    events: Arc<dyn FileEventPublisher>,
    config: ClaimConfig,
}

impl fmt::Debug for ClaimService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimService")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

impl ClaimService {
    pub fn new(
        store: Arc<dyn FileStore>,
        catalog: Arc<dyn LibraryCatalog>,
        eligibility: Arc<EligibilityEngine>,
        registry: Arc<LiveRunnerRegistry>,
        events: Arc<dyn FileEventPublisher>,
        config: ClaimConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            eligibility,
            registry,
            events,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<LiveRunnerRegistry> {
        &self.registry
    }

    /// Claim the next eligible file for `request`, or `None` when nothing is
    /// eligible or every candidate was lost for `max_rounds` rounds.
    pub async fn next_file(&self, request: &ClaimRequest) -> Result<Option<LibraryFile>> {
        let rounds = self.config.max_rounds.max(1);
        for round in 0..rounds {
            let now = Utc::now();
            let selection = EligibilityRequest {
                allow: request.allow.clone(),
                deny: request.deny.clone(),
                max_size: request.max_size,
                node: Some(request.node_id),
                take: Some(self.config.candidates_per_round.max(1)),
                ..EligibilityRequest::default()
            };
            let candidates = self.eligibility.candidates(&selection, now).await;
            if candidates.is_empty() {
                return Ok(None);
            }

            let libraries: HashMap<LibraryId, Library> = self
                .catalog
                .list()
                .await?
                .into_iter()
                .map(|library| (library.id, library))
                .collect();

            for candidate in candidates {
                let Some(library) = libraries.get(&candidate.library_id) else {
                    continue;
                };
                if let Some(claimed) = self.try_claim(candidate, library, request).await? {
                    return Ok(Some(claimed));
                }
            }
            debug!(
                target: "claim",
                round,
                worker = %request.worker_id,
                "all candidates lost; reselecting"
            );
        }
        Ok(None)
    }

    async fn try_claim(
        &self,
        candidate: LibraryFile,
        library: &Library,
        request: &ClaimRequest,
    ) -> Result<Option<LibraryFile>> {
        let uid = candidate.uid;
        let slot = RunnerSlot::new(uid, request.worker_id, request.node_id);
        if candidate.is_forced() {
            self.registry.reserve(library.id, slot);
        } else if !self
            .registry
            .try_reserve(library.id, library.max_runners, slot)
        {
            debug!(target: "claim", file = %uid, library = %library.name, "library at runner cap");
            return Ok(None);
        }

        let now = Utc::now();
        let mut claimed = candidate;
        claimed.clear_run_artifacts();
        claimed.status = FileStatus::Processing;
        claimed.node_id = Some(request.node_id);
        claimed.node_name = Some(request.node_name.clone());
        claimed.worker_id = Some(request.worker_id);
        claimed.processing_started = now;
        claimed.date_modified = now;

        let won = match self
            .store
            .conditional_update_status(uid, FileStatus::Unprocessed, &claimed)
            .await
        {
            Ok(won) => won,
            Err(err) => {
                self.registry.release(uid);
                return Err(err);
            }
        };
        if !won {
            self.registry.release(uid);
            debug!(target: "claim", file = %uid, worker = %request.worker_id, "lost claim race");
            return Ok(None);
        }

        info!(
            target: "claim",
            file = %uid,
            path = %claimed.name,
            library = %library.name,
            node = %request.node_name,
            worker = %request.worker_id,
            "file claimed"
        );
        self.events.publish(FileEvent::ProcessingStarted {
            file: Box::new(claimed.clone()),
        });
        Ok(Some(claimed))
    }

    async fn owned_file(&self, uid: FileUid, worker: WorkerId) -> Result<LibraryFile> {
        let file = self
            .store
            .get_by_uid(uid)
            .await?
            .ok_or_else(|| SluiceError::NotFound(format!("file {uid}")))?;
        if file.status != FileStatus::Processing {
            return Err(SluiceError::InvalidState(format!(
                "file {uid} is {}, not processing",
                file.status
            )));
        }
        if file.worker_id != Some(worker) {
            return Err(SluiceError::InvalidState(format!(
                "file {uid} is not owned by worker {worker}"
            )));
        }
        Ok(file)
    }

    /// Record progress while keeping ownership.
    pub async fn checkpoint(
        &self,
        uid: FileUid,
        worker: WorkerId,
        progress: ProgressReport,
    ) -> Result<LibraryFile> {
        let mut file = self.owned_file(uid, worker).await?;
        file.executed_nodes = progress.executed_nodes;
        if let Some(size) = progress.final_size {
            file.final_size = size;
        }
        if let Some(metadata) = progress.final_metadata {
            file.final_metadata = metadata;
        }
        file.date_modified = Utc::now();

        if !self.store.conditional_update_owned(uid, worker, &file).await? {
            return Err(SluiceError::InvalidState(format!(
                "claim on {uid} was lost before checkpoint"
            )));
        }
        debug!(target: "claim", file = %uid, steps = file.executed_nodes.len(), "checkpoint");
        Ok(file)
    }

    /// Terminal transition `Processing -> Processed | ProcessingFailed`.
    pub async fn complete(&self, uid: FileUid, report: CompletionReport) -> Result<LibraryFile> {
        let mut file = self.owned_file(uid, report.worker_id).await?;
        let next = if report.success {
            FileStatus::Processed
        } else {
            FileStatus::ProcessingFailed
        };
        if !file.status.can_transition_to(next) {
            return Err(SluiceError::InvalidState(format!(
                "file {uid} cannot move from {} to {next}",
                file.status
            )));
        }

        let now = Utc::now();
        file.status = next;
        file.final_size = report.final_size;
        if let Some(fp) = report.final_fingerprint.filter(|fp| !fp.is_empty()) {
            file.final_fingerprint = fp;
        }
        file.executed_nodes = report.executed_nodes;
        file.output_path = report.output_path;
        file.failure_reason = if report.success {
            None
        } else {
            report.failure_reason
        };
        file.final_metadata = report.final_metadata;
        file.processing_ended = now;
        file.date_modified = now;
        file.flags.force_processing = false;

        if !self
            .store
            .conditional_update_owned(uid, report.worker_id, &file)
            .await?
        {
            return Err(SluiceError::InvalidState(format!(
                "claim on {uid} was lost before completion"
            )));
        }
        self.registry.release(uid);

        info!(
            target: "claim",
            file = %uid,
            status = %file.status,
            worker = %report.worker_id,
            "processing finished"
        );
        self.events.publish(FileEvent::ProcessingCompleted {
            file: Box::new(file.clone()),
            success: report.success,
        });
        Ok(file)
    }

    /// Reset a claimed file back to `Unprocessed`. Returns `false` when the
    /// file is not currently being processed.
    pub async fn abort(&self, uid: FileUid) -> Result<bool> {
        let Some(file) = self.store.get_by_uid(uid).await? else {
            return Err(SluiceError::NotFound(format!("file {uid}")));
        };
        self.reset_claim(file).await
    }

    async fn reset_claim(&self, mut file: LibraryFile) -> Result<bool> {
        let uid = file.uid;
        if file.status != FileStatus::Processing {
            self.registry.release(uid);
            return Ok(false);
        }
        let worker = file.worker_id;
        file.status = FileStatus::Unprocessed;
        file.clear_ownership();
        file.processing_started = epoch_floor();
        file.date_modified = Utc::now();

        let reset = self
            .store
            .conditional_update_status(uid, FileStatus::Processing, &file)
            .await?;
        self.registry.release(uid);
        if reset {
            info!(target: "claim", file = %uid, worker = ?worker, "claim aborted");
        }
        Ok(reset)
    }

    async fn reset_matching(&self, predicate: FilePredicate) -> Result<usize> {
        let files = self
            .store
            .query(&FileQuery::new(
                FilePredicate::StatusIs(FileStatus::Processing).and(predicate),
            ))
            .await?;
        let mut reset = 0;
        for file in files {
            if self.reset_claim(file).await? {
                reset += 1;
            }
        }
        Ok(reset)
    }

    /// Abort every claim held by `worker`.
    pub async fn abort_worker(&self, worker: WorkerId) -> Result<usize> {
        let reset = self.reset_matching(FilePredicate::WorkerIs(worker)).await?;
        self.registry.release_worker(worker);
        Ok(reset)
    }

    /// Abort every claim held on `node` (node lost or restarted).
    pub async fn release_node(&self, node: NodeId) -> Result<usize> {
        let reset = self.reset_matching(FilePredicate::NodeIs(node)).await?;
        self.registry.release_node(node);
        if reset > 0 {
            warn!(target: "claim", node = %node, reset, "released claims for node");
        }
        Ok(reset)
    }

    /// Reset `Processing` rows bound to nodes outside `known_nodes`, then
    /// rebuild runner slots for the claims that survive.
    pub async fn startup_sweep(&self, known_nodes: &[NodeId]) -> Result<usize> {
        let swept = self
            .reset_matching(FilePredicate::NodeNotIn(known_nodes.to_vec()))
            .await?;
        let surviving = self
            .store
            .query(&FileQuery::new(FilePredicate::StatusIs(FileStatus::Processing)))
            .await?;
        self.registry.restore(&surviving);
        info!(
            target: "claim",
            swept,
            restored = surviving.len(),
            "startup sweep finished"
        );
        Ok(swept)
    }
}
