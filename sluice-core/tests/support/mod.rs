//! Shared wiring for core integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use sluice_core::{
    BroadcastEventPublisher, ClaimConfig, ClaimRequest, ClaimService, EligibilityEngine,
    FileAdmin, FileStore, InMemoryFileStore, InMemoryLibraryCatalog, LiveRunnerRegistry,
};
use sluice_model::{Library, LibraryFile, NodeId, WorkerId};

/// In-memory store, catalog and services wired the way the server does it.
pub struct Harness {
    pub store: Arc<InMemoryFileStore>,
    pub catalog: Arc<InMemoryLibraryCatalog>,
    pub registry: Arc<LiveRunnerRegistry>,
    pub eligibility: Arc<EligibilityEngine>,
    pub claims: Arc<ClaimService>,
    pub admin: FileAdmin,
    pub events: Arc<BroadcastEventPublisher>,
    seeded: std::sync::atomic::AtomicI64,
}

impl Harness {
    pub fn new(libraries: impl IntoIterator<Item = Library>) -> Self {
        let store = Arc::new(InMemoryFileStore::new());
        let catalog = Arc::new(InMemoryLibraryCatalog::new(libraries));
        let registry = Arc::new(LiveRunnerRegistry::new());
        let events = Arc::new(BroadcastEventPublisher::default());
        let eligibility = Arc::new(EligibilityEngine::new(
            store.clone(),
            catalog.clone(),
            registry.clone(),
        ));
        let claims = Arc::new(ClaimService::new(
            store.clone(),
            catalog.clone(),
            eligibility.clone(),
            registry.clone(),
            events.clone(),
            ClaimConfig::default(),
        ));
        let admin = FileAdmin::new(
            store.clone(),
            eligibility.clone(),
            registry.clone(),
            events.clone(),
        );
        Self {
            store,
            catalog,
            registry,
            eligibility,
            claims,
            admin,
            events,
            seeded: std::sync::atomic::AtomicI64::new(0),
        }
    }

    /// Insert an unprocessed file. Each seeded file is created one second
    /// after the previous one so discovery order is deterministic.
    pub async fn seed(&self, library: &Library, relative: &str, size: u64) -> LibraryFile {
        let index = self
            .seeded
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut file =
            LibraryFile::discovered(library, library.path.join(relative).to_string_lossy());
        file.original_size = size;
        file.date_created = Utc::now() - Duration::hours(1) + Duration::seconds(index);
        file.creation_time = file.date_created;
        file.fingerprint = format!("fp-{relative}");
        self.store.insert_one(&file).await.expect("seed file");
        file
    }

    pub async fn seed_with(
        &self,
        library: &Library,
        relative: &str,
        edit: impl FnOnce(&mut LibraryFile),
    ) -> LibraryFile {
        let mut file = self.seed(library, relative, 100).await;
        edit(&mut file);
        self.store.update_one(&file).await.expect("update seeded file");
        file
    }
}

pub fn worker(node: NodeId) -> ClaimRequest {
    ClaimRequest::new(node, "node", WorkerId::new())
}
