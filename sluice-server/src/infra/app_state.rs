use std::{fmt, sync::Arc};

use sluice_config::SluiceConfig;
use sluice_core::{
    BroadcastEventPublisher, ClaimService, EligibilityEngine, FileAdmin, FileStore,
    IngestSupervisor, LibraryCatalog, LiveRunnerRegistry,
};

/// Everything request handlers need. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn FileStore>,
    pub catalog: Arc<dyn LibraryCatalog>,
    pub claims: Arc<ClaimService>,
    pub admin: Arc<FileAdmin>,
    pub events: Arc<BroadcastEventPublisher>,
    /// Absent when ingestion is not running (tests, `check-config`).
    pub supervisor: Option<Arc<IngestSupervisor>>,
    /// `"postgres"` or `"memory"`, reported by `/health`.
    pub backend: &'static str,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("backend", &self.backend)
            .field("ingesting", &self.supervisor.is_some())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wire the claim and admin services over `store` and `catalog`.
    pub fn new(
        store: Arc<dyn FileStore>,
        catalog: Arc<dyn LibraryCatalog>,
        config: &SluiceConfig,
        backend: &'static str,
    ) -> Self {
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
            config.claim.clone(),
        ));
        let admin = Arc::new(FileAdmin::new(
            store.clone(),
            eligibility,
            registry,
            events.clone(),
        ));

        Self {
            store,
            catalog,
            claims,
            admin,
            events,
            supervisor: None,
            backend,
        }
    }

    pub fn with_supervisor(mut self, supervisor: Arc<IngestSupervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }
}
