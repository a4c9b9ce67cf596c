//! # Sluice Core
//!
//! Scheduling and ingestion core for sluice: discovers files in watched
//! libraries, decides which of them are eligible for processing and in what
//! order, and hands them to workers through an atomic claim protocol.
//!
//! ## Overview
//!
//! - **Ingestion**: per-library watchers and scans feed a settling queue that
//!   reconciles each path against the store (new, moved, duplicate, modified)
//! - **Eligibility & ordering**: one predicate/ordering representation shared
//!   by the in-memory and Postgres stores
//! - **Claims**: conditional status updates guarantee a single owner per file
//! - **Administration**: reprocess, force, reorder, unhold and status counts
//!
//! ## Feature Flags
//!
//! - `database`: PostgreSQL store over SQLx with embedded migrations
//! - `scan-runtime`: `notify` watchers, `walkdir` scans and the ingest supervisor
//!
//! ## Architecture
//!
//! - [`database`]: store port, predicate/ordering model and adapters
//! - [`eligibility`]: view predicates, gating and ordering selection
//! - [`claim`]: claim, checkpoint, completion and recovery
//! - [`scan`]: path filters, reconciliation, queue and discovery runtime
//! - [`admin`]: operator actions and status summaries
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sluice_core::{
//!     ClaimConfig, ClaimRequest, ClaimService, EligibilityEngine, InMemoryFileStore,
//!     InMemoryLibraryCatalog, LiveRunnerRegistry, NoopEventPublisher,
//! };
//! use sluice_model::{Library, NodeId, WorkerId};
//!
//! async fn claim_one() -> sluice_core::Result<()> {
//!     let store = Arc::new(InMemoryFileStore::new());
//!     let catalog = Arc::new(InMemoryLibraryCatalog::new([Library::new("Movies", "/media/movies")]));
//!     let registry = Arc::new(LiveRunnerRegistry::default());
//!     let eligibility = Arc::new(EligibilityEngine::new(
//!         store.clone(),
//!         catalog.clone(),
//!         registry.clone(),
//!     ));
//!     let claims = ClaimService::new(
//!         store,
//!         catalog,
//!         eligibility,
//!         registry,
//!         Arc::new(NoopEventPublisher),
//!         ClaimConfig::default(),
//!     );
//!
//!     let request = ClaimRequest::new(NodeId::new(), "node-a", WorkerId::new());
//!     if let Some(file) = claims.next_file(&request).await? {
//!         println!("claimed {}", file.name);
//!     }
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod catalog;
pub mod claim;
pub mod config;
pub mod database;
pub mod eligibility;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod runners;
pub mod scan;
pub mod status;

pub use admin::{FileAdmin, StatusSummary, ViewCount};
pub use catalog::{InMemoryLibraryCatalog, LibraryCatalog};
pub use claim::{ClaimRequest, ClaimService, CompletionReport, ProgressReport};
pub use config::{ClaimConfig, IngestConfig};
pub use database::{
    FileOrdering, FilePredicate, FileQuery, FileStore, InMemoryFileStore, SortField, SortScope,
    SortTerm,
};
#[cfg(feature = "database")]
pub use database::{MIGRATOR, PostgresFileStore};
pub use eligibility::{EligibilityEngine, EligibilityRequest, LibrarySnapshot};
pub use error::{Result, SluiceError};
pub use events::{BroadcastEventPublisher, FileEvent, FileEventPublisher, NoopEventPublisher};
pub use fingerprint::{Fingerprinter, Sha256Fingerprinter};
pub use runners::{LiveRunnerRegistry, RunnerCounts, RunnerSlot};
pub use scan::{IngestContext, IngestOutcome, LibraryIngestor, PathFilter, SkipReason};
#[cfg(feature = "scan-runtime")]
pub use scan::IngestSupervisor;
pub use status::{LibraryGate, classify, in_view};
