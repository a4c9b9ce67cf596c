//! Library ingestion.
//!
//! `filters`, `reconcile` and `ingest` decide what a single path becomes in the
//! store. `queue` settles and serializes paths per library. With the
//! `scan-runtime` feature, `walker`, `watch` and `supervisor` provide polling
//! and event-driven discovery on top.

pub mod filters;
pub mod ingest;
pub mod queue;
pub mod reconcile;

#[cfg(feature = "scan-runtime")]
pub mod supervisor;
#[cfg(feature = "scan-runtime")]
pub mod walker;
#[cfg(feature = "scan-runtime")]
pub mod watch;

pub use filters::PathFilter;
pub use ingest::{IngestContext, IngestOutcome, LibraryIngestor, SkipReason};
pub use queue::{IngestQueue, IngestQueueHandle, PathConsumer, ingest_queue};
pub use reconcile::{KnownPath, Observed, UnknownPath};

#[cfg(feature = "scan-runtime")]
pub use supervisor::IngestSupervisor;
#[cfg(feature = "scan-runtime")]
pub use watch::LibraryWatcher;
