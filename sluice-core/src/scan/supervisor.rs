//! Per-library ingestion runtimes.
//!
//! Each registered library gets a bounded queue with its own drain task, an
//! optional `notify` watcher, and a scan task that walks the root on start,
//! on every scan interval, and whenever a rescan is requested (manually or
//! after queue overflow). Scans for one library never overlap.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sluice_model::{Library, LibraryId, ScanMode};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::LibraryCatalog;
use crate::config::IngestConfig;
use crate::error::Result;
use crate::scan::ingest::{IngestContext, IngestOutcome, LibraryIngestor};
use crate::scan::queue::{IngestQueueHandle, PathConsumer, ingest_queue};
use crate::scan::walker;
use crate::scan::watch::LibraryWatcher;

/// State shared by one library's tasks.
struct LibraryState {
    ctx: IngestContext,
    queue: IngestQueueHandle,
    ingestor: Arc<LibraryIngestor>,
    catalog: Arc<dyn LibraryCatalog>,
    scanning: AtomicBool,
    rescan: Notify,
}

impl fmt::Debug for LibraryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryState")
            .field("library", &self.ctx.library.name)
            .field("scanning", &self.scanning.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl PathConsumer for LibraryState {
    async fn process(&self, path: &Path) -> Result<IngestOutcome> {
        self.ingestor.ingest(&self.ctx, path, Utc::now()).await
    }

    fn on_overflow(&self) {
        self.rescan.notify_one();
    }
}

struct ScanGuard<'a>(&'a AtomicBool);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl LibraryState {
    /// Walk the root and queue every candidate. Returns `None` when another
    /// scan of this library is already running.
    async fn scan(&self) -> Result<Option<usize>> {
        if self.scanning.swap(true, Ordering::AcqRel) {
            return Ok(None);
        }
        let _guard = ScanGuard(&self.scanning);
        let library = &self.ctx.library;

        let paths = walker::discover(&self.ctx).await?;
        let found = paths.len();
        for path in paths {
            self.queue.submit(path).await?;
        }
        self.catalog.mark_scanned(library.id, Utc::now()).await?;
        info!(target: "ingest::scan", library = %library.name, found, "library scan queued");
        Ok(Some(found))
    }

    async fn scan_loop(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.rescan.notified() => {}
            }
            if let Err(err) = self.scan().await {
                warn!(
                    target: "ingest::scan",
                    library = %self.ctx.library.name,
                    error = %err,
                    "library scan failed"
                );
            }
        }
    }
}

struct LibraryRuntime {
    state: Arc<LibraryState>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    watcher: Option<LibraryWatcher>,
}

impl LibraryRuntime {
    async fn stop(self) {
        self.cancel.cancel();
        drop(self.watcher);
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(target: "ingest::scan", error = %err, "ingest task ended abnormally");
            }
        }
    }
}

/// Owns every library's ingestion runtime.
pub struct IngestSupervisor {
    catalog: Arc<dyn LibraryCatalog>,
    ingestor: Arc<LibraryIngestor>,
    config: IngestConfig,
    cancel: CancellationToken,
    runtimes: Mutex<HashMap<LibraryId, LibraryRuntime>>,
}

impl fmt::Debug for IngestSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let runtimes = self
            .runtimes
            .try_lock()
            .map(|guard| guard.len().to_string())
            .unwrap_or_else(|_| "<locked>".into());
        f.debug_struct("IngestSupervisor")
            .field("config", &self.config)
            .field("runtimes", &runtimes)
            .finish()
    }
}

impl IngestSupervisor {
    pub fn new(
        catalog: Arc<dyn LibraryCatalog>,
        ingestor: Arc<LibraryIngestor>,
        config: IngestConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            catalog,
            ingestor,
            config,
            cancel,
            runtimes: Mutex::new(HashMap::new()),
        }
    }

    /// Register every enabled library in the catalog. Libraries that fail to
    /// start are logged and skipped.
    pub async fn start(&self) -> Result<usize> {
        let mut started = 0;
        for library in self.catalog.list().await? {
            if !library.enabled {
                debug!(target: "ingest::scan", library = %library.name, "library disabled; not watching");
                continue;
            }
            let name = library.name.clone();
            match self.register(library).await {
                Ok(()) => started += 1,
                Err(err) => {
                    warn!(target: "ingest::scan", library = %name, error = %err, "failed to start library ingest");
                }
            }
        }
        Ok(started)
    }

    /// Start (or restart) ingestion for `library`.
    pub async fn register(&self, library: Library) -> Result<()> {
        let ctx = IngestContext::new(library)?;
        let library = ctx.library.clone();
        let (queue_handle, queue) = ingest_queue(
            library.id,
            self.config.queue_capacity,
            self.config.settle_delay(),
            self.config.tick_interval(),
        );

        let state = Arc::new(LibraryState {
            ctx,
            queue: queue_handle.clone(),
            ingestor: Arc::clone(&self.ingestor),
            catalog: Arc::clone(&self.catalog),
            scanning: AtomicBool::new(false),
            rescan: Notify::new(),
        });

        let watcher = match library.scan_mode {
            ScanMode::Watch if library.path.is_dir() => {
                match LibraryWatcher::start(&library, queue_handle) {
                    Ok(watcher) => Some(watcher),
                    Err(err) => {
                        warn!(
                            target: "ingest::watch",
                            library = %library.name,
                            error = %err,
                            "watcher failed to start; falling back to scanning"
                        );
                        None
                    }
                }
            }
            ScanMode::Watch => {
                warn!(
                    target: "ingest::watch",
                    library = %library.name,
                    path = %library.path.display(),
                    "library path missing; falling back to scanning"
                );
                None
            }
            ScanMode::Scan => None,
        };

        let interval = library
            .scan_interval_seconds
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.config.default_scan_interval());

        let cancel = self.cancel.child_token();
        let consumer: Arc<dyn PathConsumer> = state.clone();
        let tasks = vec![
            tokio::spawn(queue.run(consumer, cancel.clone())),
            tokio::spawn(Arc::clone(&state).scan_loop(interval, cancel.clone())),
        ];

        let runtime = LibraryRuntime {
            state,
            cancel,
            tasks,
            watcher,
        };

        info!(
            target: "ingest::scan",
            library = %library.name,
            watching = runtime.watcher.is_some(),
            interval_secs = interval.as_secs(),
            "library ingest started"
        );

        let previous = self.runtimes.lock().await.insert(library.id, runtime);
        if let Some(previous) = previous {
            previous.stop().await;
        }
        Ok(())
    }

    pub async fn unregister(&self, id: LibraryId) -> bool {
        let runtime = self.runtimes.lock().await.remove(&id);
        match runtime {
            Some(runtime) => {
                runtime.stop().await;
                true
            }
            None => false,
        }
    }

    /// Ask for a full scan. Returns `false` when the library isn't registered
    /// or a scan is already running.
    pub async fn rescan(&self, id: LibraryId) -> bool {
        let runtimes = self.runtimes.lock().await;
        let Some(runtime) = runtimes.get(&id) else {
            return false;
        };
        if runtime.state.scanning.load(Ordering::Acquire) {
            return false;
        }
        runtime.state.rescan.notify_one();
        true
    }

    pub async fn is_watching(&self, id: LibraryId) -> bool {
        self.runtimes
            .lock()
            .await
            .get(&id)
            .is_some_and(|runtime| runtime.watcher.is_some())
    }

    pub async fn registered(&self) -> Vec<LibraryId> {
        self.runtimes.lock().await.keys().copied().collect()
    }

    /// Stop every library and wait for their tasks.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let runtimes: Vec<LibraryRuntime> =
            self.runtimes.lock().await.drain().map(|(_, rt)| rt).collect();
        for runtime in runtimes {
            runtime.stop().await;
        }
        info!(target: "ingest::scan", "ingest supervisor stopped");
    }
}
