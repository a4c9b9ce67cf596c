//! Bounded per-library ingest queue.
//!
//! Producers (watch callbacks and scans) push paths through an
//! [`IngestQueueHandle`]. A single drain task per library holds each path
//! until it has settled, then hands it to a [`PathConsumer`] one at a time.
//! Watch callbacks never block: when the channel is full the handle raises an
//! overflow flag and the drain task asks the consumer for a full rescan.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sluice_model::LibraryId;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, SluiceError};
use crate::scan::ingest::IngestOutcome;

/// Receives settled paths from the drain task.
#[async_trait]
pub trait PathConsumer: Send + Sync {
    async fn process(&self, path: &Path) -> Result<IngestOutcome>;

    /// Called when paths were dropped because the queue was full.
    fn on_overflow(&self);
}

/// Cloneable producer side of one library's queue.
#[derive(Clone)]
pub struct IngestQueueHandle {
    library: LibraryId,
    tx: mpsc::Sender<PathBuf>,
    overflow: Arc<AtomicBool>,
}

impl fmt::Debug for IngestQueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestQueueHandle")
            .field("library", &self.library)
            .field("capacity", &self.tx.max_capacity())
            .field("overflow", &self.overflow.load(Ordering::Relaxed))
            .finish()
    }
}

impl IngestQueueHandle {
    /// Non-blocking push for watch callbacks. Returns `false` when the path was
    /// dropped; a full channel flags the library for a rescan.
    pub fn enqueue(&self, path: PathBuf) -> bool {
        match self.tx.try_send(path) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(path)) => {
                if !self.overflow.swap(true, Ordering::AcqRel) {
                    warn!(
                        target: "ingest::queue",
                        library = %self.library,
                        dropped = %path.display(),
                        "ingest queue full; scheduling rescan"
                    );
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Waiting push used by scans, which can afford back-pressure.
    pub async fn submit(&self, path: PathBuf) -> Result<()> {
        self.tx
            .send(path)
            .await
            .map_err(|_| SluiceError::Cancelled(format!("ingest queue for {} closed", self.library)))
    }

    /// Request a rescan without dropping a specific path (watcher errors).
    pub fn mark_overflow(&self) {
        self.overflow.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    ready_at: Instant,
    retried: bool,
}

/// Consumer side; run it with [`IngestQueue::run`].
pub struct IngestQueue {
    library: LibraryId,
    rx: mpsc::Receiver<PathBuf>,
    overflow: Arc<AtomicBool>,
    pending: HashMap<PathBuf, Pending>,
    settle: Duration,
    tick: Duration,
}

impl fmt::Debug for IngestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestQueue")
            .field("library", &self.library)
            .field("pending", &self.pending.len())
            .field("settle", &self.settle)
            .field("tick", &self.tick)
            .finish()
    }
}

/// Create the handle/queue pair for one library.
pub fn ingest_queue(
    library: LibraryId,
    capacity: usize,
    settle: Duration,
    tick: Duration,
) -> (IngestQueueHandle, IngestQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let overflow = Arc::new(AtomicBool::new(false));
    (
        IngestQueueHandle {
            library,
            tx,
            overflow: Arc::clone(&overflow),
        },
        IngestQueue {
            library,
            rx,
            overflow,
            pending: HashMap::new(),
            settle,
            tick,
        },
    )
}

impl IngestQueue {
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Re-discovery of a pending path pushes its ready time out again.
    fn push(&mut self, path: PathBuf, now: Instant) {
        let ready_at = now + self.settle;
        self.pending
            .entry(path)
            .and_modify(|pending| pending.ready_at = ready_at)
            .or_insert(Pending {
                ready_at,
                retried: false,
            });
    }

    fn take_ready(&mut self, now: Instant) -> Vec<(PathBuf, Pending)> {
        let mut ready: Vec<(PathBuf, Pending)> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.ready_at <= now)
            .map(|(path, pending)| (path.clone(), *pending))
            .collect();
        for (path, _) in &ready {
            self.pending.remove(path);
        }
        ready.sort_by(|a, b| a.1.ready_at.cmp(&b.1.ready_at).then_with(|| a.0.cmp(&b.0)));
        ready
    }

    async fn drain_ready(&mut self, consumer: &dyn PathConsumer, cancel: &CancellationToken) {
        for (path, pending) in self.take_ready(Instant::now()) {
            if cancel.is_cancelled() {
                return;
            }
            match consumer.process(&path).await {
                Ok(IngestOutcome::RetryLater { after }) if !pending.retried => {
                    let delay = after + self.settle;
                    debug!(
                        target: "ingest::queue",
                        path = %path.display(),
                        delay_ms = delay.as_millis() as u64,
                        "re-queueing unsettled path"
                    );
                    self.pending.insert(
                        path,
                        Pending {
                            ready_at: Instant::now() + delay,
                            retried: true,
                        },
                    );
                }
                Ok(IngestOutcome::RetryLater { .. }) => {
                    info!(
                        target: "ingest::queue",
                        library = %self.library,
                        path = %path.display(),
                        "path still unsettled after retry; left for the next scan"
                    );
                }
                Ok(outcome) => {
                    debug!(target: "ingest::queue", path = %path.display(), ?outcome, "path processed");
                }
                Err(err) => {
                    warn!(
                        target: "ingest::queue",
                        library = %self.library,
                        path = %path.display(),
                        error = %err,
                        "failed to ingest path"
                    );
                }
            }
        }
    }

    /// Drain until cancelled or every handle is dropped. Paths still pending
    /// at shutdown are discarded; the next scan rediscovers them.
    pub async fn run(mut self, consumer: Arc<dyn PathConsumer>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                message = self.rx.recv() => match message {
                    Some(path) => self.push(path, Instant::now()),
                    None => break,
                },
                _ = ticker.tick() => {
                    self.drain_ready(consumer.as_ref(), &cancel).await;
                }
            }

            if self.overflow.swap(false, Ordering::AcqRel) {
                consumer.on_overflow();
            }
        }

        debug!(
            target: "ingest::queue",
            library = %self.library,
            discarded = self.pending.len(),
            "ingest queue stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<PathBuf>>,
        retry: Mutex<Vec<PathBuf>>,
        overflows: AtomicUsize,
    }

    #[async_trait]
    impl PathConsumer for Recorder {
        async fn process(&self, path: &Path) -> Result<IngestOutcome> {
            self.seen.lock().unwrap().push(path.to_path_buf());
            if self.retry.lock().unwrap().iter().any(|p| p == path) {
                return Ok(IngestOutcome::RetryLater {
                    after: Duration::from_secs(1),
                });
            }
            Ok(IngestOutcome::Skipped(crate::scan::ingest::SkipReason::Missing))
        }

        fn on_overflow(&self) {
            self.overflows.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pair(capacity: usize) -> (IngestQueueHandle, IngestQueue) {
        ingest_queue(
            LibraryId::new(),
            capacity,
            Duration::from_millis(200),
            Duration::from_millis(50),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_paths_collapse_and_wait_for_settle() {
        let (handle, queue) = pair(16);
        let recorder = Arc::new(Recorder::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(queue.run(recorder.clone(), cancel.clone()));

        assert!(handle.enqueue("/lib/a".into()));
        assert!(handle.enqueue("/lib/a".into()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(recorder.seen.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(recorder.seen.lock().unwrap().as_slice(), &[PathBuf::from("/lib/a")]);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn retry_later_is_honoured_once() {
        let (handle, queue) = pair(16);
        let recorder = Arc::new(Recorder::default());
        recorder.retry.lock().unwrap().push("/lib/folder".into());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(queue.run(recorder.clone(), cancel.clone()));

        handle.submit("/lib/folder".into()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(recorder.seen.lock().unwrap().len(), 1);

        // Retry lands after the remaining wait plus the settle delay.
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(recorder.seen.lock().unwrap().len(), 2);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(recorder.seen.lock().unwrap().len(), 2);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn full_channel_requests_rescan() {
        let (handle, queue) = pair(1);
        assert!(handle.enqueue("/lib/a".into()));
        assert!(!handle.enqueue("/lib/b".into()));

        let recorder = Arc::new(Recorder::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(queue.run(recorder.clone(), cancel.clone()));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(recorder.overflows.load(Ordering::SeqCst), 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn dropping_handles_stops_the_drain_task() {
        let (handle, queue) = pair(4);
        let recorder = Arc::new(Recorder::default());
        let task = tokio::spawn(queue.run(recorder, CancellationToken::new()));
        drop(handle);
        task.await.unwrap();
    }
}
