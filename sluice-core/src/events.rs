//! File lifecycle events raised after each durable state change.

use std::fmt;

use sluice_model::{FileUid, LibraryFile, LibraryId};
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, PartialEq)]
pub enum FileEvent {
    /// A new or re-queued file entered the queue.
    FileAdded {
        file: Box<LibraryFile>,
        library_id: LibraryId,
    },
    ProcessingStarted {
        file: Box<LibraryFile>,
    },
    ProcessingCompleted {
        file: Box<LibraryFile>,
        success: bool,
    },
}

impl FileEvent {
    pub fn file_uid(&self) -> FileUid {
        match self {
            FileEvent::FileAdded { file, .. }
            | FileEvent::ProcessingStarted { file }
            | FileEvent::ProcessingCompleted { file, .. } => file.uid,
        }
    }
}

/// Synchronous fan-out of [`FileEvent`]s. Publishing never fails the caller.
pub trait FileEventPublisher: Send + Sync {
    fn publish(&self, event: FileEvent);
}

/// Broadcasts events to any number of subscribers. Slow subscribers lag and
/// drop old events rather than blocking the publisher.
#[derive(Clone)]
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<FileEvent>,
}

impl BroadcastEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FileEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl fmt::Debug for BroadcastEventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastEventPublisher")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

impl FileEventPublisher for BroadcastEventPublisher {
    fn publish(&self, event: FileEvent) {
        if self.sender.send(event).is_err() {
            trace!("file event dropped: no subscribers");
        }
    }
}

/// Discards every event.
pub struct NoopEventPublisher;

impl FileEventPublisher for NoopEventPublisher {
    fn publish(&self, _event: FileEvent) {}
}

impl fmt::Debug for NoopEventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NoopEventPublisher")
    }
}
