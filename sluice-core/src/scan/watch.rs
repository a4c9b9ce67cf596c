//! Event-driven discovery over `notify`.
//!
//! The watcher callback runs on notify's own thread. It maps each event path
//! to the unit the library tracks (the file itself, or the top-level folder in
//! folder mode) and pushes it with a non-blocking send. Errors and rescan
//! hints from the backend raise the queue's overflow flag instead.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use sluice_model::Library;
use tracing::{info, warn};

use crate::error::{Result, SluiceError};
use crate::scan::queue::IngestQueueHandle;

/// Keeps a recursive watch alive for one library root.
pub struct LibraryWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
}

impl fmt::Debug for LibraryWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryWatcher")
            .field("root", &self.root)
            .finish()
    }
}

/// The tracked unit for `path`, or `None` if it isn't below `root`.
pub fn unit_path(root: &Path, folders: bool, path: &Path) -> Option<PathBuf> {
    let rel = path.strip_prefix(root).ok()?;
    let mut components = rel.components();
    let first = match components.next()? {
        Component::Normal(first) => first,
        _ => return None,
    };
    if folders {
        Some(root.join(first))
    } else {
        Some(path.to_path_buf())
    }
}

/// Paths worth re-examining for an event. Removals only matter in folder
/// mode, where the enclosing folder changed.
fn event_paths(event: &Event, folders: bool) -> Vec<&Path> {
    match &event.kind {
        EventKind::Access(_) => Vec::new(),
        EventKind::Remove(_) if !folders => Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) if !folders => Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if !folders => {
            event.paths.iter().skip(1).map(PathBuf::as_path).collect()
        }
        _ => event.paths.iter().map(PathBuf::as_path).collect(),
    }
}

impl LibraryWatcher {
    pub fn start(library: &Library, queue: IngestQueueHandle) -> Result<Self> {
        let root = library.path.clone();
        let folders = library.folders;
        let callback_root = root.clone();
        let library_name = library.name.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) if event.need_rescan() || matches!(event.kind, EventKind::Other) => {
                    queue.mark_overflow();
                }
                Ok(event) => {
                    for path in event_paths(&event, folders) {
                        if let Some(unit) = unit_path(&callback_root, folders, path) {
                            queue.enqueue(unit);
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        target: "ingest::watch",
                        library = %library_name,
                        error = %err,
                        "watcher error; scheduling rescan"
                    );
                    queue.mark_overflow();
                }
            },
            NotifyConfig::default(),
        )
        .map_err(|err| {
            SluiceError::Internal(format!(
                "failed to create watcher for {}: {err}",
                root.display()
            ))
        })?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|err| {
                SluiceError::Internal(format!("failed to watch {}: {err}", root.display()))
            })?;

        info!(target: "ingest::watch", library = %library.name, root = %root.display(), "watching library");
        Ok(Self {
            root,
            _watcher: watcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
