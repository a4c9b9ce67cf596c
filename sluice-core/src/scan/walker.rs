//! Polling discovery: walk a library root and list candidate units.

use std::path::{Path, PathBuf};

use tokio::task::spawn_blocking;
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use crate::error::{Result, SluiceError};
use crate::scan::ingest::IngestContext;

fn hidden_below_root(entry: &DirEntry) -> bool {
    entry.depth() > 0 && entry.file_name().to_string_lossy().starts_with('.')
}

/// Blocking walk. Folder-mode libraries yield their immediate child
/// directories; file-mode libraries yield every file below the root.
pub fn walk_library(root: &Path, folders: bool, exclude_hidden: bool) -> Vec<PathBuf> {
    let mut walker = WalkDir::new(root).min_depth(1).follow_links(false);
    if folders {
        walker = walker.max_depth(1);
    }

    walker
        .into_iter()
        .filter_entry(|entry| !(exclude_hidden && hidden_below_root(entry)))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(
                    target: "ingest::scan",
                    root = %root.display(),
                    error = %err,
                    "skipping unreadable entry"
                );
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir() == folders)
        .map(DirEntry::into_path)
        .collect()
}

/// Async wrapper over [`walk_library`] with the context's name filters
/// applied up front.
pub async fn discover(ctx: &IngestContext) -> Result<Vec<PathBuf>> {
    let root = ctx.library.path.clone();
    let folders = ctx.library.folders;
    let exclude_hidden = ctx.library.exclude_hidden;
    let mut paths = spawn_blocking(move || walk_library(&root, folders, exclude_hidden))
        .await
        .map_err(|err| SluiceError::Internal(format!("library walk panicked: {err}")))?;
    paths.retain(|path| ctx.filter.admits_path(path, folders));
    paths.sort();
    Ok(paths)
}
