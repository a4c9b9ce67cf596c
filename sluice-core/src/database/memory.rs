use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sluice_model::{FileStatus, FileUid, LibraryFile, WorkerId};
use tokio::sync::RwLock;

use crate::database::filter::{FilePredicate, FileQuery, compare_keys};
use crate::database::ports::FileStore;
use crate::error::{Result, SluiceError};

/// In-process [`FileStore`] used by tests and by servers without a database.
///
/// Conditional updates run under the write lock, which gives the same
/// per-record atomicity the Postgres adapter gets from its `WHERE` clause.
#[derive(Clone, Default)]
pub struct InMemoryFileStore {
    files: Arc<RwLock<HashMap<FileUid, LibraryFile>>>,
}

impl fmt::Debug for InMemoryFileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryFileStore");
        match self.files.try_read() {
            Ok(files) => {
                debug.field("file_count", &files.len());
            }
            Err(_) => {
                debug.field("files", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn insert_one(&self, file: &LibraryFile) -> Result<()> {
        let mut files = self.files.write().await;
        if files.contains_key(&file.uid) {
            return Err(SluiceError::InvalidState(format!(
                "file {} already exists",
                file.uid
            )));
        }
        files.insert(file.uid, file.clone().normalized());
        Ok(())
    }

    async fn insert_many(&self, batch: &[LibraryFile]) -> Result<()> {
        let mut files = self.files.write().await;
        if let Some(existing) = batch.iter().find(|f| files.contains_key(&f.uid)) {
            return Err(SluiceError::InvalidState(format!(
                "file {} already exists",
                existing.uid
            )));
        }
        for file in batch {
            files.insert(file.uid, file.clone().normalized());
        }
        Ok(())
    }

    async fn update_one(&self, file: &LibraryFile) -> Result<()> {
        let mut files = self.files.write().await;
        match files.get_mut(&file.uid) {
            Some(slot) => {
                *slot = file.clone().normalized();
                Ok(())
            }
            None => Err(SluiceError::NotFound(format!("file {}", file.uid))),
        }
    }

    async fn get_by_uid(&self, uid: FileUid) -> Result<Option<LibraryFile>> {
        Ok(self.files.read().await.get(&uid).cloned())
    }

    async fn get_by_path(&self, name: &str) -> Result<Option<LibraryFile>> {
        let files = self.files.read().await;
        Ok(files
            .values()
            .filter(|f| f.name == name)
            .min_by_key(|f| (f.date_created, f.uid.to_uuid()))
            .cloned())
    }

    async fn get_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<LibraryFile>> {
        if fingerprint.is_empty() {
            return Ok(None);
        }
        let files = self.files.read().await;
        Ok(files
            .values()
            .filter(|f| f.status != FileStatus::Duplicate)
            .filter(|f| {
                f.fingerprint == fingerprint || f.final_fingerprint == fingerprint
            })
            .min_by_key(|f| (f.date_created, f.uid.to_uuid()))
            .cloned())
    }

    async fn delete_by_uids(&self, uids: &[FileUid]) -> Result<u64> {
        let mut files = self.files.write().await;
        let removed = uids.iter().filter(|uid| files.remove(uid).is_some()).count();
        Ok(removed as u64)
    }

    async fn conditional_update_status(
        &self,
        uid: FileUid,
        expected: FileStatus,
        record: &LibraryFile,
    ) -> Result<bool> {
        let mut files = self.files.write().await;
        match files.get_mut(&uid) {
            Some(slot) if slot.status == expected => {
                *slot = record.clone().normalized();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn conditional_update_owned(
        &self,
        uid: FileUid,
        worker: WorkerId,
        record: &LibraryFile,
    ) -> Result<bool> {
        let mut files = self.files.write().await;
        match files.get_mut(&uid) {
            Some(slot)
                if slot.status == FileStatus::Processing
                    && slot.worker_id == Some(worker) =>
            {
                *slot = record.clone().normalized();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn query(&self, query: &FileQuery) -> Result<Vec<LibraryFile>> {
        let files = self.files.read().await;
        let mut matched: Vec<(u64, &LibraryFile)> = files
            .values()
            .filter(|f| query.predicate.matches(f))
            .map(|f| {
                let random = if query.ordering.uses_random() {
                    rand::random::<u64>()
                } else {
                    0
                };
                (random, f)
            })
            .collect();

        matched.sort_by(|(ra, a), (rb, b)| {
            for term in &query.ordering.terms {
                let ordering = compare_keys(
                    &term.key(a, *ra),
                    &term.key(b, *rb),
                    term.descending,
                );
                if ordering.is_ne() {
                    return ordering;
                }
            }
            a.uid.to_uuid().cmp(&b.uid.to_uuid())
        });

        let take = query.take.unwrap_or(usize::MAX);
        Ok(matched
            .into_iter()
            .skip(query.skip)
            .take(take)
            .map(|(_, f)| f.clone())
            .collect())
    }

    async fn count(&self, predicate: &FilePredicate) -> Result<u64> {
        let files = self.files.read().await;
        Ok(files.values().filter(|f| predicate.matches(f)).count() as u64)
    }
}
