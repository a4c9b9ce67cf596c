use async_trait::async_trait;
use sluice_model::{FileStatus, FileUid, LibraryFile, WorkerId};

use crate::database::filter::{FilePredicate, FileQuery};
use crate::error::Result;

/// Persistent store of [`LibraryFile`] records.
///
/// Every write path normalizes dates before persisting. `update_one` is a full
/// record replace so status and ownership always change together.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn insert_one(&self, file: &LibraryFile) -> Result<()>;

    /// Insert several records. Default implementation inserts one by one.
    /// Transactional backends should override this to insert atomically.
    async fn insert_many(&self, files: &[LibraryFile]) -> Result<()> {
        for file in files {
            self.insert_one(file).await?;
        }
        Ok(())
    }

    /// Replace the stored record with the same uid.
    async fn update_one(&self, file: &LibraryFile) -> Result<()>;

    async fn get_by_uid(&self, uid: FileUid) -> Result<Option<LibraryFile>>;

    /// Lookup by absolute path.
    async fn get_by_path(&self, name: &str) -> Result<Option<LibraryFile>>;

    /// Oldest non-duplicate record whose `fingerprint` or `final_fingerprint`
    /// equals `fingerprint`. An empty fingerprint never matches.
    async fn get_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<LibraryFile>>;

    /// Returns the number of records removed.
    async fn delete_by_uids(&self, uids: &[FileUid]) -> Result<u64>;

    /// Replace the record only if its stored status still equals `expected`.
    /// Returns `false` when nothing was written (lost race or missing row).
    async fn conditional_update_status(
        &self,
        uid: FileUid,
        expected: FileStatus,
        record: &LibraryFile,
    ) -> Result<bool>;

    /// Replace the record only while it is `Processing` and owned by `worker`.
    async fn conditional_update_owned(
        &self,
        uid: FileUid,
        worker: WorkerId,
        record: &LibraryFile,
    ) -> Result<bool>;

    async fn query(&self, query: &FileQuery) -> Result<Vec<LibraryFile>>;

    async fn count(&self, predicate: &FilePredicate) -> Result<u64>;
}
