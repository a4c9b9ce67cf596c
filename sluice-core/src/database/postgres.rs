//! Postgres-backed [`FileStore`].
//!
//! Queries are built at runtime with [`QueryBuilder`] from the shared
//! [`FilePredicate`] / [`FileOrdering`] representation. Claims rely on the
//! conditional `UPDATE ... WHERE uid = $1 AND status = $2` affecting exactly
//! one row.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_model::{
    ExecutedNode, FileFlags, FileStatus, FileUid, LibraryFile, Metadata,
    WorkerId,
};
use sqlx::migrate::Migrator;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::filter::{
    FileOrdering, FilePredicate, FileQuery, SortField, SortScope,
};
use crate::database::ports::FileStore;
use crate::error::{Result, SluiceError};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const SELECT_COLUMNS: &str = "SELECT uid, name, relative_path, status, flags, \
     is_directory, fingerprint, final_fingerprint, original_size, final_size, \
     creation_time, last_write_time, date_created, date_modified, hold_until, \
     processing_started, processing_ended, library_id, library_name, flow_id, \
     flow_name, node_id, node_name, worker_id, process_on_node, output_path, \
     duplicate_uid, duplicate_name, failure_reason, executed_nodes, \
     original_metadata, final_metadata, sort_order FROM library_files";

#[derive(Clone)]
pub struct PostgresFileStore {
    pool: PgPool,
}

impl fmt::Debug for PostgresFileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresFileStore")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresFileStore {
    /// Wrap `pool` after a connectivity check.
    pub async fn new(pool: PgPool) -> Result<Self> {
        sqlx::query("SELECT 1").execute(&pool).await.map_err(|e| {
            SluiceError::Internal(format!(
                "file store failed Postgres health check: {e}"
            ))
        })?;
        info!(target: "store::postgres", "file store connected to Postgres");
        Ok(Self { pool })
    }

    /// Apply embedded migrations.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.map_err(|e| {
            SluiceError::Internal(format!("migration failed: {e}"))
        })?;
        info!(target: "store::postgres", "migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_optional(
        &self,
        mut builder: QueryBuilder<'_, Postgres>,
    ) -> Result<Option<LibraryFile>> {
        let row = builder
            .build_query_as::<FileRow>()
            .fetch_optional(&self.pool)
            .await?;
        row.map(LibraryFile::try_from).transpose()
    }

    async fn execute_update(
        &self,
        mut builder: QueryBuilder<'_, Postgres>,
    ) -> Result<bool> {
        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl FileStore for PostgresFileStore {
    async fn insert_one(&self, file: &LibraryFile) -> Result<()> {
        self.insert_many(std::slice::from_ref(file)).await
    }

    async fn insert_many(&self, files: &[LibraryFile]) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        let rows: Vec<FileRow> =
            files.iter().map(|f| FileRow::from(&f.clone().normalized())).collect();
        let mut builder = insert_builder(rows);
        let mut tx = self.pool.begin().await?;
        builder.build().execute(&mut *tx).await?;
        tx.commit().await?;
        debug!(target: "store::postgres", count = files.len(), "inserted files");
        Ok(())
    }

    async fn update_one(&self, file: &LibraryFile) -> Result<()> {
        let mut builder = update_builder(file);
        builder.push(" WHERE uid = ").push_bind(file.uid.to_uuid());
        if self.execute_update(builder).await? {
            Ok(())
        } else {
            Err(SluiceError::NotFound(format!("file {}", file.uid)))
        }
    }

    async fn get_by_uid(&self, uid: FileUid) -> Result<Option<LibraryFile>> {
        let mut builder = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
        builder.push(" WHERE uid = ").push_bind(uid.to_uuid());
        self.fetch_optional(builder).await
    }

    async fn get_by_path(&self, name: &str) -> Result<Option<LibraryFile>> {
        let mut builder = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
        builder
            .push(" WHERE name = ")
            .push_bind(name.to_string())
            .push(" ORDER BY date_created ASC, uid ASC LIMIT 1");
        self.fetch_optional(builder).await
    }

    async fn get_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<LibraryFile>> {
        if fingerprint.is_empty() {
            return Ok(None);
        }
        let mut builder = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
        builder
            .push(" WHERE status <> ")
            .push_bind(FileStatus::Duplicate.code())
            .push(" AND (fingerprint = ")
            .push_bind(fingerprint.to_string())
            .push(" OR final_fingerprint = ")
            .push_bind(fingerprint.to_string())
            .push(") ORDER BY date_created ASC, uid ASC LIMIT 1");
        self.fetch_optional(builder).await
    }

    async fn delete_by_uids(&self, uids: &[FileUid]) -> Result<u64> {
        if uids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Uuid> = uids.iter().map(FileUid::to_uuid).collect();
        let result = sqlx::query("DELETE FROM library_files WHERE uid = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn conditional_update_status(
        &self,
        uid: FileUid,
        expected: FileStatus,
        record: &LibraryFile,
    ) -> Result<bool> {
        let mut builder = update_builder(record);
        builder
            .push(" WHERE uid = ")
            .push_bind(uid.to_uuid())
            .push(" AND status = ")
            .push_bind(expected.code());
        self.execute_update(builder).await
    }

    async fn conditional_update_owned(
        &self,
        uid: FileUid,
        worker: WorkerId,
        record: &LibraryFile,
    ) -> Result<bool> {
        let mut builder = update_builder(record);
        builder
            .push(" WHERE uid = ")
            .push_bind(uid.to_uuid())
            .push(" AND status = ")
            .push_bind(FileStatus::Processing.code())
            .push(" AND worker_id = ")
            .push_bind(worker.to_uuid());
        self.execute_update(builder).await
    }

    async fn query(&self, query: &FileQuery) -> Result<Vec<LibraryFile>> {
        let mut builder = select_builder(query);
        let rows = builder
            .build_query_as::<FileRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(LibraryFile::try_from).collect()
    }

    async fn count(&self, predicate: &FilePredicate) -> Result<u64> {
        let mut builder =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM library_files WHERE ");
        push_predicate(&mut builder, predicate);
        let count: i64 = builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

fn select_builder(query: &FileQuery) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::<Postgres>::new(SELECT_COLUMNS);
    builder.push(" WHERE ");
    push_predicate(&mut builder, &query.predicate);
    push_ordering(&mut builder, &query.ordering);
    builder
        .push(" OFFSET ")
        .push_bind(i64::try_from(query.skip).unwrap_or(i64::MAX));
    if let Some(take) = query.take {
        builder
            .push(" LIMIT ")
            .push_bind(i64::try_from(take).unwrap_or(i64::MAX));
    }
    builder
}

fn push_uuid_list(
    builder: &mut QueryBuilder<'static, Postgres>,
    column: &str,
    ids: Vec<Uuid>,
) {
    builder
        .push(column)
        .push(" = ANY(")
        .push_bind(ids)
        .push(")");
}

fn push_predicate(
    builder: &mut QueryBuilder<'static, Postgres>,
    predicate: &FilePredicate,
) {
    match predicate {
        FilePredicate::All => {
            builder.push("TRUE");
        }
        FilePredicate::Nothing => {
            builder.push("FALSE");
        }
        FilePredicate::StatusIs(status) => {
            builder.push("status = ").push_bind(status.code());
        }
        FilePredicate::LibraryIn(ids) if ids.is_empty() => {
            builder.push("FALSE");
        }
        FilePredicate::LibraryIn(ids) => {
            push_uuid_list(
                builder,
                "library_id",
                ids.iter().map(|id| id.to_uuid()).collect(),
            );
        }
        FilePredicate::UidIn(uids) if uids.is_empty() => {
            builder.push("FALSE");
        }
        FilePredicate::UidIn(uids) => {
            push_uuid_list(builder, "uid", uids.iter().map(|u| u.to_uuid()).collect());
        }
        FilePredicate::UidNotIn(uids) if uids.is_empty() => {
            builder.push("TRUE");
        }
        FilePredicate::UidNotIn(uids) => {
            builder.push("NOT (");
            push_uuid_list(builder, "uid", uids.iter().map(|u| u.to_uuid()).collect());
            builder.push(")");
        }
        FilePredicate::HoldAfter(at) => {
            builder.push("hold_until > ").push_bind(*at);
        }
        FilePredicate::HoldAtOrBefore(at) => {
            builder.push("hold_until <= ").push_bind(*at);
        }
        FilePredicate::Forced => {
            builder
                .push("(flags & ")
                .push_bind(FileFlags::forced().bits())
                .push(") <> 0");
        }
        FilePredicate::MaxSize(max) => {
            builder
                .push("original_size <= ")
                .push_bind(i64::try_from(*max).unwrap_or(i64::MAX));
        }
        FilePredicate::AvailableToNode(node) => {
            builder
                .push("(process_on_node IS NULL OR process_on_node = ")
                .push_bind(node.to_uuid())
                .push(")");
        }
        FilePredicate::NodeIs(node) => {
            builder.push("node_id = ").push_bind(node.to_uuid());
        }
        FilePredicate::NodeNotIn(nodes) if nodes.is_empty() => {
            builder.push("TRUE");
        }
        FilePredicate::NodeNotIn(nodes) => {
            builder.push("(node_id IS NULL OR NOT (");
            push_uuid_list(
                builder,
                "node_id",
                nodes.iter().map(|n| n.to_uuid()).collect(),
            );
            builder.push("))");
        }
        FilePredicate::WorkerIs(worker) => {
            builder.push("worker_id = ").push_bind(worker.to_uuid());
        }
        FilePredicate::And(parts) => push_joined(builder, parts, " AND ", "TRUE"),
        FilePredicate::Or(parts) => push_joined(builder, parts, " OR ", "FALSE"),
        FilePredicate::Not(inner) => {
            builder.push("NOT (");
            push_predicate(builder, inner);
            builder.push(")");
        }
    }
}

fn push_joined(
    builder: &mut QueryBuilder<'static, Postgres>,
    parts: &[FilePredicate],
    separator: &str,
    empty: &str,
) {
    if parts.is_empty() {
        builder.push(empty);
        return;
    }
    builder.push("(");
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            builder.push(separator);
        }
        push_predicate(builder, part);
    }
    builder.push(")");
}

fn sort_expression(field: SortField) -> &'static str {
    match field {
        SortField::ManualBucket => "CASE WHEN sort_order > 0 THEN 0 ELSE 1 END",
        SortField::OriginalSize => "original_size",
        SortField::CreationTime => "creation_time",
        SortField::DateCreated => "date_created",
        SortField::RelativePath => "relative_path",
        SortField::ProcessingStarted => "processing_started",
        SortField::ProcessingEnded => "processing_ended",
        SortField::Random => "random()",
    }
}

fn push_ordering(
    builder: &mut QueryBuilder<'static, Postgres>,
    ordering: &FileOrdering,
) {
    builder.push(" ORDER BY ");
    for term in &ordering.terms {
        let expression = sort_expression(term.field);
        match term.scope {
            SortScope::All => {
                builder.push(expression);
            }
            SortScope::Manual => {
                builder
                    .push("CASE WHEN sort_order > 0 THEN ")
                    .push(expression)
                    .push(" END");
            }
            SortScope::Library(library_id) => {
                builder
                    .push("CASE WHEN sort_order <= 0 AND library_id = ")
                    .push_bind(library_id.to_uuid())
                    .push(" THEN ")
                    .push(expression)
                    .push(" END");
            }
        }
        if term.descending {
            builder.push(" DESC NULLS LAST, ");
        } else {
            builder.push(" ASC NULLS LAST, ");
        }
    }
    builder.push("uid ASC");
}

fn insert_builder(rows: Vec<FileRow>) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO library_files (uid, name, relative_path, status, flags, \
         is_directory, fingerprint, final_fingerprint, original_size, final_size, \
         creation_time, last_write_time, date_created, date_modified, hold_until, \
         processing_started, processing_ended, library_id, library_name, flow_id, \
         flow_name, node_id, node_name, worker_id, process_on_node, output_path, \
         duplicate_uid, duplicate_name, failure_reason, executed_nodes, \
         original_metadata, final_metadata, sort_order) ",
    );
    builder.push_values(rows, |mut b, row| {
        b.push_bind(row.uid)
            .push_bind(row.name)
            .push_bind(row.relative_path)
            .push_bind(row.status)
            .push_bind(row.flags)
            .push_bind(row.is_directory)
            .push_bind(row.fingerprint)
            .push_bind(row.final_fingerprint)
            .push_bind(row.original_size)
            .push_bind(row.final_size)
            .push_bind(row.creation_time)
            .push_bind(row.last_write_time)
            .push_bind(row.date_created)
            .push_bind(row.date_modified)
            .push_bind(row.hold_until)
            .push_bind(row.processing_started)
            .push_bind(row.processing_ended)
            .push_bind(row.library_id)
            .push_bind(row.library_name)
            .push_bind(row.flow_id)
            .push_bind(row.flow_name)
            .push_bind(row.node_id)
            .push_bind(row.node_name)
            .push_bind(row.worker_id)
            .push_bind(row.process_on_node)
            .push_bind(row.output_path)
            .push_bind(row.duplicate_uid)
            .push_bind(row.duplicate_name)
            .push_bind(row.failure_reason)
            .push_bind(row.executed_nodes)
            .push_bind(row.original_metadata)
            .push_bind(row.final_metadata)
            .push_bind(row.sort_order);
    });
    builder
}

/// `UPDATE library_files SET <every column>`; caller appends the `WHERE`.
fn update_builder(file: &LibraryFile) -> QueryBuilder<'static, Postgres> {
    let row = FileRow::from(&file.clone().normalized());
    let mut builder = QueryBuilder::<Postgres>::new("UPDATE library_files SET ");
    let mut set = builder.separated(", ");
    set.push("name = ").push_bind_unseparated(row.name);
    set.push("relative_path = ").push_bind_unseparated(row.relative_path);
    set.push("status = ").push_bind_unseparated(row.status);
    set.push("flags = ").push_bind_unseparated(row.flags);
    set.push("is_directory = ").push_bind_unseparated(row.is_directory);
    set.push("fingerprint = ").push_bind_unseparated(row.fingerprint);
    set.push("final_fingerprint = ")
        .push_bind_unseparated(row.final_fingerprint);
    set.push("original_size = ").push_bind_unseparated(row.original_size);
    set.push("final_size = ").push_bind_unseparated(row.final_size);
    set.push("creation_time = ").push_bind_unseparated(row.creation_time);
    set.push("last_write_time = ")
        .push_bind_unseparated(row.last_write_time);
    set.push("date_created = ").push_bind_unseparated(row.date_created);
    set.push("date_modified = ").push_bind_unseparated(row.date_modified);
    set.push("hold_until = ").push_bind_unseparated(row.hold_until);
    set.push("processing_started = ")
        .push_bind_unseparated(row.processing_started);
    set.push("processing_ended = ")
        .push_bind_unseparated(row.processing_ended);
    set.push("library_id = ").push_bind_unseparated(row.library_id);
    set.push("library_name = ").push_bind_unseparated(row.library_name);
    set.push("flow_id = ").push_bind_unseparated(row.flow_id);
    set.push("flow_name = ").push_bind_unseparated(row.flow_name);
    set.push("node_id = ").push_bind_unseparated(row.node_id);
    set.push("node_name = ").push_bind_unseparated(row.node_name);
    set.push("worker_id = ").push_bind_unseparated(row.worker_id);
    set.push("process_on_node = ")
        .push_bind_unseparated(row.process_on_node);
    set.push("output_path = ").push_bind_unseparated(row.output_path);
    set.push("duplicate_uid = ").push_bind_unseparated(row.duplicate_uid);
    set.push("duplicate_name = ").push_bind_unseparated(row.duplicate_name);
    set.push("failure_reason = ").push_bind_unseparated(row.failure_reason);
    set.push("executed_nodes = ").push_bind_unseparated(row.executed_nodes);
    set.push("original_metadata = ")
        .push_bind_unseparated(row.original_metadata);
    set.push("final_metadata = ").push_bind_unseparated(row.final_metadata);
    set.push("sort_order = ").push_bind_unseparated(row.sort_order);
    builder
}

#[derive(Debug, FromRow)]
struct FileRow {
    uid: Uuid,
    name: String,
    relative_path: String,
    status: i32,
    flags: i32,
    is_directory: bool,
    fingerprint: String,
    final_fingerprint: String,
    original_size: i64,
    final_size: i64,
    creation_time: DateTime<Utc>,
    last_write_time: DateTime<Utc>,
    date_created: DateTime<Utc>,
    date_modified: DateTime<Utc>,
    hold_until: DateTime<Utc>,
    processing_started: DateTime<Utc>,
    processing_ended: DateTime<Utc>,
    library_id: Uuid,
    library_name: String,
    flow_id: Option<Uuid>,
    flow_name: Option<String>,
    node_id: Option<Uuid>,
    node_name: Option<String>,
    worker_id: Option<Uuid>,
    process_on_node: Option<Uuid>,
    output_path: Option<String>,
    duplicate_uid: Option<Uuid>,
    duplicate_name: Option<String>,
    failure_reason: Option<String>,
    executed_nodes: Json<Vec<ExecutedNode>>,
    original_metadata: Json<Metadata>,
    final_metadata: Json<Metadata>,
    sort_order: i32,
}

impl From<&LibraryFile> for FileRow {
    fn from(file: &LibraryFile) -> Self {
        Self {
            uid: file.uid.to_uuid(),
            name: file.name.clone(),
            relative_path: file.relative_path.clone(),
            status: file.status.code(),
            flags: file.flags.bits(),
            is_directory: file.is_directory,
            fingerprint: file.fingerprint.clone(),
            final_fingerprint: file.final_fingerprint.clone(),
            original_size: i64::try_from(file.original_size).unwrap_or(i64::MAX),
            final_size: i64::try_from(file.final_size).unwrap_or(i64::MAX),
            creation_time: file.creation_time,
            last_write_time: file.last_write_time,
            date_created: file.date_created,
            date_modified: file.date_modified,
            hold_until: file.hold_until,
            processing_started: file.processing_started,
            processing_ended: file.processing_ended,
            library_id: file.library_id.to_uuid(),
            library_name: file.library_name.clone(),
            flow_id: file.flow_id.map(|id| id.to_uuid()),
            flow_name: file.flow_name.clone(),
            node_id: file.node_id.map(|id| id.to_uuid()),
            node_name: file.node_name.clone(),
            worker_id: file.worker_id.map(|id| id.to_uuid()),
            process_on_node: file.process_on_node.map(|id| id.to_uuid()),
            output_path: file.output_path.clone(),
            duplicate_uid: file.duplicate_uid.map(|id| id.to_uuid()),
            duplicate_name: file.duplicate_name.clone(),
            failure_reason: file.failure_reason.clone(),
            executed_nodes: Json(file.executed_nodes.clone()),
            original_metadata: Json(file.original_metadata.clone()),
            final_metadata: Json(file.final_metadata.clone()),
            sort_order: file.order,
        }
    }
}

impl TryFrom<FileRow> for LibraryFile {
    type Error = SluiceError;

    fn try_from(row: FileRow) -> Result<Self> {
        Ok(LibraryFile {
            uid: row.uid.into(),
            name: row.name,
            relative_path: row.relative_path,
            status: FileStatus::from_code(row.status)?,
            flags: FileFlags::from_bits(row.flags),
            is_directory: row.is_directory,
            fingerprint: row.fingerprint,
            final_fingerprint: row.final_fingerprint,
            original_size: u64::try_from(row.original_size).unwrap_or(0),
            final_size: u64::try_from(row.final_size).unwrap_or(0),
            creation_time: row.creation_time,
            last_write_time: row.last_write_time,
            date_created: row.date_created,
            date_modified: row.date_modified,
            hold_until: row.hold_until,
            processing_started: row.processing_started,
            processing_ended: row.processing_ended,
            library_id: row.library_id.into(),
            library_name: row.library_name,
            flow_id: row.flow_id.map(Into::into),
            flow_name: row.flow_name,
            node_id: row.node_id.map(Into::into),
            node_name: row.node_name,
            worker_id: row.worker_id.map(Into::into),
            process_on_node: row.process_on_node.map(Into::into),
            output_path: row.output_path,
            duplicate_uid: row.duplicate_uid.map(Into::into),
            duplicate_name: row.duplicate_name,
            failure_reason: row.failure_reason,
            executed_nodes: row.executed_nodes.0,
            original_metadata: row.original_metadata.0,
            final_metadata: row.final_metadata.0,
            order: row.sort_order,
        }
        .normalized())
    }
}
