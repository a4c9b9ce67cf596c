//! Backend-neutral predicate and ordering representation for file queries.
//!
//! The in-memory store evaluates these directly; the Postgres adapter
//! translates them into SQL. Both must agree on semantics, in particular that
//! a scoped sort term yields no key for rows outside its scope and such rows
//! always sort after rows that have a key.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use sluice_model::{
    FileStatus, FileUid, LibraryFile, LibraryId, NodeId, ProcessingOrder,
    WorkerId,
};

/// A boolean condition over a stored [`LibraryFile`].
#[derive(Debug, Clone, PartialEq)]
pub enum FilePredicate {
    All,
    Nothing,
    StatusIs(FileStatus),
    LibraryIn(Vec<LibraryId>),
    UidIn(Vec<FileUid>),
    UidNotIn(Vec<FileUid>),
    /// `hold_until > t`
    HoldAfter(DateTime<Utc>),
    /// `hold_until <= t`
    HoldAtOrBefore(DateTime<Utc>),
    Forced,
    /// `original_size <= n`
    MaxSize(u64),
    /// Unpinned, or pinned to this node.
    AvailableToNode(NodeId),
    NodeIs(NodeId),
    NodeNotIn(Vec<NodeId>),
    WorkerIs(WorkerId),
    And(Vec<FilePredicate>),
    Or(Vec<FilePredicate>),
    Not(Box<FilePredicate>),
}

impl FilePredicate {
    pub fn and(self, other: FilePredicate) -> FilePredicate {
        match (self, other) {
            (FilePredicate::All, other) | (other, FilePredicate::All) => other,
            (FilePredicate::And(mut left), FilePredicate::And(right)) => {
                left.extend(right);
                FilePredicate::And(left)
            }
            (FilePredicate::And(mut left), other) => {
                left.push(other);
                FilePredicate::And(left)
            }
            (this, other) => FilePredicate::And(vec![this, other]),
        }
    }

    pub fn or(self, other: FilePredicate) -> FilePredicate {
        match (self, other) {
            (FilePredicate::Nothing, other) | (other, FilePredicate::Nothing) => {
                other
            }
            (FilePredicate::Or(mut left), other) => {
                left.push(other);
                FilePredicate::Or(left)
            }
            (this, other) => FilePredicate::Or(vec![this, other]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> FilePredicate {
        FilePredicate::Not(Box::new(self))
    }

    pub fn matches(&self, file: &LibraryFile) -> bool {
        match self {
            FilePredicate::All => true,
            FilePredicate::Nothing => false,
            FilePredicate::StatusIs(status) => file.status == *status,
            FilePredicate::LibraryIn(ids) => ids.contains(&file.library_id),
            FilePredicate::UidIn(uids) => uids.contains(&file.uid),
            FilePredicate::UidNotIn(uids) => !uids.contains(&file.uid),
            FilePredicate::HoldAfter(at) => file.hold_until > *at,
            FilePredicate::HoldAtOrBefore(at) => file.hold_until <= *at,
            FilePredicate::Forced => file.is_forced(),
            FilePredicate::MaxSize(max) => file.original_size <= *max,
            FilePredicate::AvailableToNode(node) => file
                .process_on_node
                .is_none_or(|pinned| pinned == *node),
            FilePredicate::NodeIs(node) => file.node_id == Some(*node),
            FilePredicate::NodeNotIn(nodes) => {
                file.node_id.is_none_or(|node| !nodes.contains(&node))
            }
            FilePredicate::WorkerIs(worker) => file.worker_id == Some(*worker),
            FilePredicate::And(parts) => parts.iter().all(|p| p.matches(file)),
            FilePredicate::Or(parts) => parts.iter().any(|p| p.matches(file)),
            FilePredicate::Not(inner) => !inner.matches(file),
        }
    }
}

/// Column a sort term reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    /// `0` for manually ordered files (`order > 0`), `1` otherwise.
    ManualBucket,
    OriginalSize,
    CreationTime,
    DateCreated,
    RelativePath,
    ProcessingStarted,
    ProcessingEnded,
    /// Fresh uniform key per query.
    Random,
}

/// Rows a sort term applies to. Rows outside the scope have no key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortScope {
    All,
    /// Only files with a manual order.
    Manual,
    /// Only unordered files of this library.
    Library(LibraryId),
}

impl SortScope {
    pub fn contains(&self, file: &LibraryFile) -> bool {
        match self {
            SortScope::All => true,
            SortScope::Manual => file.order > 0,
            SortScope::Library(id) => file.order <= 0 && file.library_id == *id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortTerm {
    pub field: SortField,
    pub descending: bool,
    pub scope: SortScope,
}

impl SortTerm {
    pub fn asc(field: SortField) -> Self {
        Self {
            field,
            descending: false,
            scope: SortScope::All,
        }
    }

    pub fn desc(field: SortField) -> Self {
        Self {
            field,
            descending: true,
            scope: SortScope::All,
        }
    }

    pub fn scoped(mut self, scope: SortScope) -> Self {
        self.scope = scope;
        self
    }
}

/// Ordered list of sort terms. The store appends a stable `uid` tie-break.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileOrdering {
    pub terms: Vec<SortTerm>,
}

impl FileOrdering {
    pub fn new(terms: Vec<SortTerm>) -> Self {
        Self { terms }
    }

    pub fn by(term: SortTerm) -> Self {
        Self { terms: vec![term] }
    }

    /// Manual order first, then `date_created` ascending.
    pub fn default_unprocessed() -> Self {
        Self::with_strategies(&[])
    }

    /// Manual order first (by size), then each listed library's own
    /// strategy over its files, then `date_created` ascending.
    ///
    /// Libraries are not interleaved. Every file of the first listed strategy
    /// library sorts ahead of the second's, and `AsFound` libraries come after
    /// all of them. An uncapped strategy library with a backlog therefore
    /// starves the libraries behind it; `max_runners` is what bounds that,
    /// since a library at capacity drops out of eligibility entirely.
    pub fn with_strategies(strategies: &[(LibraryId, ProcessingOrder)]) -> Self {
        let mut terms = vec![
            SortTerm::asc(SortField::ManualBucket),
            SortTerm::asc(SortField::OriginalSize).scoped(SortScope::Manual),
        ];
        for (library_id, order) in strategies {
            let term = match order {
                ProcessingOrder::AsFound => continue,
                ProcessingOrder::Random => SortTerm::asc(SortField::Random),
                ProcessingOrder::SmallestFirst => {
                    SortTerm::asc(SortField::OriginalSize)
                }
                ProcessingOrder::LargestFirst => {
                    SortTerm::desc(SortField::OriginalSize)
                }
                ProcessingOrder::NewestFirst => {
                    SortTerm::desc(SortField::CreationTime)
                }
                ProcessingOrder::OldestFirst => {
                    SortTerm::asc(SortField::CreationTime)
                }
                ProcessingOrder::Alphabetical => {
                    SortTerm::asc(SortField::RelativePath)
                }
            };
            terms.push(term.scoped(SortScope::Library(*library_id)));
        }
        terms.push(SortTerm::asc(SortField::DateCreated));
        Self { terms }
    }

    pub fn uses_random(&self) -> bool {
        self.terms.iter().any(|t| t.field == SortField::Random)
    }
}

/// Sort key for one term of one row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum SortValue {
    Int(i64),
    Time(DateTime<Utc>),
    Text(String),
}

impl SortTerm {
    /// `None` when the row is outside this term's scope. `random` supplies the
    /// per-query key for [`SortField::Random`].
    pub(crate) fn key(
        &self,
        file: &LibraryFile,
        random: u64,
    ) -> Option<SortValue> {
        if !self.scope.contains(file) {
            return None;
        }
        let value = match self.field {
            SortField::ManualBucket => {
                SortValue::Int(if file.order > 0 { 0 } else { 1 })
            }
            SortField::OriginalSize => {
                SortValue::Int(i64::try_from(file.original_size).unwrap_or(i64::MAX))
            }
            SortField::CreationTime => SortValue::Time(file.creation_time),
            SortField::DateCreated => SortValue::Time(file.date_created),
            SortField::RelativePath => SortValue::Text(file.relative_path.clone()),
            SortField::ProcessingStarted => {
                SortValue::Time(file.processing_started)
            }
            SortField::ProcessingEnded => SortValue::Time(file.processing_ended),
            SortField::Random => SortValue::Int((random >> 1) as i64),
        };
        Some(value)
    }
}

/// Compare two optional keys: present keys honour `descending`, missing keys
/// sort last either way.
pub(crate) fn compare_keys(
    left: &Option<SortValue>,
    right: &Option<SortValue>,
    descending: bool,
) -> Ordering {
    match (left, right) {
        (Some(l), Some(r)) => {
            if descending {
                r.cmp(l)
            } else {
                l.cmp(r)
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// A filtered, ordered, paged enumeration request.
#[derive(Debug, Clone, PartialEq)]
pub struct FileQuery {
    pub predicate: FilePredicate,
    pub ordering: FileOrdering,
    pub skip: usize,
    pub take: Option<usize>,
}

impl FileQuery {
    pub fn new(predicate: FilePredicate) -> Self {
        Self {
            predicate,
            ordering: FileOrdering::default(),
            skip: 0,
            take: None,
        }
    }

    pub fn ordered(mut self, ordering: FileOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn page(mut self, skip: usize, take: Option<usize>) -> Self {
        self.skip = skip;
        self.take = take;
        self
    }
}
