//! Core data model definitions shared across sluice crates.
#![allow(missing_docs)]

pub use ::chrono;

pub mod error;
pub mod file;
pub mod ids;
pub mod library;
pub mod schedule;
pub mod status;
pub mod time;

pub use error::{ModelError, Result as ModelResult};
pub use file::{ExecutedNode, LibraryFile, Metadata};
pub use ids::{FileUid, FlowId, LibraryId, NodeId, WorkerId};
pub use library::{
    DetectionRange, DetectionRanges, Library, MatchRange, ProcessingOrder,
    ScanMode,
};
pub use schedule::{QUARTERS_PER_WEEK, Schedule};
pub use status::{FileFlags, FileStatus, FileView};
