pub mod filter;
pub mod memory;
pub mod ports;
#[cfg(feature = "database")]
pub mod postgres;

pub use filter::{
    FileOrdering, FilePredicate, FileQuery, SortField, SortScope, SortTerm,
};
pub use memory::InMemoryFileStore;
pub use ports::FileStore;
#[cfg(feature = "database")]
pub use postgres::{MIGRATOR, PostgresFileStore};
