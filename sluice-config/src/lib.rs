//! # sluice-config
//!
//! Loads the server configuration (bind address, database, ingest and claim
//! tuning, known nodes and libraries) and validates it into runtime
//! [`Library`](sluice_model::Library) values.
//!
//! ```no_run
//! use sluice_config::ConfigLoader;
//!
//! # fn main() -> anyhow::Result<()> {
//! let load = ConfigLoader::new().load()?;
//! println!("{} libraries from {:?}", load.libraries.len(), load.source);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;
pub mod models;
pub mod validation;

pub use error::{ConfigError, ConfigErrors};
pub use loader::{ConfigLoad, ConfigLoader, ConfigSource, load_from_file, parse_from_str};
pub use models::{
    DatabaseConfig, LibraryDefinition, NodeDefinition, ServerConfig, SluiceConfig,
    library::derived_library_id,
};
pub use validation::validate;
