use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("library `{name}`: {reason}")]
    Library { name: String, reason: String },

    #[error("library id {id} is used by both `{first}` and `{second}`")]
    DuplicateLibraryId {
        id: String,
        first: String,
        second: String,
    },

    #[error("node id {id} is listed more than once")]
    DuplicateNodeId { id: String },

    #[error("invalid server setting: {0}")]
    Server(String),
}

/// Every problem found in one validation pass.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("configuration has {} problem(s): {}", .0.len(), render(.0))]
pub struct ConfigErrors(pub Vec<ConfigError>);

fn render(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
