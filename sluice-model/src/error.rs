use std::fmt::{self, Display};

/// Errors produced by model constructors and validation routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    InvalidSchedule(String),
    InvalidStatus(i32),
    InvalidValue(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidSchedule(msg) => {
                write!(f, "invalid schedule: {msg}")
            }
            ModelError::InvalidStatus(code) => {
                write!(f, "unknown file status code {code}")
            }
            ModelError::InvalidValue(msg) => write!(f, "invalid value: {msg}"),
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
