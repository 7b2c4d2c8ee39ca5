//! Error types for directives and bundle archives

use thiserror::Error;

/// Errors that can occur while building, validating, or reading a directive
#[derive(Error, Debug)]
pub enum DirectiveError {
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("identifier must not be empty")]
    EmptyIdentifier,

    #[error("invalid {field} {value:?}: {reason}")]
    InvalidVersion {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("function {0:?} is declared more than once")]
    DuplicateFunction(String),

    #[error("function name {0:?} cannot be used as a module key")]
    InvalidFunctionName(String),

    #[error("bundle is missing entry {0:?}")]
    MissingEntry(String),
}

impl DirectiveError {
    /// Whether this error came from directive validation rather than I/O
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DirectiveError::EmptyIdentifier
                | DirectiveError::InvalidVersion { .. }
                | DirectiveError::DuplicateFunction(_)
                | DirectiveError::InvalidFunctionName(_)
        )
    }
}
