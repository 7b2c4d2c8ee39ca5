//! Domain errors raised by the packaging pipeline
//!
//! These are wrapped into `anyhow` with context as they propagate; callers that
//! need to branch on the failure can `downcast_ref::<PackageError>()`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("missing built module for runnable {name:?} (expected {path:?}); build it before packaging")]
    MissingModule { name: String, path: PathBuf },

    #[error("function {0:?} is declared in the directive but no runnable provides it")]
    UnknownFunction(String),

    #[error("runnable {0:?} is not declared in the directive")]
    UndeclaredRunnable(String),

    #[error("runnable {name:?} is defined by both {first:?} and {second:?}")]
    DuplicateRunnable {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("invalid appVersion {value:?}: {reason}")]
    InvalidVersion { value: String, reason: String },

    #[error("bundle entry {0:?} would be written twice")]
    DuplicateEntry(String),
}
