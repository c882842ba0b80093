//! Error types for the repo-relay crate.
//!
//! This module defines a unified error enumeration used across revision
//! resolution, transformation, merge import, consistency-file handling and
//! destination writing. It integrates with `thiserror` to provide rich
//! `Display` implementations and error source chaining where applicable.
//!
//! Notes:
//! - Each variant carries contextual details via its message payload.
//! - The binary maps variants to process exit codes; the library never exits.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the repo-relay library.
///
/// - Used across the workflow runner, the transformation pipeline, the merge
///   importer and the origin/destination capability plumbing.
/// - Implements `std::error::Error` via `thiserror`.
pub enum RelayError {
    /// Bad flag or argument arity before any migration started.
    #[error("Command line error: {0}")]
    CommandLine(String),

    /// Configuration cannot be loaded or its types do not match.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The origin cannot map a reference to a revision.
    #[error("Cannot resolve revision: {0}")]
    CannotResolveRevision(String),

    /// Nothing to migrate for the resolved reference.
    #[error("{0}")]
    EmptyChange(String),

    /// A transformation, check or hook produced an invalid result.
    #[error("{0}")]
    Validation(String),

    /// A transformation changed nothing and no ignore-noop policy allowed it.
    #[error("Transformation '{0}' was a no-op. Use --ignore-noop if this is expected")]
    VoidOperation(String),

    /// A `${NAME}` template referenced a label that is not present.
    #[error("Cannot find label '{0}'")]
    LabelNotFound(String),

    /// Origin or destination I/O failure.
    #[error("Repository error: {0}")]
    Repo(String),

    /// The transformed tree left files that do not match `destination_files`.
    #[error("The following files do not match destination_files: [{}]", .0.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    NotADestinationFile(Vec<PathBuf>),

    /// The user answered "no" to an interactive confirmation prompt.
    #[error("Change rejected: {0}")]
    ChangeRejected(String),

    /// External cancellation signal.
    #[error("Migration cancelled")]
    Cancelled,

    /// A user-supplied path resolved outside the checkout root.
    #[error("Path '{path}' escapes the checkout root '{root}'")]
    PathEscapesRoot { path: PathBuf, root: PathBuf },

    /// I/O error from the underlying filesystem.
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
}

impl RelayError {
    /// Validation error with a preformatted message.
    pub fn validation(msg: impl Into<String>) -> Self {
        RelayError::Validation(msg.into())
    }

    /// Repository error with a preformatted message.
    pub fn repo(msg: impl Into<String>) -> Self {
        RelayError::Repo(msg.into())
    }

    /// True when the failure is transient and surfaced as a TEMPORARY_ERROR
    /// effect rather than a plain ERROR.
    pub fn is_temporary(&self) -> bool {
        matches!(self, RelayError::Repo(_))
    }
}
