//! Error types for the mergeflow core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from the version-control provider (git2).
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// Neither the index nor the merge parents hold the requested version.
    #[error("no {stage} version of '{path}' is available")]
    StageNotFound {
        path: String,
        stage: String,
    },

    /// No author identity was configured and git config has none either.
    #[error("no author identity configured (set [identity] or git user.name/user.email)")]
    IdentityMissing,

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Conflict errors
// ---------------------------------------------------------------------------

/// Errors from conflict extraction.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// The merge outcome carries no conflict information in a supported shape.
    #[error("no conflict data available: {0}")]
    NoConflictData(String),
}

// ---------------------------------------------------------------------------
// Session errors
// ---------------------------------------------------------------------------

/// Errors surfaced by a merge session's apply / commit / reset operations.
///
/// The engine never retries; every failure is handed back to the caller.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A version of `path` could not be materialized in the working tree.
    #[error("checkout of '{path}' failed: {source}")]
    CheckoutFailure {
        path: String,
        /// Paths that had already been applied before the failure.
        applied: Vec<String>,
        #[source]
        source: GitError,
    },

    /// Staging or committing the resolution failed.
    #[error("commit failed: {0}")]
    CommitFailure(#[source] GitError),

    /// The reset target could not be resolved or the reset itself failed.
    #[error("reset to '{reference}' failed: {source}")]
    ResetFailure {
        reference: String,
        #[source]
        source: GitError,
    },

    /// The session state machine does not allow this operation.
    #[error("invalid session transition from {from} to {to}")]
    InvalidTransition {
        from: String,
        to: String,
    },

    /// Pre-commit validation found conflict markers in manually resolved files.
    #[error("conflict markers remain in: {}", .0.join(", "))]
    UnresolvedMarkers(Vec<String>),

    /// Extraction failed while starting or resuming the session.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// Provider error outside apply / commit / reset (e.g. the merge attempt).
    #[error(transparent)]
    Git(#[from] GitError),
}

impl SessionError {
    /// Whether the working tree may have been partially modified.
    ///
    /// `false` means nothing changed and the operation is safe to retry.
    pub fn is_partial(&self) -> bool {
        match self {
            Self::CheckoutFailure { applied, .. } => !applied.is_empty(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
