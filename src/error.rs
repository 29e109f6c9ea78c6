//! Error taxonomy for store, capture and exec operations.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::capture::{ApplyPreflightResult, PreflightReason};
use crate::exec::ExecResult;
use crate::git::{GitError, GitFailureKind};
use crate::process::Deadline;

pub type Result<T> = std::result::Result<T, Error>;

/// What a not-found error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Workspace,
    Repository,
    Capture,
    Execution,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workspace => write!(f, "workspace"),
            Self::Repository => write!(f, "repository"),
            Self::Capture => write!(f, "capture"),
            Self::Execution => write!(f, "execution"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Empty or malformed caller input.
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// Duplicate repository URL/name, or a handle that already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corrupt metadata in {}: {source}", .path.display())]
    CorruptMetadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Git(GitError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("apply preflight failed: {}", .0.summary())]
    Preflight(ApplyPreflightResult),

    /// Checkout failed partway through an apply. Repositories listed in
    /// `applied` were already moved; the rest were not touched.
    #[error("apply failed at repository '{repository}' ({reason}, target {commit}): {details}; already applied: [{}]", .applied.join(", "))]
    ApplyFailed {
        repository: String,
        commit: String,
        reason: PreflightReason,
        applied: Vec<String>,
        details: String,
    },

    /// A command exited non-zero. `results` holds every result collected
    /// up to and including the failing one.
    #[error("command failed in '{repository}' with exit code {exit_code}")]
    ExecFailed {
        repository: String,
        exit_code: i32,
        results: Vec<ExecResult>,
    },

    #[error("could not generate a unique handle after {0} attempts")]
    HandleExhausted(usize),

    #[error("operation cancelled or deadline exceeded: {0}")]
    Cancelled(String),

    #[error("{source} (cleanup also failed: {cleanup})")]
    WithCleanup {
        source: Box<Error>,
        cleanup: std::io::Error,
    },
}

impl From<GitError> for Error {
    fn from(err: GitError) -> Self {
        match err.kind {
            GitFailureKind::Cancelled => Error::Cancelled(err.to_string()),
            _ => Error::Git(err),
        }
    }
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Attach a failed cleanup to an error without losing the original.
    pub(crate) fn with_cleanup(self, cleanup: std::io::Result<()>) -> Self {
        match cleanup {
            Ok(()) => self,
            Err(cleanup) => Error::WithCleanup {
                source: Box::new(self),
                cleanup,
            },
        }
    }

    /// Fail fast when the caller's deadline has already passed.
    pub(crate) fn check_deadline(deadline: &Deadline, what: &str) -> Result<()> {
        if deadline.is_expired() {
            return Err(Error::Cancelled(what.to_string()));
        }
        Ok(())
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::WithCleanup { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

/// Extension for attaching a short description to io results.
pub(crate) trait IoContext<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::io(f(), e))
    }
}
