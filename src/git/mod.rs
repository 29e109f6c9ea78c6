//! Narrow gateway over the git binary.
//!
//! The store, capture engine and preflight checks only talk to git through
//! the [`GitOps`] trait. [`SystemGit`] shells out to `git`; tests substitute
//! their own implementation to inject failures.

mod classify;
mod ops;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::process::Deadline;

pub use classify::classify_output;
pub use ops::{parse_porcelain, StatusSummary, SystemGit};

/// Options for a single clone.
#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    /// Shallow-clone depth; 0 clones full history.
    pub depth: u32,
}

/// The git capability set the workspace store depends on.
pub trait GitOps: Send + Sync {
    fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        opts: &CloneOptions,
        deadline: &Deadline,
    ) -> Result<(), GitError>;

    fn checkout(&self, repo: &Path, reference: &str, deadline: &Deadline) -> Result<(), GitError>;

    /// Name of the checked-out branch. Fails on a detached HEAD.
    fn current_branch(&self, repo: &Path, deadline: &Deadline) -> Result<String, GitError>;

    fn rev_parse(&self, repo: &Path, reference: &str, deadline: &Deadline)
        -> Result<String, GitError>;

    /// Raw `git status --porcelain` output.
    fn status_porcelain(&self, repo: &Path, deadline: &Deadline) -> Result<String, GitError>;
}

/// Coarse classification of a failed git invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitFailureKind {
    RepositoryNotFound,
    AuthenticationFailed,
    NetworkError,
    RefNotFound,
    /// The subprocess was killed because the deadline passed.
    Cancelled,
    Unclassified,
}

impl GitFailureKind {
    pub fn hint(self) -> &'static str {
        match self {
            Self::RepositoryNotFound => "check the repository URL or path",
            Self::AuthenticationFailed => "check credentials or SSH keys for this remote",
            Self::NetworkError => "check network connectivity to the remote host",
            Self::RefNotFound => "check that the branch, tag or commit exists",
            Self::Cancelled => "the operation was cancelled or ran past its deadline",
            Self::Unclassified => "see git output for details",
        }
    }
}

impl fmt::Display for GitFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RepositoryNotFound => "repository not found",
            Self::AuthenticationFailed => "authentication failed",
            Self::NetworkError => "network error",
            Self::RefNotFound => "ref not found",
            Self::Cancelled => "cancelled",
            Self::Unclassified => "git error",
        };
        f.write_str(s)
    }
}

/// A failed git invocation. `output` is the subprocess's combined output,
/// kept verbatim.
#[derive(Debug, Clone, Error)]
#[error("git {operation} failed ({kind}; hint: {}): {}", .kind.hint(), .output.trim())]
pub struct GitError {
    pub operation: String,
    pub kind: GitFailureKind,
    pub output: String,
}

impl GitError {
    pub fn new(operation: impl Into<String>, output: impl Into<String>) -> Self {
        let output = output.into();
        Self {
            operation: operation.into(),
            kind: classify_output(&output),
            output,
        }
    }

    pub fn with_kind(
        operation: impl Into<String>,
        kind: GitFailureKind,
        output: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            kind,
            output: output.into(),
        }
    }

    pub fn hint(&self) -> &'static str {
        self.kind.hint()
    }
}

/// Check if a path looks like a git working tree (has a `.git` entry).
pub fn is_git_repo(path: &Path) -> bool {
    path.join(".git").exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_keeps_raw_output_and_classification() {
        let raw = "fatal: repository 'https://example.invalid/x.git/' not found\n";
        let err = GitError::new("clone", raw);
        assert_eq!(err.kind, GitFailureKind::RepositoryNotFound);
        assert_eq!(err.output, raw);
        let msg = err.to_string();
        assert!(msg.contains("git clone failed"));
        assert!(msg.contains("check the repository URL"));
        assert!(msg.contains("https://example.invalid/x.git/"));
    }

    #[test]
    fn is_git_repo_checks_dot_git() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!is_git_repo(tmp.path()));
        std::fs::create_dir(tmp.path().join(".git")).unwrap();
        assert!(is_git_repo(tmp.path()));
    }
}
