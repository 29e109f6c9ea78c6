//! Atomic multi-repository workspaces.
//!
//! A workspace is a directory under a store root holding one clone per
//! repository plus a `.workshed.json` metadata file. [`Store`] creates them
//! atomically, records git state as captures, restores captures, and runs
//! commands across the repositories. Front ends build a [`StoreConfig`],
//! construct a [`Store`] and call into it; this crate never installs a
//! logger or reads process-wide state on its own.

pub mod capture;
pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod git;
pub mod handle;
mod ids;
pub mod process;
pub mod workspace;

#[cfg(test)]
mod test_support;

pub use capture::{
    ApplyPreflightResult, ApplyResult, Capture, CaptureMetadata, CaptureOptions, GitRef,
    PreflightCheck, PreflightError, PreflightReason,
};
pub use config::{HookConfig, StoreConfig};
pub use context::{ImportOptions, WorkspaceContext};
pub use error::{EntityKind, Error, Result};
pub use exec::{ExecOptions, ExecReport, ExecResult, ExecutionRecord};
pub use git::{GitError, GitFailureKind, GitOps, SystemGit};
pub use handle::HandleGenerator;
pub use process::Deadline;
pub use workspace::{
    resolve_store_root, AddOptions, CreateOptions, ListFilter, RepoSpec, Repository, Store,
    Workspace,
};
