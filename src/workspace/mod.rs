//! Workspace management building blocks.
//!
//! Provides types, repository string parsing, the store itself, templates,
//! helpers, and hooks. Front ends (CLI, TUI, tool adapters) call [`Store`].

pub mod helpers;
pub(crate) mod hooks;
pub mod spec;
pub mod store;
pub mod template;
pub mod types;

// Re-export commonly-used types
pub use helpers::{resolve_store_root, validate_handle};
pub use spec::RepoSpec;
pub use store::Store;
pub use types::{AddOptions, CreateOptions, ListFilter, Repository, Workspace};
