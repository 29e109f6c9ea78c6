//! Types for workspace management.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};

/// Metadata file at the top of every workspace directory.
pub const METADATA_FILE: &str = ".workshed.json";
/// Per-workspace state directory holding captures and execution records.
pub const STATE_DIR: &str = ".workshed";
/// Prefix of provisional directories created under the store root.
pub const TEMP_PREFIX: &str = ".workshed-tmp-";
pub const METADATA_VERSION: u32 = 1;

// ==================== Persisted Types ====================

/// A workspace as recorded in `<handle>/.workshed.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub version: u32,
    pub handle: String,
    pub purpose: String,
    /// Insertion order is significant: exec fans out in this order.
    pub repositories: Vec<Repository>,
    pub created_at: DateTime<Utc>,
    /// Derived from store root + handle; never persisted.
    #[serde(skip)]
    pub path: PathBuf,
}

impl Workspace {
    pub fn repository(&self, name: &str) -> Option<&Repository> {
        self.repositories.iter().find(|r| r.name == name)
    }

    pub fn repository_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    pub(crate) fn state_dir(&self) -> PathBuf {
        self.path.join(STATE_DIR)
    }
}

/// One cloned repository inside a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Remote URL, or the absolute path of a local source repository.
    pub url: String,
    /// Branch, tag or commit checked out after cloning. Empty means the
    /// clone's default.
    #[serde(rename = "ref", default, skip_serializing_if = "String::is_empty")]
    pub reference: String,
    /// Subdirectory name; unique within the workspace.
    pub name: String,
    /// Shallow-clone depth; 0 means full history.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub depth: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

// ==================== Operation Options ====================

/// Input to [`Store::create`](crate::Store::create).
#[derive(Clone, Default)]
pub struct CreateOptions {
    pub purpose: String,
    /// Repository strings (`url[@ref][::depth]` or local paths). Empty means
    /// the caller's working directory.
    pub repositories: Vec<String>,
    /// Directory tree copied into the new workspace.
    pub template: Option<PathBuf>,
    /// Values for `{{name}}` placeholders in template contents and paths.
    pub template_vars: BTreeMap<String, String>,
    pub progress: Option<ProgressBar>,
}

/// Input to [`Store::add_repositories`](crate::Store::add_repositories).
#[derive(Clone, Default)]
pub struct AddOptions {
    pub progress: Option<ProgressBar>,
}

/// Filter for [`Store::list`](crate::Store::list).
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Case-insensitive substring matched against `purpose`.
    pub purpose: Option<String>,
}

impl ListFilter {
    pub fn purpose(needle: impl Into<String>) -> Self {
        Self {
            purpose: Some(needle.into()),
        }
    }

    pub(crate) fn matches(&self, ws: &Workspace) -> bool {
        match self.purpose.as_deref() {
            None | Some("") => true,
            Some(needle) => ws
                .purpose
                .to_lowercase()
                .contains(&needle.to_lowercase()),
        }
    }
}

pub(crate) fn metadata_path(dir: &Path) -> PathBuf {
    dir.join(METADATA_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Workspace {
        Workspace {
            version: METADATA_VERSION,
            handle: "swift-falcon-glide".to_string(),
            purpose: "Fix Login Bug".to_string(),
            repositories: vec![Repository {
                url: "https://github.com/org/api.git".to_string(),
                reference: "main".to_string(),
                name: "api".to_string(),
                depth: 0,
            }],
            created_at: Utc::now(),
            path: PathBuf::from("/tmp/root/swift-falcon-glide"),
        }
    }

    #[test]
    fn path_is_not_serialized() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(!json.contains("/tmp/root"));
        assert!(json.contains("\"ref\":\"main\""));
        assert!(!json.contains("depth"));

        let back: Workspace = serde_json::from_str(&json).unwrap();
        assert_eq!(back.path, PathBuf::new());
        assert_eq!(back.repositories, sample().repositories);
    }

    #[test]
    fn empty_ref_is_omitted_and_defaults() {
        let repo: Repository =
            serde_json::from_str(r#"{"url": "/src/app", "name": "app"}"#).unwrap();
        assert!(repo.reference.is_empty());
        assert_eq!(repo.depth, 0);
        let json = serde_json::to_string(&repo).unwrap();
        assert!(!json.contains("ref"));
    }

    #[test]
    fn purpose_filter_is_case_insensitive() {
        let ws = sample();
        assert!(ListFilter::purpose("login").matches(&ws));
        assert!(ListFilter::purpose("LOGIN bug").matches(&ws));
        assert!(!ListFilter::purpose("signup").matches(&ws));
        assert!(ListFilter::default().matches(&ws));
    }
}
