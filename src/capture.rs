//! Captures: write-once snapshots of each repository's git state, plus the
//! preflight check and checkout-based apply that consume them.
//!
//! Captures live under `<workspace>/.workshed/captures/<ulid>/capture.json`.
//! ULIDs sort by creation time, so directory order is history order.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{EntityKind, Error, IoContext, Result};
use crate::ids::next_ulid;
use crate::git::{is_git_repo, parse_porcelain, GitFailureKind};
use crate::process::Deadline;
use crate::workspace::hooks;
use crate::workspace::store::{read_json, write_json_atomic};
use crate::workspace::{Store, Workspace};

const CAPTURES_DIR: &str = "captures";
const CAPTURE_FILE: &str = "capture.json";

/// State of a single repository at capture time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitRef {
    pub repository: String,
    /// The branch name (None if detached HEAD)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Full commit SHA
    pub commit: String,
    pub dirty: bool,
    /// Raw `git status --porcelain` output
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, String>,
}

/// A complete workspace capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    pub id: String,
    pub handle: String,
    #[serde(default)]
    pub name: String,
    /// Caller-defined category, e.g. `checkpoint` or `pre-refactor`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub created_at: DateTime<Utc>,
    /// One entry per repository, in workspace order at capture time.
    pub git_state: Vec<GitRef>,
    #[serde(default)]
    pub metadata: CaptureMetadata,
}

/// Input to [`Store::capture_state`].
#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    pub name: String,
    pub kind: Option<String>,
    pub description: String,
    pub tags: Vec<String>,
    pub custom: BTreeMap<String, String>,
}

impl CaptureOptions {
    fn has_intent(&self) -> bool {
        self.kind.as_deref().is_some_and(|k| !k.trim().is_empty())
            || !self.description.trim().is_empty()
            || self.tags.iter().any(|t| !t.trim().is_empty())
    }
}

/// Why a repository cannot take part in an apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreflightReason {
    MissingRepository,
    NotAGitRepository,
    DirtyWorkingTree,
    CheckoutFailed,
    HeadMismatch,
}

impl fmt::Display for PreflightReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MissingRepository => "missing_repository",
            Self::NotAGitRepository => "not_a_git_repository",
            Self::DirtyWorkingTree => "dirty_working_tree",
            Self::CheckoutFailed => "checkout_failed",
            Self::HeadMismatch => "head_mismatch",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightError {
    pub repository: String,
    pub reason: PreflightReason,
    pub details: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightCheck {
    pub repository: String,
    pub valid: bool,
}

/// Outcome of checking a capture against the workspace as it is now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyPreflightResult {
    pub valid: bool,
    pub checks: Vec<PreflightCheck>,
    pub errors: Vec<PreflightError>,
}

impl ApplyPreflightResult {
    pub fn is_repository_valid(&self, repository: &str) -> bool {
        self.checks
            .iter()
            .any(|c| c.repository == repository && c.valid)
    }

    /// One line naming every failing repository.
    pub fn summary(&self) -> String {
        if self.errors.is_empty() {
            return "all repositories ready".to_string();
        }
        self.errors
            .iter()
            .map(|e| format!("{}: {} ({})", e.repository, e.reason, e.details))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub capture_id: String,
    pub handle: String,
    /// Repositories moved to their captured commit, in order.
    pub applied: Vec<String>,
}

impl Store {
    /// Record the current commit, branch and dirty state of every
    /// repository. At least one of kind, description or tag is required.
    pub fn capture_state(
        &self,
        handle: &str,
        opts: CaptureOptions,
        deadline: &Deadline,
    ) -> Result<Capture> {
        if !opts.has_intent() {
            return Err(Error::Validation(
                "a capture needs a kind, description or tag".to_string(),
            ));
        }
        let ws = self.get(handle)?;
        Error::check_deadline(deadline, "capture")?;

        let mut git_state = Vec::with_capacity(ws.repositories.len());
        for repo in &ws.repositories {
            let path = ws.repository_path(&repo.name);
            if !is_git_repo(&path) {
                return Err(Error::Validation(format!(
                    "repository '{}' is not a git repository: {}",
                    repo.name,
                    path.display()
                )));
            }
            let commit = self.git().rev_parse(&path, "HEAD", deadline)?;
            let branch = match self.git().current_branch(&path, deadline) {
                Ok(branch) => Some(branch),
                Err(e) if e.kind == GitFailureKind::Cancelled => return Err(e.into()),
                Err(e) => {
                    log::debug!("{}: no current branch: {e}", repo.name);
                    None
                }
            };
            let status = self.git().status_porcelain(&path, deadline)?;
            git_state.push(GitRef {
                repository: repo.name.clone(),
                branch,
                commit,
                dirty: parse_porcelain(&status).dirty,
                status,
            });
        }

        let capture = Capture {
            id: next_ulid().to_string(),
            handle: ws.handle.clone(),
            name: opts.name.trim().to_string(),
            kind: opts.kind.filter(|k| !k.trim().is_empty()),
            created_at: Utc::now(),
            git_state,
            metadata: CaptureMetadata {
                description: opts.description,
                tags: opts.tags,
                custom: opts.custom,
            },
        };

        let dir = ws.state_dir().join(CAPTURES_DIR).join(&capture.id);
        fs::create_dir_all(&dir).io_context(|| format!("creating {}", dir.display()))?;
        if let Err(err) = write_json_atomic(&dir.join(CAPTURE_FILE), &capture) {
            return Err(err.with_cleanup(fs::remove_dir_all(&dir)));
        }
        log::info!("captured {} repositories of {} as {}", capture.git_state.len(), ws.handle, capture.id);

        hooks::fire_post_capture(&self.config().hooks, &ws, &capture.id);
        Ok(capture)
    }

    /// All readable captures of a workspace, newest first.
    pub fn list_captures(&self, handle: &str) -> Result<Vec<Capture>> {
        let ws = self.get(handle)?;
        let dir = ws.state_dir().join(CAPTURES_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(format!("reading {}", dir.display()), e)),
        };

        let mut captures = Vec::new();
        for entry in entries {
            let entry = entry.io_context(|| format!("reading {}", dir.display()))?;
            let id = entry.file_name().to_string_lossy().to_string();
            match read_json::<Capture>(&entry.path().join(CAPTURE_FILE), EntityKind::Capture, &id) {
                Ok(capture) => captures.push(capture),
                Err(e) => log::debug!("skipping capture {id}: {e}"),
            }
        }
        captures.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(captures)
    }

    pub fn get_capture(&self, handle: &str, capture_id: &str) -> Result<Capture> {
        let ws = self.get(handle)?;
        self.load_capture(&ws, capture_id)
    }

    fn load_capture(&self, ws: &Workspace, capture_id: &str) -> Result<Capture> {
        if capture_id.parse::<Ulid>().is_err() {
            return Err(Error::Validation(format!(
                "invalid capture id '{capture_id}'"
            )));
        }
        let path = ws
            .state_dir()
            .join(CAPTURES_DIR)
            .join(capture_id)
            .join(CAPTURE_FILE);
        read_json(&path, EntityKind::Capture, capture_id)
    }

    /// Check whether every captured repository could be checked out now.
    /// Never mutates anything.
    pub fn preflight_apply(
        &self,
        handle: &str,
        capture_id: &str,
        deadline: &Deadline,
    ) -> Result<ApplyPreflightResult> {
        let ws = self.get(handle)?;
        let capture = self.load_capture(&ws, capture_id)?;
        self.preflight(&ws, &capture, deadline)
    }

    fn preflight(
        &self,
        ws: &Workspace,
        capture: &Capture,
        deadline: &Deadline,
    ) -> Result<ApplyPreflightResult> {
        Error::check_deadline(deadline, "preflight")?;
        let mut checks = Vec::with_capacity(capture.git_state.len());
        let mut errors = Vec::new();

        for git_ref in &capture.git_state {
            let failure = self.check_repository(ws, git_ref, deadline)?;
            checks.push(PreflightCheck {
                repository: git_ref.repository.clone(),
                valid: failure.is_none(),
            });
            if let Some((reason, details)) = failure {
                errors.push(PreflightError {
                    repository: git_ref.repository.clone(),
                    reason,
                    details,
                });
            }
        }

        Ok(ApplyPreflightResult {
            valid: errors.is_empty(),
            checks,
            errors,
        })
    }

    fn check_repository(
        &self,
        ws: &Workspace,
        git_ref: &GitRef,
        deadline: &Deadline,
    ) -> Result<Option<(PreflightReason, String)>> {
        if ws.repository(&git_ref.repository).is_none() {
            return Ok(Some((
                PreflightReason::MissingRepository,
                "no longer part of the workspace".to_string(),
            )));
        }
        let path = ws.repository_path(&git_ref.repository);
        if !is_git_repo(&path) {
            return Ok(Some((
                PreflightReason::NotAGitRepository,
                format!("{} has no .git", path.display()),
            )));
        }
        match self.git().status_porcelain(&path, deadline) {
            Ok(status) => {
                let summary = parse_porcelain(&status);
                if summary.dirty {
                    let mut details = format!("{} modified", summary.modified_files.len());
                    if summary.untracked_count > 0 {
                        details.push_str(&format!(", {} untracked", summary.untracked_count));
                    }
                    return Ok(Some((PreflightReason::DirtyWorkingTree, details)));
                }
                Ok(None)
            }
            Err(e) if e.kind == GitFailureKind::Cancelled => Err(e.into()),
            Err(e) => Ok(Some((PreflightReason::NotAGitRepository, e.to_string()))),
        }
    }

    /// Check out each captured commit, in capture order.
    ///
    /// Not transactional: if a checkout fails partway, repositories before
    /// it stay at their captured commit and the error lists them.
    pub fn apply_capture(
        &self,
        handle: &str,
        capture_id: &str,
        deadline: &Deadline,
    ) -> Result<ApplyResult> {
        let ws = self.get(handle)?;
        let capture = self.load_capture(&ws, capture_id)?;
        let preflight = self.preflight(&ws, &capture, deadline)?;
        if !preflight.valid {
            return Err(Error::Preflight(preflight));
        }

        let mut applied = Vec::with_capacity(capture.git_state.len());
        for git_ref in &capture.git_state {
            let path = ws.repository_path(&git_ref.repository);
            let failed = |reason, details: String| Error::ApplyFailed {
                repository: git_ref.repository.clone(),
                commit: git_ref.commit.clone(),
                reason,
                applied: applied.clone(),
                details,
            };

            if let Err(e) = self.git().checkout(&path, &git_ref.commit, deadline) {
                return Err(failed(PreflightReason::CheckoutFailed, e.to_string()));
            }
            match self.git().rev_parse(&path, "HEAD", deadline) {
                Ok(head) if head == git_ref.commit => {}
                Ok(head) => {
                    return Err(failed(
                        PreflightReason::HeadMismatch,
                        format!("HEAD is {head}"),
                    ));
                }
                Err(e) => return Err(failed(PreflightReason::HeadMismatch, e.to_string())),
            }
            log::debug!("{}: checked out {}", git_ref.repository, git_ref.commit);
            applied.push(git_ref.repository.clone());
        }

        log::info!("applied capture {} to {}", capture.id, ws.handle);
        Ok(ApplyResult {
            capture_id: capture.id,
            handle: ws.handle,
            applied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::test_support::{commit_file, git, init_repo_at, FakeGit};
    use crate::workspace::CreateOptions;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, StoreConfig, Workspace) {
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("work");
        init_repo_at(&work.join("fixture"));
        init_repo_at(&work.join("second"));
        // Distinct histories, so the two repositories never share a SHA.
        commit_file(&work.join("second"), "second.txt", "second\n");
        let config = StoreConfig::new(tmp.path().join("store"), &work);
        let ws = Store::new(config.clone())
            .create(
                CreateOptions {
                    purpose: "captures".to_string(),
                    repositories: vec!["./fixture".to_string(), "./second".to_string()],
                    ..CreateOptions::default()
                },
                &Deadline::none(),
            )
            .unwrap();
        for repo in ["fixture", "second"] {
            let dir = ws.repository_path(repo);
            git(&dir, &["config", "user.email", "test@test.com"]);
            git(&dir, &["config", "user.name", "Test"]);
        }
        (tmp, config, ws)
    }

    fn checkpoint(description: &str) -> CaptureOptions {
        CaptureOptions {
            name: "cp".to_string(),
            description: description.to_string(),
            ..CaptureOptions::default()
        }
    }

    fn head(dir: &Path) -> String {
        let out = std::process::Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(dir)
            .output()
            .unwrap();
        String::from_utf8(out.stdout).unwrap().trim().to_string()
    }

    #[test]
    fn capture_requires_intent() {
        let (_tmp, config, ws) = setup();
        let store = Store::new(config);
        let err = store
            .capture_state(&ws.handle, CaptureOptions::default(), &Deadline::none())
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let tagged = CaptureOptions {
            tags: vec!["wip".to_string()],
            ..CaptureOptions::default()
        };
        assert!(store.capture_state(&ws.handle, tagged, &Deadline::none()).is_ok());
    }

    #[test]
    fn capture_records_state_and_lists_newest_first() {
        let (_tmp, config, ws) = setup();
        let store = Store::new(config);

        let first = store
            .capture_state(&ws.handle, checkpoint("before"), &Deadline::none())
            .unwrap();
        assert_eq!(first.git_state.len(), 2);
        assert_eq!(first.git_state[0].repository, "fixture");
        assert_eq!(first.git_state[0].commit, head(&ws.repository_path("fixture")));
        assert!(first.git_state[0].branch.is_some());
        assert!(!first.git_state[0].dirty);

        std::fs::write(ws.repository_path("second").join("scratch.txt"), "x").unwrap();
        let second = store
            .capture_state(&ws.handle, checkpoint("after"), &Deadline::none())
            .unwrap();
        assert!(second.git_state[1].dirty);
        assert!(second.git_state[1].status.contains("scratch.txt"));

        let listed: Vec<String> = store
            .list_captures(&ws.handle)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(listed, vec![second.id.clone(), first.id.clone()]);
        assert_eq!(store.get_capture(&ws.handle, &first.id).unwrap(), first);
    }

    #[test]
    fn get_capture_errors() {
        let (_tmp, config, ws) = setup();
        let store = Store::new(config);
        assert!(matches!(
            store.get_capture(&ws.handle, "../../etc").unwrap_err(),
            Error::Validation(_)
        ));
        let unknown = Ulid::new().to_string();
        assert!(store.get_capture(&ws.handle, &unknown).unwrap_err().is_not_found());
        assert!(store.list_captures(&ws.handle).unwrap().is_empty());
    }

    #[test]
    fn preflight_flags_only_the_dirty_repository() {
        let (_tmp, config, ws) = setup();
        let store = Store::new(config);
        let capture = store
            .capture_state(&ws.handle, checkpoint("clean"), &Deadline::none())
            .unwrap();
        std::fs::write(ws.repository_path("fixture").join("README.md"), "edited\n").unwrap();

        let result = store
            .preflight_apply(&ws.handle, &capture.id, &Deadline::none())
            .unwrap();
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].repository, "fixture");
        assert_eq!(result.errors[0].reason, PreflightReason::DirtyWorkingTree);
        assert!(!result.is_repository_valid("fixture"));
        assert!(result.is_repository_valid("second"));

        let err = store
            .apply_capture(&ws.handle, &capture.id, &Deadline::none())
            .unwrap_err();
        assert!(matches!(err, Error::Preflight(_)));
        assert!(err.to_string().contains("dirty_working_tree"));
    }

    #[test]
    fn preflight_accumulates_missing_and_non_git() {
        let (_tmp, config, ws) = setup();
        let store = Store::new(config);
        let capture = store
            .capture_state(&ws.handle, checkpoint("both"), &Deadline::none())
            .unwrap();
        store.remove_repository(&ws.handle, "second").unwrap();
        std::fs::remove_dir_all(ws.repository_path("fixture").join(".git")).unwrap();

        let result = store
            .preflight_apply(&ws.handle, &capture.id, &Deadline::none())
            .unwrap();
        let reasons: Vec<_> = result.errors.iter().map(|e| e.reason).collect();
        assert_eq!(
            reasons,
            [PreflightReason::NotAGitRepository, PreflightReason::MissingRepository]
        );
    }

    #[test]
    fn apply_restores_captured_commits() {
        let (_tmp, config, ws) = setup();
        let store = Store::new(config);
        let fixture = ws.repository_path("fixture");
        let capture = store
            .capture_state(&ws.handle, checkpoint("base"), &Deadline::none())
            .unwrap();
        let base = head(&fixture);

        commit_file(&fixture, "later.txt", "later\n");
        assert_ne!(head(&fixture), base);

        let result = store
            .apply_capture(&ws.handle, &capture.id, &Deadline::none())
            .unwrap();
        assert_eq!(result.applied, ["fixture", "second"]);
        assert_eq!(head(&fixture), base);
    }

    #[test]
    fn checkout_failure_mid_apply_reports_progress() {
        let (_tmp, config, ws) = setup();
        let capture = Store::new(config.clone())
            .capture_state(&ws.handle, checkpoint("base"), &Deadline::none())
            .unwrap();
        let fixture = ws.repository_path("fixture");
        let second = ws.repository_path("second");
        let fixture_base = head(&fixture);
        commit_file(&fixture, "a.txt", "a\n");
        commit_file(&second, "b.txt", "b\n");
        let second_moved = head(&second);

        let fake = Arc::new(FakeGit::default().fail_checkout_of(&capture.git_state[1].commit));
        let store = Store::with_git(config, fake.clone());
        let err = store
            .apply_capture(&ws.handle, &capture.id, &Deadline::none())
            .unwrap_err();

        match err {
            Error::ApplyFailed {
                repository,
                reason,
                applied,
                ..
            } => {
                assert_eq!(repository, "second");
                assert_eq!(reason, PreflightReason::CheckoutFailed);
                assert_eq!(applied, ["fixture"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fake.checkouts().len(), 2);
        assert_eq!(head(&fixture), fixture_base);
        assert_eq!(head(&second), second_moved);
    }

    #[test]
    fn capture_hook_runs() {
        let (tmp, mut config, ws) = setup();
        let marker = tmp.path().join("hook.json");
        config.hooks.post_capture = Some(format!("cat > '{}'", marker.display()));
        let capture = Store::new(config)
            .capture_state(&ws.handle, checkpoint("hooked"), &Deadline::none())
            .unwrap();
        let payload: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(marker).unwrap()).unwrap();
        assert_eq!(payload["capture_id"], capture.id);
    }
}
