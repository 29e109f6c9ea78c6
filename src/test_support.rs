//! Fixtures shared by unit tests: throwaway git repositories and a git
//! double that injects failures.

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Mutex;

use crate::git::{CloneOptions, GitError, GitFailureKind, GitOps, SystemGit};
use crate::process::Deadline;

pub(crate) fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert!(status.success(), "git {args:?} failed in {}", dir.display());
}

/// A fresh repository with one committed `README.md`.
pub(crate) fn init_repo() -> tempfile::TempDir {
    let tmp = tempfile::tempdir().unwrap();
    init_repo_at(tmp.path());
    tmp
}

pub(crate) fn init_repo_at(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    git(dir, &["init", "-q"]);
    git(dir, &["config", "user.email", "test@test.com"]);
    git(dir, &["config", "user.name", "Test"]);
    commit_file(dir, "README.md", "# Test\n");
}

pub(crate) fn commit_file(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).unwrap();
    git(dir, &["add", name]);
    git(dir, &["commit", "-q", "-m", &format!("add {name}")]);
}

/// Delegates to the real git binary unless told to fail.
#[derive(Default)]
pub(crate) struct FakeGit {
    inner: SystemGit,
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    fail_clone_containing: Option<String>,
    fail_checkout_of: Option<String>,
    clones: Vec<String>,
    checkouts: Vec<String>,
}

impl FakeGit {
    pub(crate) fn fail_clone_of(self, url_fragment: &str) -> Self {
        self.state.lock().unwrap().fail_clone_containing = Some(url_fragment.to_string());
        self
    }

    pub(crate) fn fail_checkout_of(self, reference: &str) -> Self {
        self.state.lock().unwrap().fail_checkout_of = Some(reference.to_string());
        self
    }

    pub(crate) fn clones(&self) -> Vec<String> {
        self.state.lock().unwrap().clones.clone()
    }

    pub(crate) fn checkouts(&self) -> Vec<String> {
        self.state.lock().unwrap().checkouts.clone()
    }
}

impl GitOps for FakeGit {
    fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        opts: &CloneOptions,
        deadline: &Deadline,
    ) -> Result<(), GitError> {
        {
            let mut state = self.state.lock().unwrap();
            state.clones.push(url.to_string());
            if let Some(fragment) = &state.fail_clone_containing {
                if url.contains(fragment.as_str()) {
                    return Err(GitError::new(
                        "clone",
                        "fatal: unable to access 'x': Could not resolve host: example.invalid",
                    ));
                }
            }
        }
        self.inner.clone_repo(url, dest, opts, deadline)
    }

    fn checkout(&self, repo: &Path, reference: &str, deadline: &Deadline) -> Result<(), GitError> {
        {
            let mut state = self.state.lock().unwrap();
            state.checkouts.push(reference.to_string());
            if state.fail_checkout_of.as_deref() == Some(reference) {
                return Err(GitError::with_kind(
                    "checkout",
                    GitFailureKind::Unclassified,
                    "fatal: injected checkout failure",
                ));
            }
        }
        self.inner.checkout(repo, reference, deadline)
    }

    fn current_branch(&self, repo: &Path, deadline: &Deadline) -> Result<String, GitError> {
        self.inner.current_branch(repo, deadline)
    }

    fn rev_parse(
        &self,
        repo: &Path,
        reference: &str,
        deadline: &Deadline,
    ) -> Result<String, GitError> {
        self.inner.rev_parse(repo, reference, deadline)
    }

    fn status_porcelain(&self, repo: &Path, deadline: &Deadline) -> Result<String, GitError> {
        self.inner.status_porcelain(repo, deadline)
    }
}
