//! `git` subprocess implementation of [`GitOps`].

use std::path::Path;
use std::time::Duration;

use super::{CloneOptions, GitError, GitFailureKind, GitOps};
use crate::process::{run_separated, CmdOutput, Deadline};

// Never let git block on an interactive credential prompt.
const GIT_ENV: &[(&str, &str)] = &[("GIT_TERMINAL_PROMPT", "0")];

/// Runs the `git` binary found on `PATH`.
#[derive(Debug, Clone, Default)]
pub struct SystemGit {
    /// Upper bound for any single git invocation, on top of the caller's
    /// deadline.
    timeout: Option<Duration>,
    /// Extra environment for every invocation, e.g. `GIT_SSH_COMMAND`.
    envs: Vec<(String, String)>,
}

impl SystemGit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            envs: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn run(
        &self,
        operation: &str,
        args: &[&str],
        cwd: Option<&Path>,
        deadline: &Deadline,
    ) -> Result<CmdOutput, GitError> {
        let deadline = deadline.narrowed(self.timeout);
        log::debug!("git {}", args.join(" "));
        let envs: Vec<(&str, &str)> = self
            .envs
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain(GIT_ENV.iter().copied())
            .collect();
        let out = run_separated("git", args, cwd, &envs, &deadline)
            .map_err(|e| GitError::with_kind(operation, GitFailureKind::Unclassified, e.to_string()))?;
        if out.timed_out() {
            return Err(GitError::with_kind(
                operation,
                GitFailureKind::Cancelled,
                out.output,
            ));
        }
        if !out.success() {
            return Err(GitError::new(operation, out.output));
        }
        Ok(out)
    }
}

impl GitOps for SystemGit {
    fn clone_repo(
        &self,
        url: &str,
        dest: &Path,
        opts: &CloneOptions,
        deadline: &Deadline,
    ) -> Result<(), GitError> {
        let depth = opts.depth.to_string();
        let dest = dest.to_string_lossy();
        let mut args = vec!["clone", "--quiet"];
        if opts.depth > 0 {
            args.extend(["--depth", depth.as_str()]);
        }
        args.extend(["--", url, &*dest]);
        self.run("clone", &args, None, deadline).map(|_| ())
    }

    fn checkout(&self, repo: &Path, reference: &str, deadline: &Deadline) -> Result<(), GitError> {
        self.run(
            "checkout",
            &[
                "-c",
                "advice.detachedHead=false",
                "checkout",
                "--quiet",
                reference,
            ],
            Some(repo),
            deadline,
        )
        .map(|_| ())
    }

    fn current_branch(&self, repo: &Path, deadline: &Deadline) -> Result<String, GitError> {
        let out = self.run(
            "symbolic-ref",
            &["symbolic-ref", "--short", "HEAD"],
            Some(repo),
            deadline,
        )?;
        let branch = out.stdout.trim().to_string();
        if branch.is_empty() {
            return Err(GitError::with_kind(
                "symbolic-ref",
                GitFailureKind::RefNotFound,
                "HEAD is not on a branch",
            ));
        }
        Ok(branch)
    }

    fn rev_parse(
        &self,
        repo: &Path,
        reference: &str,
        deadline: &Deadline,
    ) -> Result<String, GitError> {
        let out = self.run(
            "rev-parse",
            &["rev-parse", "--verify", "--quiet", reference],
            Some(repo),
            deadline,
        )?;
        Ok(out.stdout.trim().to_string())
    }

    fn status_porcelain(&self, repo: &Path, deadline: &Deadline) -> Result<String, GitError> {
        let out = self.run("status", &["status", "--porcelain"], Some(repo), deadline)?;
        Ok(out.stdout)
    }
}

/// Parsed `git status --porcelain` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSummary {
    pub dirty: bool,
    pub modified_files: Vec<String>,
    pub untracked_count: usize,
}

pub fn parse_porcelain(output: &str) -> StatusSummary {
    let mut modified_files = Vec::new();
    let mut untracked_count = 0;

    // "XY filename": index and work-tree codes, a space, then the path.
    for line in output.lines() {
        if line.len() < 3 {
            continue;
        }
        let status = &line[..2];
        let file = &line[3..];

        if status == "??" {
            untracked_count += 1;
        } else if !file.is_empty() {
            // Renames are reported as "old -> new".
            let name = file.split(" -> ").last().unwrap_or(file);
            modified_files.push(name.to_string());
        }
    }

    StatusSummary {
        dirty: !modified_files.is_empty() || untracked_count > 0,
        modified_files,
        untracked_count,
    }
}
