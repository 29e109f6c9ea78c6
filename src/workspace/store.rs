//! The workspace store: on-disk layout, the atomic create protocol, and CRUD
//! over workspaces and their repository lists.
//!
//! A workspace only becomes visible under its handle through a single
//! directory rename. Everything before that happens inside a provisional
//! `.workshed-tmp-*` directory that is removed on failure.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use console::style;
use indicatif::ProgressBar;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::helpers::validate_handle;
use super::hooks;
use super::spec::{parse_all, validate_batch, RepoSpec, ResolvedRepo};
use super::template::{copy_template, validate_template};
use super::types::{
    metadata_path, AddOptions, CreateOptions, ListFilter, Repository, Workspace,
    METADATA_VERSION, TEMP_PREFIX,
};
use crate::config::StoreConfig;
use crate::error::{EntityKind, Error, IoContext, Result};
use crate::git::{CloneOptions, GitOps, SystemGit};
use crate::handle::HandleGenerator;
use crate::process::Deadline;

/// Entry point for every workspace operation.
///
/// The store holds no in-memory state about workspaces; every call re-reads
/// from disk, so several stores may share one root.
pub struct Store {
    config: StoreConfig,
    git: Arc<dyn GitOps>,
    handles: HandleGenerator,
}

/// Everything the create protocol needs, shared by `create` and import.
pub(crate) struct CreateRequest<'a> {
    pub(crate) purpose: &'a str,
    pub(crate) specs: Vec<RepoSpec>,
    pub(crate) template: Option<&'a Path>,
    pub(crate) template_vars: &'a BTreeMap<String, String>,
    pub(crate) progress: Option<&'a ProgressBar>,
    /// Use this handle instead of generating one.
    pub(crate) handle: Option<&'a str>,
}

impl Store {
    pub fn new(config: StoreConfig) -> Self {
        let git = Arc::new(SystemGit::with_timeout(config.git_timeout));
        Self::with_git(config, git)
    }

    /// A store that talks to git through `git` instead of the system binary.
    pub fn with_git(config: StoreConfig, git: Arc<dyn GitOps>) -> Self {
        Self {
            config,
            git,
            handles: HandleGenerator::default(),
        }
    }

    pub fn root(&self) -> &Path {
        self.config.root()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn git(&self) -> &dyn GitOps {
        self.git.as_ref()
    }

    /// Where the workspace with `handle` lives, whether or not it exists.
    pub fn workspace_path(&self, handle: &str) -> PathBuf {
        self.root().join(handle)
    }

    pub fn exists(&self, handle: &str) -> bool {
        validate_handle(handle).is_ok() && self.workspace_path(handle).is_dir()
    }

    // ==================== Create ====================

    /// Create a workspace, cloning every repository before it becomes
    /// visible. With no repositories, the invocation directory is used.
    pub fn create(&self, opts: CreateOptions, deadline: &Deadline) -> Result<Workspace> {
        let inputs = if opts.repositories.is_empty() {
            vec![self.config.invocation_dir.to_string_lossy().to_string()]
        } else {
            opts.repositories
        };
        let specs = parse_all(&inputs)?;
        self.create_with(
            CreateRequest {
                purpose: &opts.purpose,
                specs,
                template: opts.template.as_deref(),
                template_vars: &opts.template_vars,
                progress: opts.progress.as_ref(),
                handle: None,
            },
            deadline,
        )
    }

    pub(crate) fn create_with(&self, req: CreateRequest<'_>, deadline: &Deadline) -> Result<Workspace> {
        let purpose = req.purpose.trim();
        if purpose.is_empty() {
            return Err(Error::Validation("purpose must not be empty".to_string()));
        }
        if let Some(template) = req.template {
            validate_template(template)?;
        }
        if let Some(handle) = req.handle {
            validate_handle(handle)?;
        }
        let resolved = validate_batch(&req.specs, &[], &self.config.invocation_dir)?;
        Error::check_deadline(deadline, "create")?;
        let repositories = self.resolve_refs(resolved, deadline);

        fs::create_dir_all(self.root())
            .io_context(|| format!("creating store root {}", self.root().display()))?;

        let handle = match req.handle {
            Some(handle) if self.workspace_path(handle).exists() => {
                return Err(Error::Conflict(format!("workspace '{handle}' already exists")));
            }
            Some(handle) => handle.to_string(),
            None => self
                .handles
                .generate_unique(|h| self.workspace_path(h).exists())?,
        };

        let ws = Workspace {
            version: METADATA_VERSION,
            handle: handle.clone(),
            purpose: purpose.to_string(),
            repositories: repositories.iter().map(|r| r.repo.clone()).collect(),
            created_at: Utc::now(),
            path: self.workspace_path(&handle),
        };

        let tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir_in(self.root())
            .io_context(|| format!("creating temp directory in {}", self.root().display()))?;
        log::debug!("staging workspace {handle} in {}", tmp.path().display());

        if let Err(err) = self.populate(tmp.path(), &ws, &req, deadline) {
            log::debug!("create of {handle} failed, removing {}", tmp.path().display());
            return Err(err.with_cleanup(tmp.close()));
        }

        let staged = tmp.keep();
        if let Err(e) = fs::rename(&staged, &ws.path) {
            let err = if ws.path.exists() {
                Error::Conflict(format!("workspace '{handle}' already exists"))
            } else {
                Error::io(format!("renaming {} into place", staged.display()), e)
            };
            return Err(err.with_cleanup(fs::remove_dir_all(&staged)));
        }
        log::info!("created workspace {handle} with {} repositories", ws.repositories.len());

        hooks::fire_post_create(&self.config.hooks, &ws);
        Ok(ws)
    }

    /// Steps 2 to 4 of the create protocol, all inside the staging directory.
    fn populate(
        &self,
        dir: &Path,
        ws: &Workspace,
        req: &CreateRequest<'_>,
        deadline: &Deadline,
    ) -> Result<()> {
        write_json_atomic(&metadata_path(dir), ws)?;
        if let Some(template) = req.template {
            copy_template(template, dir, req.template_vars)?;
        }
        start_progress(req.progress, ws.repositories.len());
        for repo in &ws.repositories {
            self.clone_into(dir, repo, req.progress, deadline)?;
        }
        finish_progress(req.progress, &ws.handle);
        Ok(())
    }

    /// Fill in refs the caller left empty. Local repositories follow the
    /// source's current branch; everything else gets the configured default.
    fn resolve_refs(&self, resolved: Vec<ResolvedRepo>, deadline: &Deadline) -> Vec<ResolvedRepo> {
        resolved
            .into_iter()
            .map(|mut r| {
                if r.repo.reference.is_empty() {
                    r.repo.reference = match &r.local_source {
                        Some(source) => match self.git.current_branch(source, deadline) {
                            Ok(branch) => branch,
                            Err(e) => {
                                log::debug!(
                                    "cannot detect branch of {}: {e}; using {}",
                                    source.display(),
                                    self.config.default_ref
                                );
                                self.config.default_ref.clone()
                            }
                        },
                        None => self.config.default_ref.clone(),
                    };
                }
                r
            })
            .collect()
    }

    fn clone_into(
        &self,
        dir: &Path,
        repo: &Repository,
        progress: Option<&ProgressBar>,
        deadline: &Deadline,
    ) -> Result<()> {
        Error::check_deadline(deadline, "clone")?;
        let dest = dir.join(&repo.name);
        if dest.exists() {
            return Err(Error::Conflict(format!(
                "directory for repository '{}' already exists",
                repo.name
            )));
        }
        if let Some(pb) = progress {
            pb.set_message(format!("Cloning {}", repo.url));
        }
        log::debug!("cloning {} into {}", repo.url, dest.display());
        self.git
            .clone_repo(&repo.url, &dest, &CloneOptions { depth: repo.depth }, deadline)?;
        if !repo.reference.is_empty() {
            self.git.checkout(&dest, &repo.reference, deadline)?;
        }
        if let Some(pb) = progress {
            pb.inc(1);
        }
        Ok(())
    }

    // ==================== Read ====================

    pub fn get(&self, handle: &str) -> Result<Workspace> {
        validate_handle(handle)?;
        let path = self.workspace_path(handle);
        let mut ws: Workspace = read_json(&metadata_path(&path), EntityKind::Workspace, handle)?;
        if ws.handle != handle {
            log::warn!(
                "metadata in {} names handle '{}'",
                path.display(),
                ws.handle
            );
        }
        ws.path = path;
        Ok(ws)
    }

    /// Every readable workspace under the root, newest first. Entries that
    /// fail to parse are skipped.
    pub fn list(&self, filter: &ListFilter) -> Result<Vec<Workspace>> {
        let entries = match fs::read_dir(self.root()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::io(format!("reading {}", self.root().display()), e));
            }
        };

        let mut workspaces = Vec::new();
        for entry in entries {
            let entry = entry.io_context(|| format!("reading {}", self.root().display()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            match self.get(&name) {
                Ok(ws) if filter.matches(&ws) => workspaces.push(ws),
                Ok(_) => {}
                Err(e) => log::debug!("skipping {name}: {e}"),
            }
        }
        workspaces.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.handle.cmp(&b.handle))
        });
        Ok(workspaces)
    }

    // ==================== Update / Delete ====================

    /// Delete the workspace directory tree. Irreversible.
    pub fn remove(&self, handle: &str) -> Result<()> {
        validate_handle(handle)?;
        let path = self.workspace_path(handle);
        if !path.is_dir() {
            return Err(Error::not_found(EntityKind::Workspace, handle));
        }
        fs::remove_dir_all(&path).io_context(|| format!("removing {}", path.display()))?;
        log::info!("removed workspace {handle}");
        hooks::fire_post_remove(&self.config.hooks, handle, &path);
        Ok(())
    }

    pub fn update_purpose(&self, handle: &str, purpose: &str) -> Result<Workspace> {
        let purpose = purpose.trim();
        if purpose.is_empty() {
            return Err(Error::Validation("purpose must not be empty".to_string()));
        }
        let mut ws = self.get(handle)?;
        ws.purpose = purpose.to_string();
        self.save(&ws)?;
        Ok(ws)
    }

    pub fn add_repository(&self, handle: &str, repository: &str, deadline: &Deadline) -> Result<Workspace> {
        self.add_repositories(handle, &[repository], AddOptions::default(), deadline)
    }

    /// Clone `repositories` into an existing workspace and append them.
    ///
    /// All of them are validated against each other and against what the
    /// workspace already holds before anything is cloned. If any clone fails,
    /// the directories cloned by this call are removed and the metadata is
    /// left as it was.
    pub fn add_repositories<S: AsRef<str>>(
        &self,
        handle: &str,
        repositories: &[S],
        opts: AddOptions,
        deadline: &Deadline,
    ) -> Result<Workspace> {
        if repositories.is_empty() {
            return Err(Error::Validation("no repositories given".to_string()));
        }
        let specs = parse_all(repositories)?;
        let mut ws = self.get(handle)?;
        let resolved = validate_batch(&specs, &ws.repositories, &self.config.invocation_dir)?;
        Error::check_deadline(deadline, "add repositories")?;
        let new: Vec<Repository> = self
            .resolve_refs(resolved, deadline)
            .into_iter()
            .map(|r| r.repo)
            .collect();

        let progress = opts.progress.as_ref();
        start_progress(progress, new.len());
        let mut created: Vec<PathBuf> = Vec::new();
        let mut outcome = Ok(());
        for repo in &new {
            let dest = ws.repository_path(&repo.name);
            let existed = dest.exists();
            outcome = self.clone_into(&ws.path, repo, progress, deadline);
            if !existed {
                created.push(dest);
            }
            if outcome.is_err() {
                break;
            }
        }

        if outcome.is_ok() {
            let mut updated = ws.clone();
            updated.repositories.extend(new.iter().cloned());
            outcome = self.save(&updated);
            if outcome.is_ok() {
                ws = updated;
            }
        }
        if let Err(err) = outcome {
            return Err(err.with_cleanup(rollback(&created)));
        }

        finish_progress(progress, &ws.handle);
        log::info!("added {} repositories to {}", new.len(), ws.handle);
        Ok(ws)
    }

    /// Drop a repository from the workspace. An already-missing directory
    /// is not an error.
    pub fn remove_repository(&self, handle: &str, name: &str) -> Result<Workspace> {
        let mut ws = self.get(handle)?;
        let idx = ws
            .repositories
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| Error::not_found(EntityKind::Repository, name))?;

        let dir = ws.repository_path(name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("{} already gone", dir.display());
            }
            Err(e) => return Err(Error::io(format!("removing {}", dir.display()), e)),
        }
        ws.repositories.remove(idx);
        self.save(&ws)?;
        Ok(ws)
    }

    fn save(&self, ws: &Workspace) -> Result<()> {
        write_json_atomic(&metadata_path(&ws.path), ws)
    }
}

fn rollback(created: &[PathBuf]) -> std::io::Result<()> {
    let mut first_err = None;
    for dir in created {
        match fs::remove_dir_all(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                log::warn!("failed to remove {}: {e}", dir.display());
                first_err.get_or_insert(e);
            }
        }
    }
    first_err.map_or(Ok(()), Err)
}

fn start_progress(progress: Option<&ProgressBar>, count: usize) {
    if let Some(pb) = progress {
        pb.set_length(count as u64);
        pb.set_position(0);
    }
}

fn finish_progress(progress: Option<&ProgressBar>, handle: &str) {
    if let Some(pb) = progress {
        pb.finish_with_message(format!("{} ✓", style(handle).green()));
    }
}

/// Write `value` as indented JSON through a sibling temp file and a rename,
/// so readers never see a half-written file.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let json = serde_json::to_string_pretty(value)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .io_context(|| format!("creating temp file in {}", dir.display()))?;
    tmp.write_all(json.as_bytes())
        .and_then(|()| tmp.write_all(b"\n"))
        .io_context(|| format!("writing {}", path.display()))?;
    tmp.persist(path)
        .map_err(|e| Error::io(format!("writing {}", path.display()), e.error))?;
    Ok(())
}

/// Read a JSON record. A missing file is `NotFound { kind, id }`; a file
/// that does not parse is `CorruptMetadata`.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path, kind: EntityKind, id: &str) -> Result<T> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::not_found(kind, id));
        }
        Err(e) => return Err(Error::io(format!("reading {}", path.display()), e)),
    };
    serde_json::from_str(&content).map_err(|source| Error::CorruptMetadata {
        path: path.to_path_buf(),
        source,
    })
}
