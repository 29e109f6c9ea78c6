//! Repository reference strings and batch validation.
//!
//! Grammar: `<url-or-path>[@<ref>][::<depth>]`. SCP-style SSH URLs
//! (`git@host:org/repo.git@ref`) keep their first `@`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::types::Repository;
use crate::error::{Error, Result};
use crate::git::is_git_repo;

const URL_SCHEMES: &[&str] = &["https://", "http://", "git://", "ssh://", "file://"];

/// A parsed but not yet validated repository string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSpec {
    pub url: String,
    /// Empty when the string carried no `@ref`.
    pub reference: String,
    pub depth: u32,
}

impl std::fmt::Display for RepoSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)?;
        if !self.reference.is_empty() {
            write!(f, "@{}", self.reference)?;
        }
        if self.depth > 0 {
            write!(f, "::{}", self.depth)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for RepoSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Validation(
                "repository URL must not be empty".to_string(),
            ));
        }

        let (rest, depth) = split_depth(s)?;
        let (url, reference) = split_ref(rest);
        if url.is_empty() {
            return Err(Error::Validation(format!(
                "repository '{s}' has an empty URL"
            )));
        }
        Ok(RepoSpec {
            url: url.to_string(),
            reference: reference.to_string(),
            depth,
        })
    }
}

impl From<&Repository> for RepoSpec {
    fn from(r: &Repository) -> Self {
        RepoSpec {
            url: r.url.clone(),
            reference: r.reference.clone(),
            depth: r.depth,
        }
    }
}

fn split_depth(s: &str) -> Result<(&str, u32)> {
    let Some((head, tail)) = s.rsplit_once("::") else {
        return Ok((s, 0));
    };
    if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) {
        let depth = tail
            .parse::<u32>()
            .map_err(|_| Error::Validation(format!("clone depth '{tail}' is out of range")))?;
        return Ok((head, depth));
    }
    // `::` inside a bracketed IPv6 host or a path is not a depth marker.
    if tail.contains('/') || tail.contains(']') {
        return Ok((s, 0));
    }
    Err(Error::Validation(format!(
        "invalid clone depth '{tail}' in '{s}': expected a non-negative integer"
    )))
}

fn split_ref(s: &str) -> (&str, &str) {
    if is_ssh_url(s) {
        // The first `@` belongs to `user@host`; a second one starts the ref.
        let Some(first) = s.find('@') else {
            return (s, "");
        };
        return match s[first + 1..].find('@') {
            Some(i) => (&s[..first + 1 + i], &s[first + 2 + i..]),
            None => (s, ""),
        };
    }
    if let Some(scheme_end) = s.find("://") {
        // Userinfo (`https://user@host/...`) precedes the first path slash;
        // only an `@` after it can introduce a ref.
        let after = scheme_end + 3;
        let path_start = s[after..].find('/').map(|i| after + i);
        return match (path_start, s.rfind('@')) {
            (Some(p), Some(at)) if at > p => (&s[..at], &s[at + 1..]),
            _ => (s, ""),
        };
    }
    match s.rsplit_once('@') {
        Some((url, reference)) => (url, reference),
        None => (s, ""),
    }
}

/// `git@host:path` and other `user@host:path` SCP-style forms.
pub fn is_ssh_url(url: &str) -> bool {
    if url.starts_with("git@") {
        return true;
    }
    if url.contains("://") {
        return false;
    }
    match (url.find('@'), url.find(':')) {
        (Some(at), Some(colon)) => at < colon && !url[..at].contains('/'),
        _ => false,
    }
}

/// Anything that is not a remote URL is treated as a local path.
pub fn is_remote_url(url: &str) -> bool {
    is_ssh_url(url) || URL_SCHEMES.iter().any(|scheme| url.starts_with(scheme))
}

/// Last path segment of a URL or path, without a trailing `.git`.
pub fn derive_name(url: &str) -> String {
    let trimmed = url.trim_end_matches(['/', '\\']);
    let last = trimmed
        .rsplit(['/', '\\', ':'])
        .next()
        .unwrap_or(trimmed);
    last.strip_suffix(".git").unwrap_or(last).to_string()
}

/// Resolve a local path against the caller's invocation directory.
fn resolve_local(url: &str, invocation_dir: &Path) -> Result<PathBuf> {
    let raw = Path::new(url);
    let joined = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        invocation_dir.join(raw)
    };
    if !joined.is_dir() || !is_git_repo(&joined) {
        return Err(Error::Validation(format!(
            "not a git repository: {}",
            joined.display()
        )));
    }
    joined
        .canonicalize()
        .map_err(|e| Error::io(format!("resolving {}", joined.display()), e))
}

/// A spec that passed validation, ready to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedRepo {
    pub(crate) repo: Repository,
    /// Local source path, for local-path repositories.
    pub(crate) local_source: Option<PathBuf>,
}

/// Validate a batch of specs against each other and against `existing`.
///
/// Runs before any filesystem mutation. Reports the first offending entry.
pub(crate) fn validate_batch(
    specs: &[RepoSpec],
    existing: &[Repository],
    invocation_dir: &Path,
) -> Result<Vec<ResolvedRepo>> {
    let mut urls: HashSet<String> = existing.iter().map(|r| r.url.clone()).collect();
    let mut names: HashSet<String> = existing.iter().map(|r| r.name.clone()).collect();
    let mut resolved = Vec::with_capacity(specs.len());

    for spec in specs {
        if spec.url.trim().is_empty() {
            return Err(Error::Validation(
                "repository URL must not be empty".to_string(),
            ));
        }

        let (url, local_source) = if is_remote_url(&spec.url) {
            (spec.url.clone(), None)
        } else {
            let path = resolve_local(&spec.url, invocation_dir)?;
            (path.to_string_lossy().to_string(), Some(path))
        };

        let name = derive_name(&url);
        if name.is_empty() || name == "." || name == ".." || name.starts_with('.') {
            return Err(Error::Validation(format!(
                "cannot derive a repository name from '{}'",
                spec.url
            )));
        }
        if !urls.insert(url.clone()) {
            return Err(Error::Conflict(format!("duplicate repository URL: {url}")));
        }
        if !names.insert(name.clone()) {
            return Err(Error::Conflict(format!(
                "duplicate repository name '{name}' (from {url})"
            )));
        }

        resolved.push(ResolvedRepo {
            repo: Repository {
                url,
                reference: spec.reference.clone(),
                name,
                depth: spec.depth,
            },
            local_source,
        });
    }
    Ok(resolved)
}

pub(crate) fn parse_all<S: AsRef<str>>(inputs: &[S]) -> Result<Vec<RepoSpec>> {
    inputs.iter().map(|s| s.as_ref().parse()).collect()
}
