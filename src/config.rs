//! Store configuration.
//!
//! Everything the store needs is carried by an explicit [`StoreConfig`]
//! value; nothing is read from process-wide state once the store exists.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::workspace::helpers::{parse_duration, read_config_value};

/// Optional per-root config file names, tried in order.
pub const CONFIG_FILES: &[&str] = &[
    ".workshed-config",
    ".workshed-config.json",
    ".workshed-config.yaml",
    ".workshed-config.yml",
];

pub const DEFAULT_REF: &str = "main";

/// Shell commands run after lifecycle events. Each receives a JSON payload
/// on stdin; failures are logged and never fail the operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HookConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_create: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_remove: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_capture: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding one subdirectory per workspace.
    pub root: PathBuf,
    /// The caller's working directory. Relative local repository paths
    /// resolve against it, and it is the implicit repository when `create`
    /// is given none.
    pub invocation_dir: PathBuf,
    /// Ref checked out for remote repositories given without one, and for
    /// local ones whose current branch cannot be detected.
    pub default_ref: String,
    pub git_timeout: Option<Duration>,
    pub exec_timeout: Option<Duration>,
    pub hooks: HookConfig,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>, invocation_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            invocation_dir: invocation_dir.into(),
            default_ref: DEFAULT_REF.to_string(),
            git_timeout: None,
            exec_timeout: None,
            hooks: HookConfig::default(),
        }
    }

    /// Defaults overlaid with the optional config file in `root`.
    pub fn load(root: impl Into<PathBuf>, invocation_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut config = Self::new(root, invocation_dir);
        if let Some(value) = read_config_value(&config.root, CONFIG_FILES) {
            let file: ConfigFile = serde_json::from_value(value).with_context(|| {
                format!("invalid store config in {}", config.root.display())
            })?;
            config.apply(file)?;
        }
        Ok(config)
    }

    fn apply(&mut self, file: ConfigFile) -> Result<()> {
        if let Some(default_ref) = file.default_ref {
            if default_ref.trim().is_empty() {
                anyhow::bail!("default_ref cannot be empty");
            }
            self.default_ref = default_ref;
        }
        if let Some(t) = file.git_timeout {
            self.git_timeout = Some(Duration::from_secs(
                parse_duration(&t).context("invalid git_timeout")?,
            ));
        }
        if let Some(t) = file.exec_timeout {
            self.exec_timeout = Some(Duration::from_secs(
                parse_duration(&t).context("invalid exec_timeout")?,
            ));
        }
        if let Some(hooks) = file.hooks {
            self.hooks = hooks;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// On-disk shape of the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    default_ref: Option<String>,
    git_timeout: Option<String>,
    exec_timeout: Option<String>,
    hooks: Option<HookConfig>,
}
