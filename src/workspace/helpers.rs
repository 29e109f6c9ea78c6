//! Utility functions for workspace management.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::error::Error;

/// Environment variable overriding the default store root.
pub const ROOT_ENV: &str = "WORKSHED_ROOT";

/// Reject handles that could escape the store root or collide with
/// provisional directories.
pub fn validate_handle(handle: &str) -> crate::Result<()> {
    if handle.is_empty() {
        return Err(Error::Validation("handle cannot be empty".to_string()));
    }
    if handle.starts_with('.') {
        return Err(Error::Validation(format!(
            "invalid handle '{handle}': cannot start with '.'"
        )));
    }
    if handle.contains('/') || handle.contains('\\') {
        return Err(Error::Validation(format!(
            "invalid handle '{handle}': cannot contain path separators"
        )));
    }
    if !handle
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::Validation(format!(
            "invalid handle '{handle}': only ASCII alphanumeric characters, hyphens, and underscores allowed"
        )));
    }
    Ok(())
}

/// Where workspaces live when the caller does not say.
///
/// 1. `WORKSHED_ROOT`
/// 2. `~/.workshed`
pub fn resolve_store_root() -> Result<PathBuf> {
    if let Ok(env_path) = std::env::var(ROOT_ENV) {
        if !env_path.trim().is_empty() {
            return Ok(PathBuf::from(env_path));
        }
    }
    let home = dirs::home_dir().context("cannot determine home directory")?;
    Ok(home.join(".workshed"))
}

/// Read a config file as a JSON value, accepting JSON or YAML.
/// Tries each of `names` under `dir` in order; `None` if none parse.
pub fn read_config_value(dir: &Path, names: &[&str]) -> Option<serde_json::Value> {
    for name in names {
        let path = dir.join(name);
        if !path.is_file() {
            continue;
        }
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("cannot read {}: {e}", path.display());
                continue;
            }
        };
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(&content) {
            return Some(v);
        }
        match serde_yaml_ng::from_str::<serde_json::Value>(&content) {
            Ok(v) => return Some(v),
            Err(e) => log::warn!("ignoring unparseable config {}: {e}", path.display()),
        }
    }
    None
}

/// Parse a human-friendly duration string to seconds.
/// Supported formats: "30s", "5m", "1h", "2d", "1w", or bare seconds "300"
pub fn parse_duration(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        anyhow::bail!("Empty duration string");
    }

    if s.chars().all(|c| c.is_ascii_digit()) {
        return s
            .parse::<u64>()
            .with_context(|| format!("Invalid duration: '{s}'"));
    }

    let (num_str, suffix) = s.split_at(s.len() - 1);
    let num: u64 = num_str
        .parse()
        .with_context(|| format!("Invalid duration number: '{num_str}'"))?;

    let multiplier = match suffix {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        "w" => 604800,
        _ => anyhow::bail!(
            "Invalid duration suffix '{suffix}'. Use s (seconds), m (minutes), h (hours), d (days), or w (weeks)"
        ),
    };

    Ok(num * multiplier)
}
