//! Workspace lifecycle hooks.

use std::path::Path;
use std::time::Duration;

use crate::config::HookConfig;
use crate::process::{run_with_stdin, Deadline};

use super::types::Workspace;

const HOOK_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Hook {
    PostCreate,
    PostRemove,
    PostCapture,
}

impl Hook {
    fn name(self) -> &'static str {
        match self {
            Hook::PostCreate => "post-create",
            Hook::PostRemove => "post-remove",
            Hook::PostCapture => "post-capture",
        }
    }

    fn command(self, hooks: &HookConfig) -> Option<&str> {
        match self {
            Hook::PostCreate => hooks.post_create.as_deref(),
            Hook::PostRemove => hooks.post_remove.as_deref(),
            Hook::PostCapture => hooks.post_capture.as_deref(),
        }
    }
}

/// Run a configured hook with `payload` piped to stdin.
///
/// Hook failure logs a warning but doesn't affect the operation.
pub(crate) fn fire_hook(hooks: &HookConfig, hook: Hook, payload: &serde_json::Value, cwd: &Path) {
    let Some(cmd) = hook.command(hooks) else {
        return;
    };
    let payload_json = match serde_json::to_vec(payload) {
        Ok(j) => j,
        Err(_) => return,
    };
    // The workspace directory is gone after a remove.
    let cwd = cwd.is_dir().then_some(cwd);

    let result = run_with_stdin(
        "sh",
        &["-c", cmd],
        cwd,
        &[],
        Some(payload_json.as_slice()),
        &Deadline::after(HOOK_TIMEOUT),
    );
    match result {
        Ok(out) if out.timed_out() => {
            log::warn!("Hook '{}' timed out", hook.name());
        }
        Ok(out) if !out.success() => {
            log::warn!(
                "Hook '{}' exited with {:?}: {}",
                hook.name(),
                out.status.and_then(|s| s.code()),
                out.output.trim()
            );
        }
        Err(e) => {
            log::warn!("Hook '{}' failed to execute: {e}", hook.name());
        }
        _ => {}
    }
}

pub(crate) fn fire_post_create(hooks: &HookConfig, ws: &Workspace) {
    let payload = serde_json::json!({
        "action": "create",
        "handle": ws.handle,
        "purpose": ws.purpose,
        "path": ws.path.display().to_string(),
        "repositories": ws.repositories,
    });
    fire_hook(hooks, Hook::PostCreate, &payload, &ws.path);
}

pub(crate) fn fire_post_remove(hooks: &HookConfig, handle: &str, path: &Path) {
    let payload = serde_json::json!({
        "action": "remove",
        "handle": handle,
        "path": path.display().to_string(),
    });
    fire_hook(hooks, Hook::PostRemove, &payload, path);
}

pub(crate) fn fire_post_capture(hooks: &HookConfig, ws: &Workspace, capture_id: &str) {
    let payload = serde_json::json!({
        "action": "capture",
        "handle": ws.handle,
        "path": ws.path.display().to_string(),
        "capture_id": capture_id,
    });
    fire_hook(hooks, Hook::PostCapture, &payload, &ws.path);
}
