//! Portable workspace descriptions for export and import.
//!
//! A [`WorkspaceContext`] carries enough to recreate an equivalent workspace
//! elsewhere: purpose, repositories with their refs, and a summary of the
//! captures taken so far. Parsing is strict; unknown or missing fields are
//! rejected with serde's field-level message.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capture::Capture;
use crate::error::{Error, Result};
use crate::process::Deadline;
use crate::workspace::spec::RepoSpec;
use crate::workspace::store::CreateRequest;
use crate::workspace::{Repository, Store, Workspace};

pub const CONTEXT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceContext {
    pub version: u32,
    pub generated_at: DateTime<Utc>,
    pub handle: String,
    pub purpose: String,
    pub created_at: DateTime<Utc>,
    pub repositories: Vec<ContextRepository>,
    #[serde(default)]
    pub captures: Vec<CaptureSummary>,
    #[serde(default)]
    pub metadata: ContextMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextRepository {
    pub url: String,
    #[serde(rename = "ref", default, skip_serializing_if = "String::is_empty")]
    pub reference: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub depth: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl From<&Repository> for ContextRepository {
    fn from(r: &Repository) -> Self {
        Self {
            url: r.url.clone(),
            reference: r.reference.clone(),
            name: r.name.clone(),
            depth: r.depth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Commit per repository name.
    pub commits: BTreeMap<String, String>,
}

impl From<&Capture> for CaptureSummary {
    fn from(c: &Capture) -> Self {
        Self {
            id: c.id.clone(),
            name: c.name.clone(),
            kind: c.kind.clone(),
            created_at: c.created_at,
            description: c.metadata.description.clone(),
            tags: c.metadata.tags.clone(),
            commits: c
                .git_state
                .iter()
                .map(|g| (g.repository.clone(), g.commit.clone()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ContextMetadata {
    pub repository_count: usize,
    pub capture_count: usize,
    pub execution_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_capture_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Recreate under the exported handle instead of a fresh one.
    pub preserve_handle: bool,
}

impl WorkspaceContext {
    pub fn from_json(input: &str) -> Result<Self> {
        let ctx: Self = serde_json::from_str(input)
            .map_err(|e| Error::Validation(format!("invalid workspace context: {e}")))?;
        ctx.validate()?;
        Ok(ctx)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != CONTEXT_VERSION {
            return Err(Error::Validation(format!(
                "unsupported context version {} (expected {CONTEXT_VERSION})",
                self.version
            )));
        }
        if self.purpose.trim().is_empty() {
            return Err(Error::Validation("context purpose must not be empty".to_string()));
        }
        if let Some(i) = self.repositories.iter().position(|r| r.url.trim().is_empty()) {
            return Err(Error::Validation(format!(
                "context repository {i} has an empty url"
            )));
        }
        Ok(())
    }
}

impl Store {
    pub fn export_context(&self, handle: &str) -> Result<WorkspaceContext> {
        let ws = self.get(handle)?;
        let captures = self.list_captures(handle)?;
        let execution_count = self.list_executions(handle)?.len();

        Ok(WorkspaceContext {
            version: CONTEXT_VERSION,
            generated_at: Utc::now(),
            handle: ws.handle.clone(),
            purpose: ws.purpose.clone(),
            created_at: ws.created_at,
            repositories: ws.repositories.iter().map(ContextRepository::from).collect(),
            metadata: ContextMetadata {
                repository_count: ws.repositories.len(),
                capture_count: captures.len(),
                execution_count,
                last_capture_at: captures.first().map(|c| c.created_at),
            },
            captures: captures.iter().map(CaptureSummary::from).collect(),
        })
    }

    /// Recreate a workspace from `ctx` through the normal create protocol.
    /// Captures and execution records are not carried over.
    pub fn import_context(
        &self,
        ctx: &WorkspaceContext,
        opts: ImportOptions,
        deadline: &Deadline,
    ) -> Result<Workspace> {
        ctx.validate()?;
        let specs = ctx
            .repositories
            .iter()
            .map(|r| RepoSpec {
                url: r.url.clone(),
                reference: r.reference.clone(),
                depth: r.depth,
            })
            .collect();
        let empty = BTreeMap::new();
        self.create_with(
            CreateRequest {
                purpose: &ctx.purpose,
                specs,
                template: None,
                template_vars: &empty,
                progress: None,
                handle: opts.preserve_handle.then_some(ctx.handle.as_str()),
            },
            deadline,
        )
    }
}
