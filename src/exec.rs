//! Run a command in one repository, every repository, or the workspace root.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{EntityKind, Error, IoContext, Result};
use crate::ids::next_ulid;
use crate::process::{run_captured, Deadline};
use crate::workspace::store::{read_json, write_json_atomic};
use crate::workspace::{Store, Workspace};

pub const TARGET_ALL: &str = "all";
pub const TARGET_ROOT: &str = "root";

/// Exit code reported when the deadline kills a command.
pub const TIMEOUT_EXIT_CODE: i32 = 124;
/// Exit code reported when a command cannot be started at all.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 1;

const EXECUTIONS_DIR: &str = "executions";
const RECORD_FILE: &str = "record.json";

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// `all` (or empty) for every repository, `root` for the workspace
    /// directory, or a repository name.
    pub target: String,
    /// Program followed by its arguments.
    pub command: Vec<String>,
    /// Persist an [`ExecutionRecord`] for this run.
    pub record: bool,
}

/// Outcome of the command in one target directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub repository: String,
    pub path: PathBuf,
    pub exit_code: i32,
    pub duration_ms: u64,
    /// Combined stdout and stderr.
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecReport {
    pub results: Vec<ExecResult>,
    /// Set when the run was recorded.
    pub execution_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub handle: String,
    pub timestamp: DateTime<Utc>,
    pub target: String,
    pub command: Vec<String>,
    /// First non-zero exit code, or 0.
    pub exit_code: i32,
    pub duration_ms: u64,
    pub results: Vec<ExecResult>,
}

enum Targets {
    All,
    Root,
    Named(String),
}

impl Targets {
    fn parse(target: &str, ws: &Workspace) -> Self {
        match target.trim() {
            "" | TARGET_ALL if ws.repositories.is_empty() => Targets::Root,
            "" | TARGET_ALL => Targets::All,
            TARGET_ROOT => Targets::Root,
            name => Targets::Named(name.to_string()),
        }
    }

    fn label(&self) -> &str {
        match self {
            Targets::All => TARGET_ALL,
            Targets::Root => TARGET_ROOT,
            Targets::Named(name) => name,
        }
    }

    fn resolve(&self, ws: &Workspace) -> Result<Vec<(String, PathBuf)>> {
        match self {
            Targets::All => Ok(ws
                .repositories
                .iter()
                .map(|r| (r.name.clone(), ws.repository_path(&r.name)))
                .collect()),
            Targets::Root => Ok(vec![(TARGET_ROOT.to_string(), ws.path.clone())]),
            Targets::Named(name) => match ws.repository(name) {
                Some(repo) => Ok(vec![(repo.name.clone(), ws.repository_path(&repo.name))]),
                None => Err(Error::not_found(EntityKind::Repository, name.as_str())),
            },
        }
    }
}

impl Store {
    /// Run `opts.command` in each target directory, one after another.
    ///
    /// Stops at the first non-zero exit and returns
    /// [`Error::ExecFailed`] holding every result collected so far.
    pub fn exec(&self, handle: &str, opts: ExecOptions, deadline: &Deadline) -> Result<ExecReport> {
        let Some(program) = opts.command.first().filter(|p| !p.trim().is_empty()) else {
            return Err(Error::Validation("command must not be empty".to_string()));
        };
        let ws = self.get(handle)?;
        let targets = Targets::parse(&opts.target, &ws);
        let dirs = targets.resolve(&ws)?;

        let args: Vec<&str> = opts.command[1..].iter().map(String::as_str).collect();
        let started = Instant::now();
        let timestamp = Utc::now();
        let mut results = Vec::with_capacity(dirs.len());
        let mut failure = None;

        for (name, dir) in dirs {
            let result = self.run_in(&name, &dir, program, &args, deadline);
            log::debug!("{name}: `{}` exited {}", opts.command.join(" "), result.exit_code);
            let exit_code = result.exit_code;
            results.push(result);
            if exit_code != 0 {
                failure = Some((name, exit_code));
                break;
            }
        }

        let execution_id = if opts.record {
            let record = ExecutionRecord {
                id: next_ulid().to_string(),
                handle: ws.handle.clone(),
                timestamp,
                target: targets.label().to_string(),
                command: opts.command.clone(),
                exit_code: failure.as_ref().map_or(0, |(_, code)| *code),
                duration_ms: started.elapsed().as_millis() as u64,
                results: results.clone(),
            };
            match write_record(&ws, &record) {
                Ok(()) => Some(record.id),
                Err(e) => {
                    log::warn!("failed to record execution in {}: {e}", ws.handle);
                    None
                }
            }
        } else {
            None
        };

        match failure {
            Some((repository, exit_code)) => Err(Error::ExecFailed {
                repository,
                exit_code,
                results,
            }),
            None => Ok(ExecReport {
                results,
                execution_id,
            }),
        }
    }

    fn run_in(
        &self,
        name: &str,
        dir: &Path,
        program: &str,
        args: &[&str],
        deadline: &Deadline,
    ) -> ExecResult {
        let deadline = deadline.narrowed(self.config().exec_timeout);
        let started = Instant::now();
        let (exit_code, output, elapsed) = match run_captured(program, args, Some(dir), &deadline) {
            Ok(out) if out.timed_out() => {
                let mut output = out.output;
                output.push_str("\ncommand timed out or was cancelled\n");
                (TIMEOUT_EXIT_CODE, output, out.duration)
            }
            Ok(out) => (
                out.status.map_or(SPAWN_FAILURE_EXIT_CODE, exit_code_of),
                out.output,
                out.duration,
            ),
            Err(e) => (
                SPAWN_FAILURE_EXIT_CODE,
                format!("failed to start {program}: {e}"),
                started.elapsed(),
            ),
        };
        ExecResult {
            repository: name.to_string(),
            path: dir.to_path_buf(),
            exit_code,
            duration_ms: elapsed.as_millis() as u64,
            output,
        }
    }

    /// Recorded executions, newest first. Unreadable records are skipped.
    pub fn list_executions(&self, handle: &str) -> Result<Vec<ExecutionRecord>> {
        let ws = self.get(handle)?;
        let dir = ws.state_dir().join(EXECUTIONS_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(format!("reading {}", dir.display()), e)),
        };
        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.io_context(|| format!("reading {}", dir.display()))?;
            let id = entry.file_name().to_string_lossy().to_string();
            match read_json::<ExecutionRecord>(&entry.path().join(RECORD_FILE), EntityKind::Execution, &id) {
                Ok(record) => records.push(record),
                Err(e) => log::debug!("skipping execution {id}: {e}"),
            }
        }
        records.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(records)
    }

    pub fn get_execution(&self, handle: &str, execution_id: &str) -> Result<ExecutionRecord> {
        let ws = self.get(handle)?;
        if execution_id.parse::<Ulid>().is_err() {
            return Err(Error::Validation(format!(
                "invalid execution id '{execution_id}'"
            )));
        }
        let path = ws
            .state_dir()
            .join(EXECUTIONS_DIR)
            .join(execution_id)
            .join(RECORD_FILE);
        read_json(&path, EntityKind::Execution, execution_id)
    }
}

fn write_record(ws: &Workspace, record: &ExecutionRecord) -> Result<()> {
    let dir = ws.state_dir().join(EXECUTIONS_DIR).join(&record.id);
    fs::create_dir_all(&dir).io_context(|| format!("creating {}", dir.display()))?;
    write_json_atomic(&dir.join(RECORD_FILE), record)
        .map_err(|err| err.with_cleanup(fs::remove_dir_all(&dir)))
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(SPAWN_FAILURE_EXIT_CODE)
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(SPAWN_FAILURE_EXIT_CODE)
}
