//! Subprocess execution with combined output capture and cancellation.
//!
//! Every git invocation and every `exec` command goes through
//! [`run_captured`]. The child is polled rather than waited on so that a
//! [`Deadline`] expiry or an explicit [`Deadline::cancel`] kills and reaps it.
//! Children run in their own process group and the whole group is killed,
//! so nothing they started outlives the deadline.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long to keep reading after a kill, for output already in the pipe.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Caller-supplied bound on how long subprocess work may run.
///
/// Clones share the cancellation flag, so a handle kept by another thread can
/// abort an in-flight operation.
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    at: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl Deadline {
    /// No time bound; only explicit cancellation stops work.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Some(Instant::now() + timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_expired(&self) -> bool {
        self.is_cancelled() || self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// A deadline no later than `self` and no later than `limit` from now.
    /// The cancellation flag is shared with `self`.
    pub fn narrowed(&self, limit: Option<Duration>) -> Self {
        let Some(limit) = limit else {
            return self.clone();
        };
        let candidate = Instant::now() + limit;
        let at = match self.at {
            Some(at) if at < candidate => at,
            _ => candidate,
        };
        Self {
            at: Some(at),
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

pub(crate) struct CmdOutput {
    /// `None` when the child was killed because the deadline passed.
    pub(crate) status: Option<ExitStatus>,
    /// Everything the child wrote. Interleaved as written for combined
    /// runs; stdout followed by stderr for separated runs.
    pub(crate) output: String,
    /// stdout alone. Only filled by [`run_separated`].
    pub(crate) stdout: String,
    pub(crate) duration: Duration,
}

impl CmdOutput {
    pub(crate) fn success(&self) -> bool {
        self.status.is_some_and(|s| s.success())
    }

    pub(crate) fn timed_out(&self) -> bool {
        self.status.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Streams {
    Combined,
    Separate,
}

/// Run `program args...` in `cwd`, capturing combined output.
///
/// Spawn failures are returned as `Err`; a non-zero exit is a normal
/// `Ok` with a failing status.
pub(crate) fn run_captured(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    deadline: &Deadline,
) -> std::io::Result<CmdOutput> {
    run(program, args, cwd, &[], None, Streams::Combined, deadline)
}

/// Like [`run_captured`], but stdout is also kept on its own so callers can
/// parse it without stderr noise.
pub(crate) fn run_separated(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    envs: &[(&str, &str)],
    deadline: &Deadline,
) -> std::io::Result<CmdOutput> {
    run(program, args, cwd, envs, None, Streams::Separate, deadline)
}

pub(crate) fn run_with_stdin(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    envs: &[(&str, &str)],
    input: Option<&[u8]>,
    deadline: &Deadline,
) -> std::io::Result<CmdOutput> {
    run(program, args, cwd, envs, input, Streams::Combined, deadline)
}

fn run(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    envs: &[(&str, &str)],
    input: Option<&[u8]>,
    streams: Streams,
    deadline: &Deadline,
) -> std::io::Result<CmdOutput> {
    let started = Instant::now();

    let mut command = Command::new(program);
    command.args(args).envs(envs.iter().copied());
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    command.stdin(if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group, so a kill reaches every descendant.
        command.process_group(0);
    }

    let (mut child, combined, stdout, stderr) = match streams {
        Streams::Combined => {
            let (reader, writer) = std::io::pipe()?;
            command.stdout(writer.try_clone()?).stderr(writer);
            let child = command.spawn()?;
            // Our copies of the write end must close so the reader sees EOF
            // once the child and its descendants exit.
            drop(command);
            (child, Some(Collector::start(reader)), None, None)
        }
        Streams::Separate => {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
            let mut child = command.spawn()?;
            let stdout = child.stdout.take().map(Collector::start);
            let stderr = child.stderr.take().map(Collector::start);
            (child, None, stdout, stderr)
        }
    };

    if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
        let input = input.to_vec();
        // Fed from its own thread so a child that never reads cannot stall
        // the deadline loop. The write fails once the child is gone.
        std::thread::spawn(move || {
            use std::io::Write;
            let _ = stdin.write_all(&input);
        });
    }

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if deadline.is_expired() {
            log::warn!("killing `{program}` after deadline/cancellation");
            kill_tree(&mut child);
            break None;
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    let mut killed = status.is_none();
    let collectors: Vec<&Collector> = [&combined, &stdout, &stderr]
        .into_iter()
        .flatten()
        .collect();
    // Descendants of an exited child may still hold the pipes open.
    while !killed && !collectors.iter().all(|c| c.is_finished()) {
        if deadline.is_expired() {
            log::warn!("killing processes left behind by `{program}`");
            kill_tree(&mut child);
            killed = true;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    let grace = killed.then_some(KILL_GRACE);

    let finish = |c: Option<Collector>| c.map(|c| c.finish(grace)).unwrap_or_default();
    let (output, stdout) = match streams {
        Streams::Combined => (finish(combined), Vec::new()),
        Streams::Separate => {
            let out = finish(stdout);
            let mut all = out.clone();
            all.extend(finish(stderr));
            (all, out)
        }
    };
    Ok(CmdOutput {
        status,
        output: String::from_utf8_lossy(&output).into_owned(),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        duration: started.elapsed(),
    })
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    // The child leads its own group; its pid is the group id.
    if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Drains one pipe on a background thread into a shared buffer, so bytes
/// read before a kill are still available afterwards.
struct Collector {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

impl Collector {
    fn start<R: Read + Send + 'static>(mut reader: R) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let handle = std::thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => match sink.lock() {
                        Ok(mut buf) => buf.extend_from_slice(&chunk[..n]),
                        Err(_) => break,
                    },
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        });
        Self { buf, handle }
    }

    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for EOF (at most `grace` when given) and return what was read.
    fn finish(self, grace: Option<Duration>) -> Vec<u8> {
        match grace {
            None => {
                let _ = self.handle.join();
            }
            Some(grace) => {
                let until = Instant::now() + grace;
                while !self.handle.is_finished() && Instant::now() < until {
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        }
        match self.buf.lock() {
            Ok(buf) => buf.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
