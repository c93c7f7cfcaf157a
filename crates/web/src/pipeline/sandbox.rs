//! Execution of materialized scripts
//!
//! [`ExecutionSandbox`] is the seam between the orchestrator and whatever
//! actually runs an artifact. [`ProcessSandbox`] runs it as a child process
//! of this service with the host's own privileges. It is not a security
//! boundary.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::materializer::GeneratedScript;
use crate::config::RunnerConfig;

/// Cap on captured bytes per stream; the rest is read and discarded
const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// What a finished run looked like from the outside
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    pub exit_failed: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration_ms: u64,
}

/// Runs an artifact to completion and reports its streams and exit status
#[async_trait]
pub trait ExecutionSandbox: Send + Sync {
    /// Never fails: problems starting or waiting on the run are reported as
    /// a failed outcome.
    async fn execute(&self, script: &GeneratedScript) -> ExecutionOutcome;
}

/// Child-process runner with a wall-clock timeout
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    runtime: String,
    runtime_args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
    kill_grace: Duration,
}

impl ProcessSandbox {
    pub fn new(runtime: impl Into<String>, timeout: Duration) -> Self {
        Self {
            runtime: runtime.into(),
            runtime_args: Vec::new(),
            working_dir: None,
            timeout,
            kill_grace: Duration::from_secs(2),
        }
    }

    pub fn from_config(cfg: &RunnerConfig) -> Self {
        Self {
            runtime: cfg.runtime.clone(),
            runtime_args: cfg.runtime_args.clone(),
            working_dir: cfg.working_dir.clone(),
            timeout: cfg.timeout(),
            kill_grace: cfg.kill_grace(),
        }
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    fn command(&self, script: &GeneratedScript) -> Command {
        let mut cmd = Command::new(&self.runtime);
        cmd.args(&self.runtime_args)
            .arg(&script.artifact_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        // Own process group, so a timeout also takes down any browser the
        // script launched.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// SIGTERM the group, give it `kill_grace`, then SIGKILL.
    async fn terminate(&self, child: &mut Child, pid: Option<u32>) {
        #[cfg(unix)]
        {
            if let Some(pid) = pid {
                signal_group(pid, nix::sys::signal::Signal::SIGTERM);
                let exited = tokio::time::timeout(self.kill_grace, child.wait()).await.is_ok();
                signal_group(pid, nix::sys::signal::Signal::SIGKILL);
                if exited {
                    return;
                }
            }
        }
        #[cfg(not(unix))]
        let _ = pid;

        if let Err(e) = child.kill().await {
            warn!("Failed to kill run process: {}", e);
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!("Failed to signal process group {}: {}", pid, e),
    }
}

/// Bytes read from one output stream so far
#[derive(Debug, Default)]
struct Capture {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Capture {
    fn take_text(shared: &Mutex<Capture>) -> String {
        let capture = std::mem::take(&mut *shared.lock());
        let mut text = String::from_utf8_lossy(&capture.bytes).into_owned();
        if capture.truncated {
            text.push_str("\n[output truncated]\n");
        }
        text
    }
}

/// Read `stream` to EOF into `sink`, keeping at most [`MAX_CAPTURE_BYTES`].
/// Whatever was read stays in `sink` if the task is aborted.
async fn drain_capped<R: AsyncRead + Unpin>(stream: Option<R>, sink: Arc<Mutex<Capture>>) {
    let mut stream = match stream {
        Some(s) => s,
        None => return,
    };
    let mut chunk = [0u8; 8192];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let mut capture = sink.lock();
                let room = MAX_CAPTURE_BYTES.saturating_sub(capture.bytes.len());
                if n > room {
                    capture.truncated = true;
                }
                capture.bytes.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) => {
                warn!("Error reading run output: {}", e);
                break;
            }
        }
    }
}

#[async_trait]
impl ExecutionSandbox for ProcessSandbox {
    async fn execute(&self, script: &GeneratedScript) -> ExecutionOutcome {
        let start = Instant::now();

        let mut child = match self.command(script).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start {}: {}", self.runtime, e);
                return ExecutionOutcome {
                    exit_failed: true,
                    stdout: String::new(),
                    stderr: format!("failed to start {}: {}", self.runtime, e),
                    exit_code: None,
                    timed_out: false,
                    duration_ms: start.elapsed().as_millis() as u64,
                };
            }
        };
        let pid = child.id();
        debug!("Started run process {:?} for {}", pid, script.artifact_path.display());

        // Drain both pipes while waiting so a chatty child never blocks.
        let stdout_buf = Arc::new(Mutex::new(Capture::default()));
        let stderr_buf = Arc::new(Mutex::new(Capture::default()));
        let mut stdout_task = tokio::spawn(drain_capped(child.stdout.take(), stdout_buf.clone()));
        let mut stderr_task = tokio::spawn(drain_capped(child.stderr.take(), stderr_buf.clone()));

        let mut timed_out = false;
        let mut wait_error = None;
        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                wait_error = Some(e.to_string());
                self.terminate(&mut child, pid).await;
                None
            }
            Err(_) => {
                timed_out = true;
                info!("Run process {:?} exceeded {:?}, terminating", pid, self.timeout);
                self.terminate(&mut child, pid).await;
                None
            }
        };

        // Reap anything the script left behind holding our pipes open.
        #[cfg(unix)]
        {
            if let Some(pid) = pid {
                signal_group(pid, nix::sys::signal::Signal::SIGKILL);
            }
        }

        // A descendant that left the group can hold the pipes open forever;
        // give the readers `kill_grace` to reach EOF and keep what they have.
        let drained = tokio::time::timeout(self.kill_grace, async {
            let _ = (&mut stdout_task).await;
            let _ = (&mut stderr_task).await;
        })
        .await
        .is_ok();
        if !drained {
            warn!("Output of run process {:?} still open after exit, abandoning it", pid);
            stdout_task.abort();
            stderr_task.abort();
        }

        let stdout = Capture::take_text(&stdout_buf);
        let mut stderr = Capture::take_text(&stderr_buf);
        if !drained {
            stderr.push_str("\n[output stream left open by a detached process]\n");
        }
        if let Some(e) = wait_error {
            stderr.push_str(&format!("\nfailed waiting for process: {}\n", e));
        }
        if timed_out {
            stderr.push_str(&format!(
                "\nkilled after exceeding the {}s run timeout\n",
                self.timeout.as_secs()
            ));
        }

        let exit_code = status.and_then(|s| s.code());
        let exit_failed = !status.map(|s| s.success()).unwrap_or(false);

        ExecutionOutcome {
            exit_failed,
            stdout,
            stderr,
            exit_code,
            timed_out,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}
