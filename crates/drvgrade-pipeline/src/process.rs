//! Bounded external command execution.
//!
//! Every command runs with an explicit timeout. stdout and stderr are
//! drained concurrently into shared buffers, so a command that hits its
//! deadline still yields the output it produced up to that point.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{Result, ToolchainError};

/// How long to keep draining pipes after the process itself is gone.
/// Grandchildren can hold a pipe open past the parent's exit.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// A command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Prefix with non-interactive `sudo -n`.
    pub fn privileged(self, use_sudo: bool) -> Self {
        if !use_sudo {
            return self;
        }
        let mut args = vec!["-n".to_string(), self.program];
        args.extend(self.args);
        Self {
            program: "sudo".to_string(),
            args,
            cwd: self.cwd,
            timeout: self.timeout,
        }
    }

    /// `program arg1 arg2 ...` for logs and notes.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Output of a command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub program: String,

    /// Exit code; -1 when terminated by a signal.
    pub exit_code: i32,

    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    /// A successful run with the given stdout.
    pub fn ok(program: impl Into<String>, stdout: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            duration_ms: 0,
        }
    }

    /// A failed run with the given stderr.
    pub fn failed(program: impl Into<String>, exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            duration_ms: 0,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (_, true) => self.stdout.clone(),
            _ => format!("{}\n{}", self.stdout.trim_end_matches('\n'), self.stderr),
        }
    }
}

type SharedBuf = Arc<Mutex<Vec<u8>>>;

fn drain<R>(pipe: Option<R>, buf: SharedBuf) -> Option<JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut pipe = pipe?;
    Some(tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut b) = buf.lock() {
                        b.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
    }))
}

async fn settle(handle: Option<JoinHandle<()>>) {
    if let Some(mut handle) = handle {
        if tokio::time::timeout(DRAIN_GRACE, &mut handle).await.is_err() {
            handle.abort();
        }
    }
}

fn take(buf: &SharedBuf) -> String {
    let bytes = match buf.lock() {
        Ok(b) => b.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Run a command to completion or until its timeout elapses.
///
/// On timeout the process is killed and [`ToolchainError::Timeout`] carries
/// the combined output captured so far.
pub async fn run_command(spec: &CommandSpec) -> Result<CommandOutput> {
    let start = Instant::now();
    debug!(command = %spec.display(), timeout_ms = spec.timeout.as_millis() as u64, "running");

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ToolchainError::PermissionDenied {
            program: spec.program.clone(),
            detail: e.to_string(),
        },
        _ => ToolchainError::Spawn {
            program: spec.program.clone(),
            source: e,
        },
    })?;

    let stdout_buf: SharedBuf = Arc::default();
    let stderr_buf: SharedBuf = Arc::default();
    let stdout_task = drain(child.stdout.take(), stdout_buf.clone());
    let stderr_task = drain(child.stderr.take(), stderr_buf.clone());

    let waited = tokio::time::timeout(spec.timeout, child.wait()).await;
    let timed_out = waited.is_err();
    if timed_out {
        let _ = child.kill().await;
    }
    settle(stdout_task).await;
    settle(stderr_task).await;

    let stdout = take(&stdout_buf);
    let stderr = take(&stderr_buf);
    let duration_ms = start.elapsed().as_millis() as u64;

    match waited {
        Err(_) => {
            let partial = CommandOutput {
                program: spec.program.clone(),
                exit_code: -1,
                stdout,
                stderr,
                duration_ms,
            };
            Err(ToolchainError::Timeout {
                program: spec.display(),
                limit_ms: spec.timeout.as_millis() as u64,
                partial_output: partial.combined(),
            })
        }
        Ok(Err(e)) => Err(ToolchainError::Io(e)),
        Ok(Ok(status)) => Ok(CommandOutput {
            program: spec.program.clone(),
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
            duration_ms,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privileged_prefix() {
        let spec = CommandSpec::new("insmod", Duration::from_secs(1))
            .arg("/tmp/m.ko")
            .privileged(true);
        assert_eq!(spec.program, "sudo");
        assert_eq!(spec.args, vec!["-n", "insmod", "/tmp/m.ko"]);
        assert_eq!(spec.display(), "sudo -n insmod /tmp/m.ko");

        let plain = CommandSpec::new("insmod", Duration::from_secs(1)).privileged(false);
        assert_eq!(plain.program, "insmod");
    }

    #[test]
    fn test_combined_output() {
        let mut out = CommandOutput::ok("gcc", "line1\n");
        assert_eq!(out.combined(), "line1\n");
        out.stderr = "err\n".to_string();
        assert_eq!(out.combined(), "line1\nerr\n");
        assert!(CommandOutput::failed("gcc", 1, "x").combined() == "x");
    }

    #[tokio::test]
    async fn test_run_simple_command() {
        let spec = CommandSpec::new("echo", Duration::from_secs(10)).arg("hello");
        let out = run_command(&spec).await.expect("echo runs");
        assert!(out.success());
        assert!(out.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_run_failing_command() {
        let out = run_command(&CommandSpec::new("false", Duration::from_secs(10)))
            .await
            .expect("false runs");
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let spec = CommandSpec::new("drvgrade-no-such-program", Duration::from_secs(1));
        let err = run_command(&spec).await.unwrap_err();
        assert!(matches!(err, ToolchainError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_timeout_preserves_partial_output() {
        let spec = CommandSpec::new("sh", Duration::from_millis(800))
            .arg("-c")
            .arg("echo started; exec sleep 30");
        let err = run_command(&spec).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.partial_output().contains("started"));
    }
}
