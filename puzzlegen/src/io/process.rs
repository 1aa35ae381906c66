//! Helpers for running child processes with timeouts, cancellation and
//! bounded output.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::core::types::Cancelled;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    /// `None` when the process was killed after timing out.
    pub status: Option<ExitStatus>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn exit_code(&self) -> i32 {
        self.status.and_then(|s| s.code()).unwrap_or(-1)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn truncated_notice(&self, label: &str) -> String {
        let mut notice = String::new();
        if self.stdout_truncated > 0 {
            notice.push_str(&format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        if self.stderr_truncated > 0 {
            notice.push_str(&format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        notice
    }
}

enum Wait {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Run a command and capture stdout/stderr without risking pipe deadlocks.
///
/// Both streams are drained concurrently while the child runs.
/// `output_limit_bytes` bounds what is kept in memory per stream (bytes beyond
/// it are discarded while the pipe is still drained). On timeout the child is
/// killed and `timed_out` is set. On cancellation a kill is attempted and
/// [`Cancelled`] is returned inside the error.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes = output_limit_bytes))]
pub async fn run_command(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: &CancellationToken,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = tokio::spawn(read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = tokio::spawn(read_stream_limited(stderr, output_limit_bytes));

    let wait = tokio::select! {
        biased;
        _ = cancel.cancelled() => Wait::Cancelled,
        status = child.wait() => Wait::Exited(status),
        _ = tokio::time::sleep(timeout) => Wait::TimedOut,
    };

    let (status, timed_out) = match wait {
        Wait::Exited(status) => (Some(status.context("wait for command")?), false),
        Wait::TimedOut => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            child.kill().await.context("kill command")?;
            (None, true)
        }
        Wait::Cancelled => {
            warn!("command cancelled, killing");
            if let Err(e) = child.start_kill() {
                warn!(err = %e, "failed to kill cancelled command");
            }
            stdout_handle.abort();
            stderr_handle.abort();
            return Err(anyhow::Error::new(Cancelled));
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).await.context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).await.context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.and_then(|s| s.code()), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

async fn join_output(handle: JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.await {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader task panicked")),
    }
}

async fn read_stream_limited<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await.context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn captures_both_streams_and_exit_code() {
        let output = run_command(
            sh("printf out; printf err >&2; exit 3"),
            Duration::from_secs(5),
            1024,
            &CancellationToken::new(),
        )
        .await
        .expect("run");
        assert_eq!(output.stdout_lossy(), "out");
        assert_eq!(output.stderr_lossy(), "err");
        assert_eq!(output.exit_code(), 3);
        assert!(!output.timed_out);
    }

    #[tokio::test]
    async fn large_output_does_not_deadlock_and_is_truncated() {
        let output = run_command(
            sh("head -c 200000 /dev/zero; head -c 200000 /dev/zero >&2"),
            Duration::from_secs(10),
            1000,
            &CancellationToken::new(),
        )
        .await
        .expect("run");
        assert_eq!(output.stdout.len(), 1000);
        assert_eq!(output.stdout_truncated, 199_000);
        assert_eq!(output.stderr_truncated, 199_000);
        assert!(output.truncated_notice("interpreter").contains("truncated"));
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let output = run_command(
            sh("exec sleep 5"),
            Duration::from_millis(100),
            1024,
            &CancellationToken::new(),
        )
        .await
        .expect("run");
        assert!(output.timed_out);
        assert_eq!(output.exit_code(), -1);
    }

    #[tokio::test]
    async fn cancellation_surfaces_as_cancelled() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = run_command(sh("exec sleep 5"), Duration::from_secs(10), 1024, &cancel)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<Cancelled>().is_some());
    }

    #[tokio::test]
    async fn spawn_failure_is_an_error() {
        let err = run_command(
            Command::new("/definitely/not/a/binary"),
            Duration::from_secs(1),
            1024,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("spawn command"));
    }
}
