//! Subprocess execution for the command-line device tools.
//!
//! Every backend shells out (`adb`, `xcrun simctl`, go-ios). Drivers never
//! spawn processes themselves; they go through a [`CommandRunner`] so the
//! transport can be replaced in tests.
//!
//! Two shapes of invocation exist:
//!
//! - [`CommandRunner::output`] runs a command to completion under a fixed
//!   timeout and returns its stdout.
//! - [`CommandRunner::spawn`] starts a long-running capture (screen
//!   recording) and hands back a [`CaptureProcess`] to interrupt later.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::driver::DriverError;

/// Runs external commands on behalf of a driver.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and return its stdout.
    ///
    /// A non-zero exit status yields [`DriverError::CommandFailed`] carrying
    /// stderr; exceeding the runner's timeout yields [`DriverError::Timeout`].
    async fn output(&self, program: &Path, args: &[&str]) -> Result<Vec<u8>, DriverError>;

    /// Start `program` in the background.
    fn spawn(&self, program: &Path, args: &[&str]) -> Result<Box<dyn CaptureProcess>, DriverError>;
}

/// A background process started by [`CommandRunner::spawn`].
#[async_trait]
pub trait CaptureProcess: Send {
    /// OS process id, if the process is still running.
    fn pid(&self) -> Option<u32>;

    /// Ask the process to finish (SIGINT on Unix).
    fn interrupt(&mut self) -> Result<(), DriverError>;

    /// Wait for the process to exit.
    async fn wait(&mut self) -> Result<(), DriverError>;
}

/// Renders a command line for logs and error messages.
pub fn describe(program: &Path, args: &[&str]) -> String {
    let mut line = program.display().to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// [`CommandRunner`] backed by `tokio::process`.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn output(&self, program: &Path, args: &[&str]) -> Result<Vec<u8>, DriverError> {
        let command = describe(program, args);
        debug!(%command, "running command");

        let mut child = Command::new(program);
        child.args(args).stdin(Stdio::null()).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, child.output())
            .await
            .map_err(|_| DriverError::Timeout(command.clone()))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DriverError::CommandFailed(format!(
                "`{command}` exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        debug!(%command, bytes = output.stdout.len(), "command finished");
        Ok(output.stdout)
    }

    fn spawn(&self, program: &Path, args: &[&str]) -> Result<Box<dyn CaptureProcess>, DriverError> {
        let command = describe(program, args);
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        debug!(%command, pid = ?child.id(), "spawned capture process");
        Ok(Box::new(ChildCapture {
            child,
            command,
            timeout: self.timeout,
        }))
    }
}

struct ChildCapture {
    child: Child,
    command: String,
    timeout: Duration,
}

#[async_trait]
impl CaptureProcess for ChildCapture {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    #[cfg(unix)]
    fn interrupt(&mut self) -> Result<(), DriverError> {
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        let pid: libc::pid_t = pid.try_into().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "PID out of range")
        })?;

        // SAFETY: `libc::kill` has no memory-safety preconditions; `pid` is
        // a child we spawned and have not yet reaped.
        let result = unsafe { libc::kill(pid, libc::SIGINT) };
        if result == 0 {
            return Ok(());
        }

        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Ok(()),
            _ => Err(err.into()),
        }
    }

    #[cfg(not(unix))]
    fn interrupt(&mut self) -> Result<(), DriverError> {
        self.child.start_kill().map_err(Into::into)
    }

    async fn wait(&mut self) -> Result<(), DriverError> {
        match tokio::time::timeout(self.timeout, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(command = %self.command, %status, "capture process exited");
                Ok(())
            }
            Err(_) => {
                warn!(command = %self.command, "capture process ignored interrupt, killing");
                self.child.kill().await?;
                Ok(())
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh() -> &'static Path {
        Path::new("sh")
    }

    #[tokio::test]
    async fn output_returns_stdout() {
        let runner = SystemRunner::new(Duration::from_secs(10));
        let out = runner.output(sh(), &["-c", "printf 'Physical size: 1080x2400'"]).await.unwrap();
        assert_eq!(out, b"Physical size: 1080x2400");
    }

    #[tokio::test]
    async fn nonzero_exit_is_command_failed_with_stderr() {
        let runner = SystemRunner::new(Duration::from_secs(10));
        let err = runner
            .output(sh(), &["-c", "echo 'device offline' >&2; exit 1"])
            .await
            .unwrap_err();
        match err {
            DriverError::CommandFailed(msg) => assert!(msg.contains("device offline")),
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let runner = SystemRunner::new(Duration::from_millis(100));
        let err = runner.output(sh(), &["-c", "sleep 5"]).await.unwrap_err();
        assert!(matches!(err, DriverError::Timeout(_)));
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let runner = SystemRunner::new(Duration::from_secs(10));
        let err = runner
            .output(Path::new("/nonexistent/mobot-test-binary"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Io(_)));
    }

    #[tokio::test]
    async fn spawned_capture_stops_on_interrupt() {
        let runner = SystemRunner::new(Duration::from_secs(10));
        let mut capture = runner.spawn(Path::new("sleep"), &["30"]).unwrap();
        assert!(capture.pid().is_some());

        capture.interrupt().unwrap();
        capture.wait().await.unwrap();
        assert!(capture.pid().is_none());
    }

    #[test]
    fn describe_joins_arguments() {
        assert_eq!(
            describe(Path::new("adb"), &["-s", "emulator-5554", "shell", "wm", "size"]),
            "adb -s emulator-5554 shell wm size"
        );
    }
}
