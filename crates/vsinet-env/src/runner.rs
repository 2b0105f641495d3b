//! Host command execution.
//!
//! Every interaction with the host (container runtime, `ip`, `nsenter`)
//! goes through [`HostRunner`], so the layers above can be exercised
//! against a scripted host in tests.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

/// Exit status and combined output of a one-shot host command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Process exit code (-1 if the process was killed by a signal).
    pub exit_code: i32,
    /// Stdout followed by stderr, lossily decoded.
    pub output: String,
}

impl CommandOutput {
    /// Create an output record.
    pub fn new(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }

    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Iterate over non-empty output lines.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.output.lines().filter(|l| !l.trim().is_empty())
    }
}

/// Byte streams of an interactive process.
///
/// `child` is `None` when the streams are not backed by an OS process
/// (scripted shells in tests).
pub struct Interactive {
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub child: Option<Child>,
}

impl std::fmt::Debug for Interactive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interactive")
            .field("pid", &self.child.as_ref().and_then(|c| c.id()))
            .finish_non_exhaustive()
    }
}

/// Executes commands on the host.
#[async_trait]
pub trait HostRunner: Send + Sync {
    /// Run `argv` to completion and capture its exit code and output.
    ///
    /// A non-zero exit code is not an error at this level; only a failure
    /// to launch the process is.
    async fn run(&self, argv: &[String]) -> std::io::Result<CommandOutput>;

    /// Spawn `argv` with stdin and stdout captured.
    async fn spawn(&self, argv: &[String]) -> std::io::Result<Interactive>;
}

/// [`HostRunner`] backed by real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

fn split_argv(argv: &[String]) -> std::io::Result<(&String, &[String])> {
    argv.split_first().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command line")
    })
}

#[async_trait]
impl HostRunner for ProcessRunner {
    async fn run(&self, argv: &[String]) -> std::io::Result<CommandOutput> {
        let (program, args) = split_argv(argv)?;
        tracing::trace!(cmd = %argv.join(" "), "Running host command");

        let out = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));
        let exit_code = out.status.code().unwrap_or(-1);
        tracing::trace!(exit_code, output_len = output.len(), "Host command finished");

        Ok(CommandOutput { exit_code, output })
    }

    async fn spawn(&self, argv: &[String]) -> std::io::Result<Interactive> {
        let (program, args) = split_argv(argv)?;
        tracing::debug!(cmd = %argv.join(" "), "Spawning interactive process");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin not captured")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdout not captured")
        })?;

        Ok(Interactive {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            child: Some(child),
        })
    }
}

/// Convert a list of string slices into an owned argv.
pub(crate) fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}
