//! Interactive sessions with a node's shells.
//!
//! The byte stream between us and the shell has no message framing. The
//! shell is configured so that its prompt is the single byte
//! [`SENTINEL`]; a read whose last byte is the sentinel means the shell
//! has finished the previous command and is waiting for the next one.
//! The protocol is strictly half-duplex: one command, one response.

use crate::error::{CoreError, Result};
use bytes::BytesMut;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use vsinet_env::{Environment, HostRunner, Interactive, BASH_RC_FILE, SHARED_MOUNT_POINT};

/// Reserved prompt byte (DEL). Never valid inside a command.
pub const SENTINEL: u8 = 127;

/// Bytes a command may not contain. A line break makes the shell prompt
/// once per line, which would split one response across several reads.
const RESERVED: [u8; 3] = [SENTINEL, b'\n', b'\r'];

/// Bytes requested per read.
const READ_CHUNK: usize = 1024;

/// Which shell a session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// `bash` with the sentinel prompt rc file
    Shell,
    /// The firmware's configuration CLI
    Cli,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKind::Shell => write!(f, "shell"),
            SessionKind::Cli => write!(f, "cli"),
        }
    }
}

/// Current state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Streams attached, prompt not yet seen
    Unstarted,
    /// Waiting for the next prompt
    AwaitingPrompt,
    /// Prompt seen; a command may be sent
    Ready,
    /// Closed by us or by the peer
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unstarted => write!(f, "unstarted"),
            SessionState::AwaitingPrompt => write!(f, "awaiting-prompt"),
            SessionState::Ready => write!(f, "ready"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// A prompt-synchronised session with one interactive process.
pub struct Session {
    kind: SessionKind,
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    child: Option<Child>,
    state: SessionState,
    read_timeout: Option<Duration>,
    /// Responses owed for commands sent with [`send_only`](Self::send_only).
    unread: usize,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("unread", &self.unread)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Spawn `argv` on the host and wait for its first prompt.
    pub async fn open(kind: SessionKind, runner: &dyn HostRunner, argv: &[String]) -> Result<Self> {
        tracing::debug!(kind = %kind, cmd = %argv.join(" "), "Opening session");
        let proc = runner.spawn(argv).await?;
        let mut session = Self::from_interactive(kind, proc);
        session.sync_prompt().await?;
        Ok(session)
    }

    /// Attach to `bash` inside `env` with the sentinel prompt.
    ///
    /// Bash writes its prompt to stderr, so stderr is folded into stdout
    /// inside the environment.
    pub async fn open_shell(env: &Environment) -> Result<Self> {
        let inner = format!("exec /bin/bash --rcfile {SHARED_MOUNT_POINT}/{BASH_RC_FILE} -i 2>&1");
        let argv = env.attach_argv(&["/bin/bash", "-c", &inner]);
        let runner = env.runner();
        let mut session = Self::open(SessionKind::Shell, runner.as_ref(), &argv).await?;
        // +m: no job control notifications
        session.send_command("unset HISTFILE; set +m").await?;
        Ok(session)
    }

    /// Attach to the firmware CLI inside `env`.
    pub async fn open_cli(env: &Environment, command: &[String]) -> Result<Self> {
        let parts: Vec<&str> = command.iter().map(String::as_str).collect();
        let argv = env.attach_argv(&parts);
        let runner = env.runner();
        Self::open(SessionKind::Cli, runner.as_ref(), &argv).await
    }

    /// Wrap already-spawned streams. The session starts [`Unstarted`](SessionState::Unstarted).
    pub fn from_interactive(kind: SessionKind, proc: Interactive) -> Self {
        Self {
            kind,
            reader: proc.stdout,
            writer: proc.stdin,
            child: proc.child,
            state: SessionState::Unstarted,
            read_timeout: None,
            unread: 0,
        }
    }

    /// Bound every wait for a prompt.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drain everything up to and including the first prompt.
    pub async fn sync_prompt(&mut self) -> Result<()> {
        if self.state != SessionState::Unstarted {
            return Err(self.invalid_state("unstarted"));
        }
        self.state = SessionState::AwaitingPrompt;
        let banner = self.read_until_prompt().await?;
        tracing::trace!(kind = %self.kind, banner_len = banner.len(), "Prompt synchronised");
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Send one command and return its output, without the prompt.
    pub async fn send_command(&mut self, text: &str) -> Result<String> {
        self.begin_command(text).await?;
        let out = self.read_until_prompt().await?;
        self.state = SessionState::Ready;

        let out = String::from_utf8_lossy(&out).into_owned();
        tracing::trace!(kind = %self.kind, cmd = %text, output = %out, "Command completed");
        Ok(out)
    }

    /// Send one command without waiting for its output.
    ///
    /// The response is discarded before the next command is sent.
    pub async fn send_only(&mut self, text: &str) -> Result<()> {
        self.begin_command(text).await?;
        self.unread += 1;
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Terminate the process behind the session. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed && self.child.is_none() {
            return;
        }
        tracing::debug!(kind = %self.kind, "Closing session");
        self.state = SessionState::Closed;
        let _ = self.writer.shutdown().await;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                tracing::trace!(kind = %self.kind, error = %e, "Session process already gone");
            }
            let _ = child.wait().await;
        }
    }

    async fn begin_command(&mut self, text: &str) -> Result<()> {
        if self.state != SessionState::Ready {
            return Err(self.invalid_state("ready"));
        }
        if let Some(byte) = text.bytes().find(|b| RESERVED.contains(b)) {
            return Err(CoreError::ReservedByte(byte));
        }

        while self.unread > 0 {
            self.state = SessionState::AwaitingPrompt;
            let skipped = self.read_until_prompt().await?;
            tracing::trace!(kind = %self.kind, len = skipped.len(), "Discarded unread response");
            self.unread -= 1;
        }

        self.state = SessionState::AwaitingPrompt;
        let mut line = Vec::with_capacity(text.len() + 1);
        line.extend_from_slice(text.as_bytes());
        line.push(b'\n');

        let kind = self.kind;
        let write = async {
            self.writer.write_all(&line).await?;
            self.writer.flush().await
        };
        if let Err(source) = write.await {
            tracing::warn!(kind = %kind, error = %source, "Session write failed");
            self.state = SessionState::Closed;
            return Err(CoreError::SessionWrite { kind, source });
        }
        Ok(())
    }

    /// Read until a read ends with the prompt byte; return the bytes
    /// before it.
    async fn read_until_prompt(&mut self) -> Result<BytesMut> {
        let mut out = BytesMut::with_capacity(READ_CHUNK);
        let mut chunk = [0u8; READ_CHUNK];
        let kind = self.kind;

        loop {
            let read = self.reader.read(&mut chunk);
            let n = match self.read_timeout {
                Some(timeout) => tokio::time::timeout(timeout, read)
                    .await
                    .map_err(|_| CoreError::SessionTimeout { kind, timeout })??,
                None => read.await?,
            };

            // EOF: never mistake an empty read for a prompt
            if n == 0 {
                self.state = SessionState::Closed;
                return Err(CoreError::SessionClosed(kind));
            }

            out.extend_from_slice(&chunk[..n]);
            if chunk[n - 1] == SENTINEL {
                break;
            }
        }

        out.truncate(out.len() - 1);
        Ok(out)
    }

    fn invalid_state(&self, expected: &str) -> CoreError {
        CoreError::InvalidState {
            expected: format!("{} session {expected}", self.kind),
            actual: self.state.to_string(),
        }
    }
}
