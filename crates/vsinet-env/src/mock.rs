//! Scripted [`HostRunner`] for tests.
//!
//! `MockRunner` records every command line it is asked to run and answers
//! from a handler closure. Interactive processes are served by
//! [`MockShell`], which speaks the prompt-sentinel protocol over an
//! in-memory duplex pipe.

use crate::runner::{CommandOutput, HostRunner, Interactive};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Prompt byte emitted by scripted shells.
pub const PROMPT: u8 = 127;

/// PID reported by the default `inspect` reply.
const DEFAULT_PID: u32 = 4242;

/// How the mock answers one command.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Complete immediately with this output.
    Output(CommandOutput),
    /// Never complete (a hung host call).
    Hang,
}

impl Reply {
    /// Exit code 0 with the given output.
    pub fn ok(output: impl Into<String>) -> Self {
        Reply::Output(CommandOutput::new(0, output))
    }

    pub fn output(exit_code: i32, output: impl Into<String>) -> Self {
        Reply::Output(CommandOutput::new(exit_code, output))
    }
}

type Handler = dyn Fn(&[String]) -> Reply + Send + Sync;
type ShellFactory = dyn Fn(&[String]) -> MockShell + Send + Sync;
type Responder = dyn Fn(&str) -> Option<String> + Send + Sync;

/// A scripted host.
pub struct MockRunner {
    handler: Box<Handler>,
    shells: Box<ShellFactory>,
    calls: Mutex<Vec<Vec<String>>>,
    spawned: Mutex<Vec<Vec<String>>>,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRunner {
    /// PID reported by [`default_reply`](Self::default_reply) for `inspect`.
    pub const DEFAULT_PID: u32 = DEFAULT_PID;

    /// A host where every command succeeds silently and `inspect`
    /// reports a running container.
    pub fn new() -> Self {
        Self::with_handler(Self::default_reply)
    }

    /// A host answering from `handler`.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&[String]) -> Reply + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            shells: Box::new(|_| MockShell::silent()),
            calls: Mutex::new(Vec::new()),
            spawned: Mutex::new(Vec::new()),
        }
    }

    /// Serve spawned interactive processes from `factory`.
    pub fn with_shells<F>(mut self, factory: F) -> Self
    where
        F: Fn(&[String]) -> MockShell + Send + Sync + 'static,
    {
        self.shells = Box::new(factory);
        self
    }

    /// Reply used when a test does not care about a command.
    pub fn default_reply(argv: &[String]) -> Reply {
        match argv.get(1).map(String::as_str) {
            Some("inspect") => Reply::ok(format!(
                r#"[{{"State":{{"Status":"running","Running":true,"Pid":{DEFAULT_PID}}}}}]"#
            )),
            _ => Reply::ok(""),
        }
    }

    /// Every command line passed to `run`, in order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Calls whose joined command line contains `needle`.
    pub fn calls_matching(&self, needle: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|c| c.join(" "))
            .filter(|c| c.contains(needle))
            .collect()
    }

    /// Every command line passed to `spawn`, in order.
    pub fn spawned(&self) -> Vec<Vec<String>> {
        self.spawned.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl HostRunner for MockRunner {
    async fn run(&self, argv: &[String]) -> std::io::Result<CommandOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(argv.to_vec());
        }
        match (self.handler)(argv) {
            Reply::Output(out) => Ok(out),
            Reply::Hang => std::future::pending().await,
        }
    }

    async fn spawn(&self, argv: &[String]) -> std::io::Result<Interactive> {
        if let Ok(mut spawned) = self.spawned.lock() {
            spawned.push(argv.to_vec());
        }
        Ok((self.shells)(argv).start())
    }
}

/// An in-memory interactive shell.
///
/// Writes its banner followed by the prompt byte, then for every input
/// line writes the responder's output followed by the prompt byte. A
/// responder returning `None` makes the shell exit.
#[derive(Clone)]
pub struct MockShell {
    banner: String,
    responder: Arc<Responder>,
}

impl MockShell {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            banner: String::new(),
            responder: Arc::new(responder),
        }
    }

    /// A shell that answers every command with no output.
    pub fn silent() -> Self {
        Self::new(|_| Some(String::new()))
    }

    /// Output written before the first prompt.
    pub fn banner(mut self, banner: impl Into<String>) -> Self {
        self.banner = banner.into();
        self
    }

    /// Start serving and return the client side.
    pub fn start(self) -> Interactive {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);

        tokio::spawn(async move {
            let (server_read, mut server_write) = tokio::io::split(server);
            let mut first = self.banner.into_bytes();
            first.push(PROMPT);
            if server_write.write_all(&first).await.is_err() {
                return;
            }

            let mut lines = BufReader::new(server_read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let Some(response) = (self.responder)(&line) else {
                    break;
                };
                let mut bytes = response.into_bytes();
                bytes.push(PROMPT);
                if server_write.write_all(&bytes).await.is_err() {
                    break;
                }
            }
        });

        Interactive {
            stdin: Box::new(client_write),
            stdout: Box::new(client_read),
            child: None,
        }
    }
}
