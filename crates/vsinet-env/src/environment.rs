//! Environment type - one running container bound to one emulated node.

use crate::config::{bash_rc_path, EnvironmentConfig};
use crate::error::{EnvError, Result};
use crate::poll::PollError;
use crate::runner::{argv, CommandOutput, HostRunner};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Prompt configuration written for the node's raw shell.
///
/// The prompt is the single byte 127, which interactive sessions use to
/// detect that the shell is waiting for input.
const BASH_RC_CONTENTS: &str = "export PS1='\x7f'\n";

/// Current state of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvState {
    /// Container is running
    Running,
    /// Container has been removed
    Destroyed,
}

impl fmt::Display for EnvState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvState::Running => write!(f, "running"),
            EnvState::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// The subset of `inspect` output we rely on.
#[derive(Debug, Deserialize)]
struct InspectRecord {
    #[serde(rename = "State")]
    state: InspectState,
}

#[derive(Debug, Deserialize)]
struct InspectState {
    #[serde(rename = "Pid", default)]
    pid: u32,
    #[serde(rename = "Status", default)]
    status: String,
}

/// A running container hosting one node.
pub struct Environment {
    config: EnvironmentConfig,
    runner: Arc<dyn HostRunner>,
    pid: u32,
    state: EnvState,
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("id", &self.config.id)
            .field("pid", &self.pid)
            .field("state", &self.state)
            .finish()
    }
}

impl Environment {
    /// Create and start an environment.
    ///
    /// This will:
    /// 1. Force-remove any stale container with the same id
    /// 2. Create the node and shared directories and the prompt rc file
    /// 3. Start the container
    /// 4. Wait until its init process reports a non-zero PID
    ///
    /// # Errors
    /// Returns [`EnvError::StartFailure`] if the runtime fails to start the
    /// container; the runtime output and daemon log tail are attached.
    pub async fn create(config: EnvironmentConfig, runner: Arc<dyn HostRunner>) -> Result<Self> {
        config.validate()?;
        let start = std::time::Instant::now();
        let id = config.id.clone();
        tracing::info!(env_id = %id, image = %config.image, "Creating environment");

        // Left over from a crashed run, if anything
        force_remove(runner.as_ref(), &config.runtime, &id).await?;

        let shared_dir = config.shared_dir();
        tokio::fs::create_dir_all(&shared_dir).await?;
        tokio::fs::write(bash_rc_path(&shared_dir), BASH_RC_CONTENTS).await?;
        tracing::debug!(env_id = %id, path = %shared_dir.display(), "Shared directory ready");

        let run = config.run_argv();
        let out = runner.run(&run).await?;
        if !out.success() {
            tracing::error!(
                env_id = %id,
                exit_code = out.exit_code,
                cmd = %run.join(" "),
                output = %out.output.trim(),
                "Failed to start environment"
            );
            let daemon_log = config.daemon_log.dump().await;
            if let Err(e) = force_remove(runner.as_ref(), &config.runtime, &id).await {
                tracing::warn!(env_id = %id, error = %e, "Failed to remove partial environment");
            }
            return Err(EnvError::StartFailure {
                id,
                exit_code: out.exit_code,
                output: out.output,
                daemon_log,
            });
        }

        let pid = {
            let runner: &dyn HostRunner = runner.as_ref();
            let runtime = config.runtime.as_str();
            let env_id = id.as_str();
            config
                .start_poll
                .run("environment pid", move || inspect_pid(runner, runtime, env_id))
                .await
                .map_err(|e| match e {
                    PollError::Deadline { deadline, .. } => EnvError::PollDeadline {
                        what: format!("environment {env_id} to start"),
                        elapsed: deadline,
                    },
                    PollError::Probe(e) => e,
                })?
        };

        tracing::info!(
            env_id = %id,
            pid,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Environment started"
        );

        Ok(Self {
            config,
            runner,
            pid,
            state: EnvState::Running,
        })
    }

    /// Get the environment id.
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// PID of the environment's init process on the host.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Get the current state.
    pub fn state(&self) -> EnvState {
        self.state
    }

    /// Get the configuration used to create this environment.
    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    /// Host directory holding this node's artifacts.
    pub fn node_dir(&self) -> &Path {
        &self.config.node_dir
    }

    /// Host side of the `/shared` mount.
    pub fn shared_dir(&self) -> PathBuf {
        self.config.shared_dir()
    }

    /// The host runner this environment was created with.
    pub fn runner(&self) -> Arc<dyn HostRunner> {
        Arc::clone(&self.runner)
    }

    /// Run a shell command inside the environment.
    ///
    /// Returns exit code and combined output; a non-zero exit code is not
    /// an error.
    pub async fn run(&self, cmd: &str) -> Result<CommandOutput> {
        self.exec(&["sh", "-c", cmd]).await
    }

    /// Run a pre-split command inside the environment.
    pub async fn exec(&self, command: &[&str]) -> Result<CommandOutput> {
        self.ensure_running()?;
        let mut full = argv([self.config.runtime.as_str(), "exec", self.id()]);
        full.extend(command.iter().map(|s| s.to_string()));

        tracing::debug!(env_id = %self.id(), cmd = %command.join(" "), "Executing command");
        let out = self.runner.run(&full).await?;
        tracing::trace!(
            env_id = %self.id(),
            exit_code = out.exit_code,
            output = %out.output,
            "Command completed"
        );
        Ok(out)
    }

    /// Run a shell command inside the named network namespace of the environment.
    pub async fn exec_in_namespace(&self, namespace: &str, cmd: &str) -> Result<CommandOutput> {
        self.run(&format!("ip netns exec {namespace} {cmd}")).await
    }

    /// Like [`run`](Self::run) but fails on a non-zero exit code.
    pub async fn run_checked(&self, cmd: &str) -> Result<CommandOutput> {
        let out = self.run(cmd).await?;
        if !out.success() {
            return Err(EnvError::runtime(
                &argv(["sh", "-c", cmd]),
                out.exit_code,
                &out.output,
            ));
        }
        Ok(out)
    }

    /// Container logs as reported by the runtime.
    pub async fn logs(&self) -> Result<String> {
        let out = self
            .runner
            .run(&argv([self.config.runtime.as_str(), "logs", self.id()]))
            .await?;
        Ok(out.output)
    }

    /// Argv that attaches an interactive process to this environment.
    pub fn attach_argv(&self, command: &[&str]) -> Vec<String> {
        let mut full = argv([self.config.runtime.as_str(), "exec", "-i", self.id()]);
        full.extend(command.iter().map(|s| s.to_string()));
        full
    }

    /// Force-remove the container.
    ///
    /// Safe to call more than once.
    pub async fn destroy(&mut self) -> Result<()> {
        if self.state == EnvState::Destroyed {
            tracing::trace!(env_id = %self.id(), "Environment already destroyed");
            return Ok(());
        }
        tracing::info!(env_id = %self.id(), "Destroying environment");
        force_remove(self.runner.as_ref(), &self.config.runtime, &self.config.id).await?;
        self.state = EnvState::Destroyed;
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.state != EnvState::Running {
            return Err(EnvError::InvalidState {
                expected: EnvState::Running.to_string(),
                actual: self.state.to_string(),
            });
        }
        Ok(())
    }
}

/// Snapshot of all environments known to the runtime (`ps -a`).
pub async fn list_all(runner: &dyn HostRunner, runtime: &str) -> Result<String> {
    let out = runner.run(&argv([runtime, "ps", "-a"])).await?;
    Ok(out.output)
}

/// `rm -f <id>`, treating "no such container" as success.
async fn force_remove(runner: &dyn HostRunner, runtime: &str, id: &str) -> Result<()> {
    let cmd = argv([runtime, "rm", "-f", id]);
    let out = runner.run(&cmd).await?;
    if out.success() || is_not_found(&out.output) {
        tracing::trace!(env_id = %id, "Environment removed (or absent)");
        return Ok(());
    }
    Err(EnvError::runtime(&cmd, out.exit_code, &out.output))
}

fn is_not_found(output: &str) -> bool {
    let lower = output.to_ascii_lowercase();
    lower.contains("no such container") || lower.contains("no such object")
}

/// One poll step: `Some(pid)` once the init process is up.
async fn inspect_pid(runner: &dyn HostRunner, runtime: &str, id: &str) -> Result<Option<u32>> {
    let out = runner.run(&argv([runtime, "inspect", id])).await?;
    if !out.success() {
        // Not registered yet
        return Ok(None);
    }
    let records: Vec<InspectRecord> = serde_json::from_str(out.output.trim())?;
    let record = records
        .into_iter()
        .next()
        .ok_or_else(|| EnvError::Inspect(format!("no inspect record for {id}")))?;

    if record.state.pid == 0 {
        tracing::trace!(env_id = %id, status = %record.state.status, "Environment has no PID yet");
        return Ok(None);
    }
    Ok(Some(record.state.pid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockRunner, Reply};
    use crate::poll::PollPolicy;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn config(dir: &Path) -> EnvironmentConfig {
        EnvironmentConfig {
            id: "t1-h1".into(),
            image: "ubuntu:latest".into(),
            node_dir: dir.join("h1"),
            start_poll: PollPolicy::unbounded(Duration::from_millis(10)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_writes_shared_dir_and_prompt_rc() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::new());
        let created = Environment::create(config(dir.path()), runner.clone()).await;
        let env = tokio_test::assert_ok!(created);

        assert_eq!(env.pid(), MockRunner::DEFAULT_PID);
        assert_eq!(env.state(), EnvState::Running);
        let rc = std::fs::read(env.shared_dir().join(crate::BASH_RC_FILE)).unwrap();
        assert!(rc.contains(&127u8));
        assert!(rc.starts_with(b"export PS1="));
    }

    #[tokio::test]
    async fn test_create_removes_stale_environment_first() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::new());
        Environment::create(config(dir.path()), runner.clone()).await.unwrap();

        let calls = runner.calls();
        let rm = calls.iter().position(|c| c[1] == "rm").unwrap();
        let run = calls.iter().position(|c| c[1] == "run").unwrap();
        assert!(rm < run);
        assert_eq!(calls[rm], vec!["docker", "rm", "-f", "t1-h1"]);
    }

    #[tokio::test]
    async fn test_stale_removal_error_other_than_not_found_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::with_handler(|argv| {
            if argv[1] == "rm" {
                Reply::output(1, "Cannot connect to the Docker daemon")
            } else {
                MockRunner::default_reply(argv)
            }
        }));
        let err = Environment::create(config(dir.path()), runner).await.unwrap_err();
        assert!(matches!(err, EnvError::Runtime { .. }));
    }

    #[tokio::test]
    async fn test_start_failure_captures_output_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::with_handler(|argv| match argv[1].as_str() {
            "rm" => Reply::output(1, "Error: No such container: t1-h1"),
            "run" => Reply::output(125, "pull access denied"),
            _ => MockRunner::default_reply(argv),
        }));
        let mut cfg = config(dir.path());
        cfg.daemon_log.candidates.clear();

        let err = Environment::create(cfg, runner.clone()).await.unwrap_err();
        match err {
            EnvError::StartFailure { id, exit_code, output, .. } => {
                assert_eq!(id, "t1-h1");
                assert_eq!(exit_code, 125);
                assert!(output.contains("pull access denied"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        // stale removal + partial cleanup
        let rms = runner.calls().iter().filter(|c| c[1] == "rm").count();
        assert_eq!(rms, 2);
        assert!(!runner.calls().iter().any(|c| c[1] == "inspect"));
    }

    #[tokio::test]
    async fn test_waits_for_nonzero_pid() {
        let dir = tempfile::tempdir().unwrap();
        let polls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&polls);
        let runner = Arc::new(MockRunner::with_handler(move |argv| {
            if argv[1] == "inspect" {
                let n = seen.fetch_add(1, Ordering::SeqCst);
                let pid = if n < 3 { 0 } else { 777 };
                Reply::output(0, format!(r#"[{{"State":{{"Pid":{pid},"Status":"created"}}}}]"#))
            } else {
                MockRunner::default_reply(argv)
            }
        }));
        let env = Environment::create(config(dir.path()), runner).await.unwrap();
        assert_eq!(env.pid(), 777);
        assert_eq!(polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_run_wraps_in_exec() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::new());
        let env = Environment::create(config(dir.path()), runner.clone()).await.unwrap();
        env.exec_in_namespace("swns", "ip link").await.unwrap();

        let last = runner.calls().pop().unwrap();
        assert_eq!(
            last,
            vec!["docker", "exec", "t1-h1", "sh", "-c", "ip netns exec swns ip link"]
        );
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::new());
        let mut env = Environment::create(config(dir.path()), runner.clone()).await.unwrap();
        env.destroy().await.unwrap();
        env.destroy().await.unwrap();

        assert_eq!(env.state(), EnvState::Destroyed);
        assert!(env.run("true").await.is_err());
        // one rm on create, one on the first destroy
        assert_eq!(runner.calls().iter().filter(|c| c[1] == "rm").count(), 2);
    }

    #[tokio::test]
    async fn test_attach_argv() {
        let dir = tempfile::tempdir().unwrap();
        let env = Environment::create(config(dir.path()), Arc::new(MockRunner::new()))
            .await
            .unwrap();
        assert_eq!(
            env.attach_argv(&["/usr/bin/vtysh", "-t"]),
            vec!["docker", "exec", "-i", "t1-h1", "/usr/bin/vtysh", "-t"]
        );
    }

    #[test]
    fn test_inspect_record_decode() {
        let json = r#"[{"Id":"abc","State":{"Status":"running","Running":true,"Pid":4321}}]"#;
        let records: Vec<InspectRecord> = serde_json::from_str(json).unwrap();
        assert_eq!(records[0].state.pid, 4321);
        assert_eq!(records[0].state.status, "running");
    }
}
