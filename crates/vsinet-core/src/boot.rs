//! Switch boot sequencer.
//!
//! Brings a switch node from "environment up" to "firmware ready":
//!
//! ```text
//! environment-ready → namespace-created → ports-provisioned
//!     → interfaces-migrated → firmware-polling → ready
//!                                              ↘ tuntap-failed
//!                                              ↘ firmware-failed
//! ```
//!
//! Failed terminal states always leave a diagnostics bundle in the node's
//! shared directory before [`BootSequencer::run`] returns.

use crate::diagnostics;
use crate::error::{CoreError, Result};
use crate::kind::SwitchOptions;
use crate::readiness::{ReadinessStatus, READINESS_SCRIPT, READINESS_SCRIPT_NAME};
use crate::session::Session;
use serde::Serialize;
use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use vsinet_env::{Environment, PollError, SHARED_MOUNT_POINT};

/// States of the boot sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BootState {
    EnvironmentStarting,
    EnvironmentReady,
    NamespaceCreated,
    PortsProvisioned,
    InterfacesMigrated,
    FirmwarePolling,
    Ready,
    TuntapFailed,
    FirmwareFailed,
}

impl BootState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BootState::Ready | BootState::TuntapFailed | BootState::FirmwareFailed
        )
    }
}

impl fmt::Display for BootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BootState::EnvironmentStarting => "environment-starting",
            BootState::EnvironmentReady => "environment-ready",
            BootState::NamespaceCreated => "namespace-created",
            BootState::PortsProvisioned => "ports-provisioned",
            BootState::InterfacesMigrated => "interfaces-migrated",
            BootState::FirmwarePolling => "firmware-polling",
            BootState::Ready => "ready",
            BootState::TuntapFailed => "tuntap-failed",
            BootState::FirmwareFailed => "firmware-failed",
        };
        f.write_str(s)
    }
}

/// Why the firmware was judged not ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FirmwareFailure {
    /// The daemon never started
    ProcessNotRunning(String),
    /// The daemon started but the readiness counter never incremented
    CounterStuck,
    /// The readiness script reported nothing within the poll deadline
    Timeout,
    /// The status line did not match any known outcome
    Unrecognized(String),
}

impl fmt::Display for FirmwareFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirmwareFailure::ProcessNotRunning(daemon) => write!(f, "{daemon} not running"),
            FirmwareFailure::CounterStuck => write!(f, "readiness counter not incremented"),
            FirmwareFailure::Timeout => write!(f, "no readiness status reported"),
            FirmwareFailure::Unrecognized(line) => write!(f, "unrecognized status `{line}`"),
        }
    }
}

/// Outcome of booting one switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BootResult {
    Ok,
    TuntapFailed { port: String },
    FirmwareFailed { failure: FirmwareFailure },
}

impl BootResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, BootResult::Ok)
    }

    fn terminal_state(&self) -> BootState {
        match self {
            BootResult::Ok => BootState::Ready,
            BootResult::TuntapFailed { .. } => BootState::TuntapFailed,
            BootResult::FirmwareFailed { .. } => BootState::FirmwareFailed,
        }
    }
}

impl fmt::Display for BootResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootResult::Ok => write!(f, "ok"),
            BootResult::TuntapFailed { port } => write!(f, "tuntap-failed (port {port})"),
            BootResult::FirmwareFailed { failure } => write!(f, "firmware-failed ({failure})"),
        }
    }
}

/// What the sequencer reports back to its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootReport {
    pub result: BootResult,
    /// Diagnostics report, present whenever `result` is not `Ok`
    pub diagnostics: Option<PathBuf>,
    pub final_state: BootState,
    /// Namespace holding the data-plane interfaces, for namespaced kinds
    pub namespace: Option<String>,
}

/// Report plus the sessions opened along the way.
#[derive(Debug)]
pub struct BootOutcome {
    pub report: BootReport,
    /// Raw shell, opened once interfaces are migrated
    pub shell: Option<Session>,
    /// Configuration CLI, opened only when the firmware is ready
    pub cli: Option<Session>,
}

/// Runs the boot sequence for one switch environment.
pub struct BootSequencer<'a> {
    env: &'a Environment,
    opts: &'a SwitchOptions,
    state: BootState,
}

impl<'a> BootSequencer<'a> {
    pub fn new(env: &'a Environment, opts: &'a SwitchOptions) -> Self {
        Self {
            env,
            opts,
            state: BootState::EnvironmentStarting,
        }
    }

    pub fn state(&self) -> BootState {
        self.state
    }

    /// Run the sequence. `interfaces` are the link interfaces already
    /// created in the environment's default namespace.
    ///
    /// Terminal failures are reported in [`BootReport::result`]; `Err` is
    /// reserved for host errors that stop the sequence from running at all.
    pub async fn run(mut self, interfaces: &[String]) -> Result<BootOutcome> {
        let start = std::time::Instant::now();
        tracing::info!(env_id = %self.env.id(), ports = self.opts.num_ports, "Booting switch");
        self.transition(BootState::EnvironmentReady);

        let namespace = self.resolve_namespace().await?;
        self.transition(BootState::NamespaceCreated);

        match self.provision_ports(&namespace, interfaces).await {
            Ok(()) => {}
            Err(CoreError::PortProvisionTimeout { port, .. }) => {
                let outcome = self
                    .fail(BootResult::TuntapFailed { port }, namespace, None)
                    .await;
                return Ok(outcome);
            }
            Err(e) => return Err(e),
        }
        self.transition(BootState::PortsProvisioned);

        self.migrate_interfaces(&namespace, interfaces).await?;
        self.transition(BootState::InterfacesMigrated);

        self.install_readiness_script().await?;
        let mut shell = Session::open_shell(self.env).await?;
        self.transition(BootState::FirmwarePolling);

        let status = self.poll_readiness(&mut shell).await?;
        let failure = match status {
            Some(ReadinessStatus::Ready) => None,
            Some(ReadinessStatus::ProcessNotRunning(daemon)) => {
                Some(FirmwareFailure::ProcessNotRunning(daemon))
            }
            Some(ReadinessStatus::CounterStuck) => Some(FirmwareFailure::CounterStuck),
            Some(ReadinessStatus::Unrecognized(line)) => Some(FirmwareFailure::Unrecognized(line)),
            None => Some(FirmwareFailure::Timeout),
        };
        if let Some(failure) = failure {
            let outcome = self
                .fail(BootResult::FirmwareFailed { failure }, namespace, Some(shell))
                .await;
            return Ok(outcome);
        }

        let cli = Session::open_cli(self.env, &self.opts.cli_command).await?;
        self.transition(BootState::Ready);
        tracing::info!(
            env_id = %self.env.id(),
            namespace = %namespace,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Switch ready"
        );

        Ok(BootOutcome {
            report: BootReport {
                result: BootResult::Ok,
                diagnostics: None,
                final_state: self.state,
                namespace: Some(namespace),
            },
            shell: Some(shell),
            cli: Some(cli),
        })
    }

    fn transition(&mut self, to: BootState) {
        tracing::debug!(env_id = %self.env.id(), from = %self.state, to = %to, "Boot state change");
        self.state = to;
    }

    /// Use the configured namespace, an alternately named one the image
    /// already created, or create the configured one.
    async fn resolve_namespace(&self) -> Result<String> {
        let out = self.env.run("ip netns list").await?;
        let existing: Vec<&str> = out
            .lines()
            .filter_map(|l| l.split_whitespace().next())
            .collect();

        if existing.contains(&self.opts.namespace.as_str()) {
            return Ok(self.opts.namespace.clone());
        }
        if let Some(alt) = self
            .opts
            .alt_namespaces
            .iter()
            .find(|alt| existing.contains(&alt.as_str()))
        {
            tracing::debug!(
                env_id = %self.env.id(),
                namespace = %alt,
                "Using pre-existing namespace"
            );
            return Ok(alt.clone());
        }

        self.env
            .run_checked(&format!("ip netns add {}", self.opts.namespace))
            .await?;
        tracing::debug!(
            env_id = %self.env.id(),
            namespace = %self.opts.namespace,
            "Namespace created"
        );
        Ok(self.opts.namespace.clone())
    }

    /// Create tap devices for the ports not backed by a link, stopping at
    /// the first one that does not complete within the bound.
    async fn provision_ports(&self, namespace: &str, interfaces: &[String]) -> Result<()> {
        let names = self.opts.tap_names(interfaces);
        tracing::debug!(env_id = %self.env.id(), count = names.len(), "Provisioning tap ports");

        for name in names {
            let cmd = format!("/sbin/ip tuntap add dev {name} mode tap");
            let create = self.env.exec_in_namespace(namespace, &cmd);
            match tokio::time::timeout(self.opts.tuntap_timeout, create).await {
                Ok(out) => {
                    let out = out?;
                    if !out.success() {
                        tracing::warn!(
                            env_id = %self.env.id(),
                            port = %name,
                            output = %out.output.trim(),
                            "Tap creation reported an error"
                        );
                    }
                }
                Err(_) => {
                    tracing::error!(
                        env_id = %self.env.id(),
                        port = %name,
                        timeout_ms = self.opts.tuntap_timeout.as_millis() as u64,
                        "Tap creation timed out"
                    );
                    return Err(CoreError::PortProvisionTimeout {
                        port: name,
                        timeout: self.opts.tuntap_timeout,
                    });
                }
            }
        }
        Ok(())
    }

    async fn migrate_interfaces(&self, namespace: &str, interfaces: &[String]) -> Result<()> {
        let companion = self
            .opts
            .companion
            .as_ref()
            .filter(|c| c.namespace == namespace);

        for iface in interfaces.iter().filter(|i| i.as_str() != "lo") {
            self.env
                .run_checked(&format!("/sbin/ip link set {iface} netns {namespace}"))
                .await?;
            self.env
                .exec_in_namespace(namespace, &format!("/sbin/ip link set {iface} up"))
                .await?;

            if let Some(companion) = companion {
                let Some(index) = iface.parse::<u32>().ok().and_then(|n| n.checked_sub(1)) else {
                    tracing::warn!(
                        env_id = %self.env.id(),
                        iface = %iface,
                        "Port is not numbered, not registered"
                    );
                    continue;
                };
                let control = companion.control_command.join(" ");
                self.env
                    .run_checked(&format!("echo port_add {iface} {index} | {control}"))
                    .await?;
            }
            tracing::trace!(
                env_id = %self.env.id(),
                iface = %iface,
                namespace = %namespace,
                "Interface migrated"
            );
        }
        Ok(())
    }

    async fn install_readiness_script(&self) -> Result<()> {
        let shared = self.env.shared_dir();
        let script = shared.join(READINESS_SCRIPT_NAME);
        tokio::fs::write(&script, READINESS_SCRIPT).await?;
        tokio::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).await?;

        // A status line from a previous run must not be mistaken for ours
        match tokio::fs::remove_file(shared.join(diagnostics::DIAGNOSTICS_FILE)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Run the readiness script through the raw shell, then wait for its
    /// status line. `None` means the poll deadline elapsed.
    async fn poll_readiness(&self, shell: &mut Session) -> Result<Option<ReadinessStatus>> {
        let cmd = format!(
            "{SHARED_MOUNT_POINT}/{READINESS_SCRIPT_NAME} {}",
            self.opts.firmware_process
        );
        shell.send_command(&cmd).await?;

        let status_file = self.env.shared_dir().join(diagnostics::DIAGNOSTICS_FILE);
        let polled = self
            .opts
            .readiness_poll
            .run("firmware readiness", || {
                let path = status_file.clone();
                async move {
                    match tokio::fs::read_to_string(&path).await {
                        Ok(contents) => Ok(ReadinessStatus::from_log(&contents)),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            })
            .await;

        match polled {
            Ok(status) => {
                tracing::info!(env_id = %self.env.id(), status = ?status, "Firmware status read");
                Ok(Some(status))
            }
            Err(PollError::Deadline { .. }) => Ok(None),
            Err(PollError::Probe(e)) => Err(e.into()),
        }
    }

    async fn fail(
        mut self,
        result: BootResult,
        namespace: String,
        shell: Option<Session>,
    ) -> BootOutcome {
        self.transition(result.terminal_state());
        tracing::error!(env_id = %self.env.id(), result = %result, "Switch boot failed");

        let diagnostics = match diagnostics::collect(self.env, self.opts, &result).await {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::error!(
                    env_id = %self.env.id(),
                    error = %e,
                    "Failed to collect diagnostics"
                );
                None
            }
        };

        BootOutcome {
            report: BootReport {
                result,
                diagnostics,
                final_state: self.state,
                namespace: Some(namespace),
            },
            shell,
            cli: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::CompanionConfig;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use vsinet_env::mock::{MockRunner, MockShell, Reply};
    use vsinet_env::{EnvironmentBuilder, PollPolicy};

    /// Shells that answer the readiness script by writing `status` to the
    /// shared directory.
    fn firmware_shells(
        shared: std::path::PathBuf,
        status: &'static str,
    ) -> impl Fn(&[String]) -> MockShell + Send + Sync + 'static {
        move |_| {
            let shared = shared.clone();
            MockShell::new(move |line| {
                if line.contains(READINESS_SCRIPT_NAME) {
                    std::fs::write(shared.join("logs"), status).ok()?;
                }
                Some(String::new())
            })
        }
    }

    async fn switch_env(dir: &Path, runner: Arc<MockRunner>) -> Environment {
        EnvironmentBuilder::new("t1-s1", "switch:latest")
            .node_dir(dir.join("s1"))
            .start_poll(PollPolicy::unbounded(Duration::from_millis(1)))
            .build(runner)
            .await
            .unwrap()
    }

    fn opts(num_ports: u16) -> SwitchOptions {
        SwitchOptions {
            num_ports,
            syslog_path: "/nonexistent/syslog".into(),
            readiness_poll: PollPolicy::fixed(Duration::from_millis(10), Duration::from_secs(1)),
            ..Default::default()
        }
    }

    fn interfaces() -> Vec<String> {
        vec!["1".to_string()]
    }

    #[tokio::test]
    async fn test_successful_boot() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("s1").join("shared");
        let runner = Arc::new(MockRunner::new().with_shells(firmware_shells(shared, "Success\n")));
        let env = switch_env(dir.path(), runner.clone()).await;
        let opts = opts(2);

        let outcome = BootSequencer::new(&env, &opts).run(&interfaces()).await.unwrap();

        assert_eq!(outcome.report.result, BootResult::Ok);
        assert_eq!(outcome.report.final_state, BootState::Ready);
        assert_eq!(outcome.report.namespace.as_deref(), Some("swns"));
        assert!(outcome.report.diagnostics.is_none());
        assert!(outcome.shell.is_some());
        assert!(outcome.cli.is_some());

        assert_eq!(runner.calls_matching("ip netns add swns").len(), 1);
        // port 1 is backed by a link, only port 2 gets a tap device
        assert_eq!(runner.calls_matching("tuntap add").len(), 1);
        assert_eq!(runner.calls_matching("tuntap add dev 2 mode tap").len(), 1);
        assert_eq!(runner.calls_matching("/sbin/ip link set 1 netns swns").len(), 1);
        assert_eq!(runner.calls_matching("ip netns exec swns /sbin/ip link set 1 up").len(), 1);

        let spawned = runner.spawned();
        assert_eq!(spawned.len(), 2);
        assert!(spawned[1].contains(&"/usr/bin/vtysh".to_string()));
        assert!(env.shared_dir().join(READINESS_SCRIPT_NAME).exists());
    }

    #[tokio::test]
    async fn test_existing_alternate_namespace_reused() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("s1").join("shared");
        let runner = Arc::new(
            MockRunner::with_handler(|argv| {
                if argv.last().map(String::as_str) == Some("ip netns list") {
                    Reply::ok("emulns (id: 0)\n")
                } else {
                    MockRunner::default_reply(argv)
                }
            })
            .with_shells(firmware_shells(shared, "Success\n")),
        );
        let env = switch_env(dir.path(), runner.clone()).await;
        let mut opts = opts(1);
        opts.companion = Some(CompanionConfig {
            namespace: "emulns".into(),
            control_command: vec!["/usr/bin/bm_tools/runtime_CLI.py".into()],
        });

        let outcome = BootSequencer::new(&env, &opts)
            .run(&["1".to_string(), "lo".to_string()])
            .await
            .unwrap();

        assert_eq!(outcome.report.namespace.as_deref(), Some("emulns"));
        assert!(runner.calls_matching("netns add").is_empty());
        assert_eq!(
            runner
                .calls_matching("echo port_add 1 0 | /usr/bin/bm_tools/runtime_CLI.py")
                .len(),
            1
        );
        assert!(runner.calls_matching("set lo netns").is_empty());
    }

    #[tokio::test]
    async fn test_daemon_not_running_is_firmware_failure_with_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("s1").join("shared");
        let status = "Failure: switchd not running\n";
        let runner = Arc::new(MockRunner::new().with_shells(firmware_shells(shared, status)));
        let env = switch_env(dir.path(), runner.clone()).await;
        let opts = opts(1);

        let outcome = BootSequencer::new(&env, &opts).run(&interfaces()).await.unwrap();

        assert_eq!(
            outcome.report.result,
            BootResult::FirmwareFailed {
                failure: FirmwareFailure::ProcessNotRunning("switchd".into())
            }
        );
        assert_eq!(outcome.report.final_state, BootState::FirmwareFailed);
        assert!(outcome.cli.is_none());

        let path = outcome.report.diagnostics.expect("diagnostics");
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.starts_with("Failure: switchd not running"));
        assert!(text.contains("Environment: t1-s1"));
        // only the raw shell was spawned
        assert_eq!(runner.spawned().len(), 1);
    }

    #[tokio::test]
    async fn test_counter_stuck_is_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("s1").join("shared");
        let status = "Failure: cur_hw not incremented\n";
        let runner = Arc::new(MockRunner::new().with_shells(firmware_shells(shared, status)));
        let env = switch_env(dir.path(), runner).await;
        let opts = opts(1);

        let outcome = BootSequencer::new(&env, &opts).run(&interfaces()).await.unwrap();
        assert_eq!(
            outcome.report.result,
            BootResult::FirmwareFailed {
                failure: FirmwareFailure::CounterStuck
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_script_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::new());
        let env = switch_env(dir.path(), runner).await;
        let opts = opts(1);

        let outcome = BootSequencer::new(&env, &opts).run(&interfaces()).await.unwrap();
        assert_eq!(
            outcome.report.result,
            BootResult::FirmwareFailed {
                failure: FirmwareFailure::Timeout
            }
        );
        assert!(outcome.report.diagnostics.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_tap_creation_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::with_handler(|argv| {
            let cmd = argv.last().map(String::as_str).unwrap_or_default();
            if cmd.contains("tuntap add dev 3 ") {
                Reply::Hang
            } else {
                MockRunner::default_reply(argv)
            }
        }));
        let env = switch_env(dir.path(), runner.clone()).await;
        let opts = opts(5);

        let started = tokio::time::Instant::now();
        let outcome = BootSequencer::new(&env, &opts).run(&interfaces()).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(outcome.report.result, BootResult::TuntapFailed { port: "3".into() });
        assert_eq!(outcome.report.final_state, BootState::TuntapFailed);
        assert!(elapsed >= opts.tuntap_timeout);
        assert!(elapsed < opts.tuntap_timeout + Duration::from_secs(1));

        assert!(runner.calls_matching("tuntap add dev 4").is_empty());
        assert!(runner.calls_matching("tuntap add dev 5").is_empty());
        assert!(runner.calls_matching("netns swns").is_empty());
        assert!(runner.spawned().is_empty());
        assert!(outcome.report.diagnostics.is_some());
    }

    #[test]
    fn test_boot_result_json() {
        let result = BootResult::FirmwareFailed {
            failure: FirmwareFailure::ProcessNotRunning("switchd".into()),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["result"], "firmware_failed");
        assert_eq!(json["failure"]["reason"], "process_not_running");
        assert_eq!(json["failure"]["detail"], "switchd");
    }
}
