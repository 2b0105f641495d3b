//! Node type - one emulated host, switch or routing peer.

use crate::boot::{BootReport, BootResult, BootSequencer, BootState};
use crate::config::{NodeConfig, NodeId};
use crate::error::{CoreError, Result};
use crate::kind::{BootStrategy, NodeKind, PeeringOptions};
use crate::link::Endpoint;
use crate::session::Session;
use std::fmt;
use std::sync::Arc;
use vsinet_env::{EnvError, Environment, HostRunner, PollError};

/// A running node: its environment plus the sessions opened on it.
pub struct Node {
    config: NodeConfig,
    env: Environment,
    shell: Option<Session>,
    cli: Option<Session>,
    interfaces: Vec<String>,
    boot: Option<BootReport>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.config.id)
            .field("kind", &self.config.kind.profile().label)
            .field("env", &self.env)
            .field("interfaces", &self.interfaces)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Create the node's environment.
    ///
    /// The environment starts immediately so a bad image or runtime
    /// problem surfaces when the node is added, not when it is started.
    pub async fn create(config: NodeConfig, runner: Arc<dyn HostRunner>) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            node = %config.id.name,
            kind = config.kind.profile().label,
            image = %config.image,
            "Creating node"
        );
        let env = Environment::create(config.to_environment_config(), runner).await?;

        Ok(Self {
            config,
            env,
            shell: None,
            cli: None,
            interfaces: Vec::new(),
            boot: None,
        })
    }

    pub fn id(&self) -> &NodeId {
        &self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.id.name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.config.kind
    }

    /// PID of the node's init process on the host.
    pub fn pid(&self) -> u32 {
        self.env.pid()
    }

    /// The underlying environment.
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Link interfaces attached to this node, in creation order.
    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    /// Boot report, once started.
    pub fn boot_report(&self) -> Option<&BootReport> {
        self.boot.as_ref()
    }

    /// Link endpoint for `iface` inside this node's network namespace.
    pub fn endpoint(&self, iface: impl Into<String>) -> Endpoint {
        Endpoint::new(self.name(), Some(self.pid()), iface)
    }

    /// Record an interface created by a link.
    pub fn add_interface(&mut self, iface: impl Into<String>) {
        self.interfaces.push(iface.into());
    }

    /// Bring the node to a usable state according to its kind.
    ///
    /// Switch boot failures are returned as a report, not an error, so the
    /// caller can decide how to abort.
    pub async fn start(&mut self) -> Result<BootReport> {
        if self.boot.is_some() {
            return Err(CoreError::InvalidState {
                expected: "not started".into(),
                actual: "started".into(),
            });
        }
        let start = std::time::Instant::now();
        let profile = self.config.kind.profile();
        tracing::info!(node = %self.name(), kind = profile.label, "Starting node");

        let report = match (&self.config.kind, profile.boot) {
            (NodeKind::Switch(opts), BootStrategy::SwitchSequencer) => {
                let outcome = BootSequencer::new(&self.env, opts).run(&self.interfaces).await?;
                self.shell = outcome.shell;
                self.cli = outcome.cli;
                outcome.report
            }
            (NodeKind::PeeringFirmware(opts), BootStrategy::PeeringDaemon) => {
                self.shell = Some(Session::open_shell(&self.env).await?);
                start_peering(&self.env, opts).await?;
                ready_report()
            }
            _ => {
                self.shell = Some(Session::open_shell(&self.env).await?);
                ready_report()
            }
        };

        tracing::info!(
            node = %self.name(),
            result = %report.result,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Node started"
        );
        self.boot = Some(report.clone());
        Ok(report)
    }

    /// Run a command through the raw shell and return its output.
    pub async fn cmd(&mut self, text: &str) -> Result<String> {
        self.shell_mut()?.send_command(text).await
    }

    /// Send a command through the raw shell without waiting for output.
    pub async fn cmd_nowait(&mut self, text: &str) -> Result<()> {
        self.shell_mut()?.send_only(text).await
    }

    /// Run a command in the switch isolation namespace. Other kinds run it
    /// in the node's default namespace.
    pub async fn ns_cmd(&mut self, text: &str) -> Result<String> {
        let namespace = self.boot.as_ref().and_then(|r| r.namespace.clone());
        match namespace {
            Some(ns) => self.cmd(&format!("ip netns exec {ns} {text}")).await,
            None => self.cmd(text).await,
        }
    }

    /// Run a configuration CLI command.
    ///
    /// Switches use their interactive CLI session; other kinds run a
    /// one-shot `vtysh -c`.
    pub async fn cli(&mut self, text: &str) -> Result<String> {
        if let Some(cli) = self.cli.as_mut() {
            return cli.send_command(text).await;
        }
        if self.config.kind.is_switch() {
            return Err(CoreError::InvalidState {
                expected: "switch CLI open".into(),
                actual: self.state_label(),
            });
        }
        let out = self.env.exec(&["vtysh", "-c", text]).await?;
        Ok(out.output)
    }

    /// Close sessions and remove the environment. Safe to call repeatedly.
    pub async fn destroy(&mut self) -> Result<()> {
        if let Some(mut cli) = self.cli.take() {
            cli.close().await;
        }
        if let Some(mut shell) = self.shell.take() {
            shell.close().await;
        }
        self.env.destroy().await?;
        tracing::debug!(node = %self.name(), "Node destroyed");
        Ok(())
    }

    fn shell_mut(&mut self) -> Result<&mut Session> {
        let actual = self.state_label();
        self.shell.as_mut().ok_or(CoreError::InvalidState {
            expected: "shell open".into(),
            actual,
        })
    }

    fn state_label(&self) -> String {
        match &self.boot {
            None => "not started".to_string(),
            Some(report) => report.final_state.to_string(),
        }
    }
}

fn ready_report() -> BootReport {
    BootReport {
        result: BootResult::Ok,
        diagnostics: None,
        final_state: BootState::Ready,
        namespace: None,
    }
}

/// Wait for the routing daemon, then drop the ASN baked into the image.
async fn start_peering(env: &Environment, opts: &PeeringOptions) -> Result<()> {
    let probe = format!("pgrep -f {}", opts.daemon);
    opts.daemon_poll
        .run("routing daemon", || {
            let probe = probe.as_str();
            async move { env.run(probe).await.map(|out| out.success().then_some(())) }
        })
        .await
        .map_err(|e| match e {
            PollError::Deadline { deadline, .. } => CoreError::Env(EnvError::PollDeadline {
                what: format!("{} in {}", opts.daemon, env.id()),
                elapsed: deadline,
            }),
            PollError::Probe(e) => CoreError::Env(e),
        })?;
    tracing::debug!(env_id = %env.id(), daemon = %opts.daemon, "Routing daemon running");

    if let Some(asn) = &opts.default_asn {
        let no_router = format!("no router bgp {asn}");
        env.exec(&["vtysh", "-c", "configure terminal", "-c", &no_router]).await?;
        tracing::debug!(env_id = %env.id(), asn = %asn, "Default BGP instance removed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::{HostOptions, SwitchOptions};
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use vsinet_env::mock::{MockRunner, MockShell, Reply};
    use vsinet_env::{EnvState, PollPolicy};

    fn config(dir: &Path, name: &str, kind: NodeKind) -> NodeConfig {
        NodeConfig::builder("t1", name)
            .image("img:latest")
            .kind(kind)
            .test_dir(dir)
            .start_poll(PollPolicy::unbounded(Duration::from_millis(1)))
            .build()
            .unwrap()
    }

    fn echo_runner() -> Arc<MockRunner> {
        Arc::new(MockRunner::new().with_shells(|_| {
            MockShell::new(|line| Some(format!("[{line}]")))
        }))
    }

    #[tokio::test]
    async fn test_host_start_opens_shell() {
        let dir = tempfile::tempdir().unwrap();
        let runner = echo_runner();
        let kind = NodeKind::Host(HostOptions::default());
        let mut h1 = Node::create(config(dir.path(), "h1", kind), runner.clone())
            .await
            .unwrap();

        let report = h1.start().await.unwrap();
        assert!(report.result.is_ok());
        assert_eq!(h1.cmd("ifconfig").await.unwrap(), "[ifconfig]");
        assert_eq!(h1.ns_cmd("ip route").await.unwrap(), "[ip route]");

        let spawned = runner.spawned();
        assert_eq!(spawned.len(), 1);
        assert_eq!(&spawned[0][..4], &["docker", "exec", "-i", "t1-h1"]);
    }

    #[tokio::test]
    async fn test_commands_before_start_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut h1 = Node::create(config(dir.path(), "h1", NodeKind::default()), echo_runner())
            .await
            .unwrap();
        assert!(matches!(h1.cmd("ls").await, Err(CoreError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut h1 = Node::create(config(dir.path(), "h1", NodeKind::default()), echo_runner())
            .await
            .unwrap();
        h1.start().await.unwrap();
        assert!(h1.start().await.is_err());
    }

    #[tokio::test]
    async fn test_switch_start_and_namespace_commands() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("s1").join("shared");
        let runner = Arc::new(MockRunner::new().with_shells(move |argv| {
            let shared = shared.clone();
            if argv.iter().any(|a| a == "/usr/bin/vtysh") {
                return MockShell::new(|line| Some(format!("cli:{line}")));
            }
            MockShell::new(move |line| {
                if line.contains("wait_for_firmware") {
                    std::fs::write(shared.join("logs"), "Success\n").ok()?;
                }
                Some(format!("sh:{line}"))
            })
        }));
        let opts = SwitchOptions {
            num_ports: 2,
            ..Default::default()
        };
        let mut s1 = Node::create(config(dir.path(), "s1", NodeKind::Switch(opts)), runner.clone())
            .await
            .unwrap();
        s1.add_interface("1");

        let report = s1.start().await.unwrap();
        assert!(report.result.is_ok());
        assert_eq!(s1.cli("show version").await.unwrap(), "cli:show version");
        assert_eq!(
            s1.ns_cmd("ifconfig 1").await.unwrap(),
            "sh:ip netns exec swns ifconfig 1"
        );
        assert_eq!(runner.calls_matching("tuntap add dev 2").len(), 1);
        assert!(runner.calls_matching("tuntap add dev 1 ").is_empty());
    }

    #[tokio::test]
    async fn test_failed_switch_has_no_cli() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("s1").join("shared");
        let runner = Arc::new(MockRunner::new().with_shells(move |_| {
            let shared = shared.clone();
            MockShell::new(move |line| {
                if line.contains("wait_for_firmware") {
                    std::fs::write(shared.join("logs"), "Failure: switchd not running\n").ok()?;
                }
                Some(String::new())
            })
        }));
        let opts = SwitchOptions {
            num_ports: 1,
            syslog_path: dir.path().join("syslog"),
            ..Default::default()
        };
        let mut s1 = Node::create(config(dir.path(), "s1", NodeKind::Switch(opts)), runner)
            .await
            .unwrap();

        let report = s1.start().await.unwrap();
        assert_eq!(report.final_state, BootState::FirmwareFailed);
        assert!(matches!(s1.cli("show version").await, Err(CoreError::InvalidState { .. })));
        // the raw shell survives for post-mortem commands
        assert!(s1.cmd("ps").await.is_ok());
    }

    #[tokio::test]
    async fn test_peering_waits_for_daemon_and_clears_asn() {
        let dir = tempfile::tempdir().unwrap();
        let polls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&polls);
        let runner = Arc::new(MockRunner::with_handler(move |argv| {
            if argv.last().map(String::as_str) == Some("pgrep -f bgpd") {
                let n = seen.fetch_add(1, Ordering::SeqCst);
                return if n < 2 { Reply::output(1, "") } else { Reply::ok("42\n") };
            }
            MockRunner::default_reply(argv)
        }));
        let opts = PeeringOptions {
            daemon_poll: PollPolicy::unbounded(Duration::from_millis(1)),
            ..Default::default()
        };
        let kind = NodeKind::PeeringFirmware(opts);
        let mut q1 = Node::create(config(dir.path(), "q1", kind), runner.clone())
            .await
            .unwrap();

        q1.start().await.unwrap();
        assert_eq!(polls.load(Ordering::SeqCst), 3);
        let clear = runner.calls_matching("no router bgp 7675");
        assert_eq!(clear.len(), 1);
        assert!(clear[0].starts_with("docker exec t1-q1 vtysh -c configure terminal"));

        q1.cli("show ip bgp").await.unwrap();
        assert_eq!(runner.calls_matching("vtysh -c show ip bgp").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peering_daemon_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::with_handler(|argv| {
            if argv.last().map(String::as_str) == Some("pgrep -f bgpd") {
                return Reply::output(1, "");
            }
            MockRunner::default_reply(argv)
        }));
        let opts = PeeringOptions {
            daemon_poll: PollPolicy::fixed(Duration::from_secs(1), Duration::from_secs(5)),
            ..Default::default()
        };
        let mut q1 = Node::create(config(dir.path(), "q1", NodeKind::PeeringFirmware(opts)), runner)
            .await
            .unwrap();

        let err = q1.start().await.unwrap_err();
        assert!(matches!(err, CoreError::Env(EnvError::PollDeadline { .. })));
    }

    #[tokio::test]
    async fn test_destroy_closes_sessions_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let runner = echo_runner();
        let mut h1 = Node::create(config(dir.path(), "h1", NodeKind::default()), runner.clone())
            .await
            .unwrap();
        h1.start().await.unwrap();

        h1.destroy().await.unwrap();
        h1.destroy().await.unwrap();

        assert_eq!(h1.env().state(), EnvState::Destroyed);
        assert!(h1.cmd("ls").await.is_err());
        assert_eq!(runner.calls_matching("rm -f t1-h1").len(), 2);
    }

    #[tokio::test]
    async fn test_endpoint_uses_environment_pid() {
        let dir = tempfile::tempdir().unwrap();
        let kinds = [
            ("h1", NodeKind::default()),
            ("s1", NodeKind::Switch(SwitchOptions::default())),
            ("q1", NodeKind::PeeringFirmware(PeeringOptions::default())),
        ];
        for (name, kind) in kinds {
            let node = Node::create(config(dir.path(), name, kind), echo_runner())
                .await
                .unwrap();
            let end = node.endpoint("eth0");
            assert_eq!(end.netns_pid, Some(MockRunner::DEFAULT_PID));
            assert_eq!(end.node, name);
        }
    }
}
