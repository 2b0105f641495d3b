//! Node kinds and the per-kind strategy table.

use std::path::PathBuf;
use std::time::Duration;
use vsinet_env::PollPolicy;

/// How a node kind is brought to a usable state after its environment is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStrategy {
    /// Open the raw shell; nothing else to wait for.
    Shell,
    /// Run the switch boot sequencer.
    SwitchSequencer,
    /// Wait for the routing daemon, then clear its default configuration.
    PeeringDaemon,
}

/// Static per-kind behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindProfile {
    /// Short label used in logs
    pub label: &'static str,
    /// Allocate a pseudo-terminal for the init process
    pub tty: bool,
    /// Init command; `None` runs the image default
    pub init: Option<&'static str>,
    pub boot: BootStrategy,
}

const HOST_PROFILE: KindProfile = KindProfile {
    label: "host",
    tty: true,
    init: Some("/bin/bash"),
    boot: BootStrategy::Shell,
};

const SWITCH_PROFILE: KindProfile = KindProfile {
    label: "switch",
    tty: false,
    init: Some("/sbin/init"),
    boot: BootStrategy::SwitchSequencer,
};

const PEERING_PROFILE: KindProfile = KindProfile {
    label: "peering",
    tty: false,
    init: None,
    boot: BootStrategy::PeeringDaemon,
};

/// Host node settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOptions {
    /// Shell used as the init process
    pub shell: String,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            shell: "/bin/bash".to_string(),
        }
    }
}

/// Namespace running a hardware-simulation companion process.
///
/// Every port migrated into `namespace` is registered with the companion
/// by piping `port_add <iface> <iface - 1>` into `control_command`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionConfig {
    pub namespace: String,
    pub control_command: Vec<String>,
}

/// Switch node settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchOptions {
    /// Logical data-plane ports, named `1..=num_ports`
    pub num_ports: u16,
    /// Isolation namespace for data-plane interfaces
    pub namespace: String,
    /// Pre-existing namespaces accepted in place of `namespace`
    pub alt_namespaces: Vec<String>,
    pub companion: Option<CompanionConfig>,
    /// Bound on each tap device creation
    pub tuntap_timeout: Duration,
    /// Create `<port>-<sub>` tap devices for the splittable ports
    pub split_ports: bool,
    /// How long to wait for the readiness script to report a status
    pub readiness_poll: PollPolicy,
    /// Firmware daemon grepped for in the syslog on failure
    pub firmware_process: String,
    pub coredump_dir: PathBuf,
    /// Interactive configuration CLI
    pub cli_command: Vec<String>,
    pub syslog_path: PathBuf,
}

impl SwitchOptions {
    /// First splittable port.
    pub const SPLIT_FIRST: u16 = 49;
    /// Last splittable port.
    pub const SPLIT_LAST: u16 = 54;
    /// Subports per splittable port.
    pub const SUBPORTS: u16 = 4;

    /// Tap device names to create, skipping ports already backed by an
    /// interface in `existing`.
    pub fn tap_names(&self, existing: &[String]) -> Vec<String> {
        let mut names: Vec<String> = (1..=self.num_ports)
            .map(|p| p.to_string())
            .filter(|n| !existing.contains(n))
            .collect();

        if self.split_ports {
            let last = Self::SPLIT_LAST.min(self.num_ports);
            for port in Self::SPLIT_FIRST..=last {
                for sub in 1..=Self::SUBPORTS {
                    names.push(format!("{port}-{sub}"));
                }
            }
        }
        names
    }
}

impl Default for SwitchOptions {
    fn default() -> Self {
        Self {
            num_ports: 54,
            namespace: "swns".to_string(),
            alt_namespaces: vec!["emulns".to_string()],
            companion: None,
            tuntap_timeout: Duration::from_secs(10),
            split_ports: true,
            readiness_poll: PollPolicy::default(),
            firmware_process: "switchd".to_string(),
            coredump_dir: PathBuf::from("/var/lib/systemd/coredump"),
            cli_command: vec![
                "/usr/bin/vtysh".to_string(),
                "-t".to_string(),
                "-vCONSOLE:ERR".to_string(),
            ],
            syslog_path: PathBuf::from("/var/log/syslog"),
        }
    }
}

/// Routing-daemon firmware settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PeeringOptions {
    /// BGP ASN configured by the image, removed after boot
    pub default_asn: Option<String>,
    /// Daemon that must be running before the node is usable
    pub daemon: String,
    pub daemon_poll: PollPolicy,
}

impl Default for PeeringOptions {
    fn default() -> Self {
        Self {
            default_asn: Some("7675".to_string()),
            daemon: "bgpd".to_string(),
            daemon_poll: PollPolicy::unbounded(Duration::from_secs(1)),
        }
    }
}

/// What kind of node this is, with kind-specific settings.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Host(HostOptions),
    Switch(SwitchOptions),
    PeeringFirmware(PeeringOptions),
}

impl Default for NodeKind {
    fn default() -> Self {
        NodeKind::Host(HostOptions::default())
    }
}

impl NodeKind {
    /// Strategy table entry for this kind.
    pub fn profile(&self) -> &'static KindProfile {
        match self {
            NodeKind::Host(_) => &HOST_PROFILE,
            NodeKind::Switch(_) => &SWITCH_PROFILE,
            NodeKind::PeeringFirmware(_) => &PEERING_PROFILE,
        }
    }

    /// Init command the environment should run, honouring kind options.
    pub fn init_command(&self) -> Option<String> {
        match self {
            NodeKind::Host(opts) => Some(opts.shell.clone()),
            other => other.profile().init.map(str::to_string),
        }
    }

    pub fn is_switch(&self) -> bool {
        matches!(self, NodeKind::Switch(_))
    }
}
