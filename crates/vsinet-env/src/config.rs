//! Environment configuration types.

use crate::daemon_log::DaemonLogProbe;
use crate::error::{EnvError, Result};
use crate::poll::PollPolicy;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Where the node's shared directory appears inside the environment.
pub const SHARED_MOUNT_POINT: &str = "/shared";

/// Name of the generated prompt configuration file in the shared directory.
pub const BASH_RC_FILE: &str = "vsinet_bash_rc";

/// What the environment runs as its init process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitCommand {
    /// Let the image run its own configured entrypoint/CMD.
    ImageDefault,
    /// Run this command line.
    Command(String),
}

impl Default for InitCommand {
    fn default() -> Self {
        InitCommand::Command("/sbin/init".to_string())
    }
}

/// A `host:guest` bind mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub guest: PathBuf,
}

impl Mount {
    pub fn new(host: impl Into<PathBuf>, guest: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            guest: guest.into(),
        }
    }

    /// Mount a host path at the same path inside the environment.
    pub fn same_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            host: path.clone(),
            guest: path,
        }
    }

    /// Render as the runtime's `-v` argument.
    pub fn to_volume_arg(&self) -> String {
        format!("{}:{}", self.host.display(), self.guest.display())
    }
}

impl fmt::Display for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_volume_arg())
    }
}

impl FromStr for Mount {
    type Err = EnvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((host, guest)) if !host.is_empty() && !guest.is_empty() => {
                Ok(Mount::new(host, guest))
            }
            _ => Err(EnvError::Config(format!(
                "mount `{s}` is not of the form host:guest"
            ))),
        }
    }
}

/// Configuration for creating an environment.
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// Globally unique environment id; also used as the hostname.
    pub id: String,
    /// Image reference.
    pub image: String,
    /// Init process.
    pub init_command: InitCommand,
    /// Caller-supplied bind mounts.
    pub mounts: Vec<Mount>,
    /// Host mounts every environment gets.
    pub base_mounts: Vec<Mount>,
    /// Coverage data directory, mounted at the same path when set.
    pub coverage_dir: Option<PathBuf>,
    /// Per-node working directory on the host (`<test_root>/<node>`).
    pub node_dir: PathBuf,
    /// Allocate a pseudo-terminal (`-dt`) instead of plain detached mode.
    pub tty: bool,
    /// Container runtime binary.
    pub runtime: String,
    /// How to wait for the init process to get a PID.
    pub start_poll: PollPolicy,
    /// Where to look for the runtime daemon's log on start failure.
    pub daemon_log: DaemonLogProbe,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            image: String::new(),
            init_command: InitCommand::default(),
            mounts: Vec::new(),
            base_mounts: vec![
                Mount::same_path("/dev/log"),
                Mount::same_path("/lib/modules"),
                Mount::same_path("/sys/fs/cgroup"),
            ],
            coverage_dir: None,
            node_dir: PathBuf::new(),
            tty: false,
            runtime: "docker".to_string(),
            start_poll: PollPolicy::default(),
            daemon_log: DaemonLogProbe::default(),
        }
    }
}

impl EnvironmentConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(EnvError::Config("id is required".into()));
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        {
            return Err(EnvError::Config(format!(
                "id `{}` is not a valid hostname",
                self.id
            )));
        }
        if self.image.is_empty() {
            return Err(EnvError::Config("image is required".into()));
        }
        if self.node_dir.as_os_str().is_empty() {
            return Err(EnvError::Config("node_dir is required".into()));
        }
        if self.runtime.is_empty() {
            return Err(EnvError::Config("runtime is required".into()));
        }
        Ok(())
    }

    /// Host side of the `/shared` bind mount.
    pub fn shared_dir(&self) -> PathBuf {
        self.node_dir.join("shared")
    }

    /// Full argv for starting the environment.
    pub fn run_argv(&self) -> Vec<String> {
        let mut argv = vec![
            self.runtime.clone(),
            "run".to_string(),
            "--privileged".to_string(),
            "-v".to_string(),
            Mount::new(self.shared_dir(), SHARED_MOUNT_POINT).to_volume_arg(),
        ];

        let coverage = self.coverage_dir.as_deref().map(Mount::same_path);
        for mount in self
            .base_mounts
            .iter()
            .chain(coverage.iter())
            .chain(self.mounts.iter())
        {
            argv.push("-v".to_string());
            argv.push(mount.to_volume_arg());
        }

        argv.push("-h".to_string());
        argv.push(self.id.clone());
        argv.push(format!("--name={}", self.id));
        argv.push(if self.tty { "-dt" } else { "-d" }.to_string());
        argv.push(self.image.clone());

        if let InitCommand::Command(cmd) = &self.init_command {
            argv.push(cmd.clone());
        }
        argv
    }
}

/// Path of the prompt configuration file on the host.
pub(crate) fn bash_rc_path(shared_dir: &Path) -> PathBuf {
    shared_dir.join(BASH_RC_FILE)
}
