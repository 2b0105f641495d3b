//! Node configuration types.

use crate::error::CoreError;
use crate::kind::NodeKind;
use std::fmt;
use std::path::PathBuf;
use vsinet_env::{DaemonLogProbe, EnvironmentConfig, InitCommand, Mount, PollPolicy};

/// Identity of a node within one test run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub test_id: String,
    pub name: String,
}

impl NodeId {
    pub fn new(test_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            name: name.into(),
        }
    }

    /// Environment identifier, unique across concurrent test runs.
    pub fn env_id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.test_id, self.name)
    }
}

/// Configuration for creating a node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub id: NodeId,
    /// Image reference.
    pub image: String,
    pub kind: NodeKind,
    /// Extra bind mounts on top of the shared directory.
    pub mounts: Vec<Mount>,
    /// Per-test root; the node's directory is `<test_dir>/<name>`.
    pub test_dir: PathBuf,
    /// Coverage output directory mounted at the same path, if any.
    pub coverage_dir: Option<PathBuf>,
    /// Container runtime binary (default: docker).
    pub runtime: String,
    /// How to wait for the environment's init process.
    pub start_poll: PollPolicy,
    pub daemon_log: DaemonLogProbe,
}

impl NodeConfig {
    /// Create a new config builder.
    pub fn builder(test_id: impl Into<String>, name: impl Into<String>) -> NodeConfigBuilder {
        NodeConfigBuilder {
            config: NodeConfig {
                id: NodeId::new(test_id, name),
                image: String::new(),
                kind: NodeKind::default(),
                mounts: Vec::new(),
                test_dir: PathBuf::new(),
                coverage_dir: None,
                runtime: "docker".to_string(),
                start_poll: PollPolicy::default(),
                daemon_log: DaemonLogProbe::default(),
            },
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.test_id.is_empty() {
            return Err(CoreError::Config("test_id is required".into()));
        }
        if self.id.name.is_empty() {
            return Err(CoreError::Config("name is required".into()));
        }
        if self.image.is_empty() {
            return Err(CoreError::Config(format!("image is required for {}", self.id.name)));
        }
        if self.test_dir.as_os_str().is_empty() {
            return Err(CoreError::Config("test_dir is required".into()));
        }
        Ok(())
    }

    /// Host directory for this node's artifacts.
    pub fn node_dir(&self) -> PathBuf {
        self.test_dir.join(&self.id.name)
    }

    /// Lower to the environment layer.
    pub fn to_environment_config(&self) -> EnvironmentConfig {
        let profile = self.kind.profile();
        EnvironmentConfig {
            id: self.id.env_id(),
            image: self.image.clone(),
            init_command: match self.kind.init_command() {
                Some(cmd) => InitCommand::Command(cmd),
                None => InitCommand::ImageDefault,
            },
            mounts: self.mounts.clone(),
            coverage_dir: self.coverage_dir.clone(),
            node_dir: self.node_dir(),
            tty: profile.tty,
            runtime: self.runtime.clone(),
            start_poll: self.start_poll,
            daemon_log: self.daemon_log.clone(),
            ..Default::default()
        }
    }
}

/// Builder for NodeConfig.
#[derive(Debug)]
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    /// Set the image reference.
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.config.image = image.into();
        self
    }

    /// Set the node kind.
    pub fn kind(mut self, kind: NodeKind) -> Self {
        self.config.kind = kind;
        self
    }

    /// Add a bind mount.
    pub fn mount(mut self, mount: Mount) -> Self {
        self.config.mounts.push(mount);
        self
    }

    /// Add several bind mounts.
    pub fn mounts(mut self, mounts: impl IntoIterator<Item = Mount>) -> Self {
        self.config.mounts.extend(mounts);
        self
    }

    /// Set the per-test root directory.
    pub fn test_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.test_dir = path.into();
        self
    }

    pub fn coverage_dir(mut self, path: Option<PathBuf>) -> Self {
        self.config.coverage_dir = path;
        self
    }

    pub fn runtime(mut self, runtime: impl Into<String>) -> Self {
        self.config.runtime = runtime.into();
        self
    }

    pub fn start_poll(mut self, policy: PollPolicy) -> Self {
        self.config.start_poll = policy;
        self
    }

    pub fn daemon_log(mut self, probe: DaemonLogProbe) -> Self {
        self.config.daemon_log = probe;
        self
    }

    /// Build the configuration, validating all required fields.
    pub fn build(self) -> Result<NodeConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::{PeeringOptions, SwitchOptions};

    fn builder() -> NodeConfigBuilder {
        NodeConfig::builder("4711", "s1")
            .image("openswitch/genericx86-64")
            .test_dir("/tmp/vsinet-test/4711")
    }

    #[test]
    fn test_env_id_joins_test_and_name() {
        let id = NodeId::new("4711", "s1");
        assert_eq!(id.env_id(), "4711-s1");
    }

    #[test]
    fn test_build_requires_image() {
        let err = NodeConfig::builder("4711", "h1")
            .test_dir("/tmp/x")
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn test_switch_lowering() {
        let cfg = builder()
            .kind(NodeKind::Switch(SwitchOptions::default()))
            .build()
            .unwrap();
        let env = cfg.to_environment_config();

        assert_eq!(env.id, "4711-s1");
        assert_eq!(env.node_dir, PathBuf::from("/tmp/vsinet-test/4711/s1"));
        assert!(!env.tty);
        assert_eq!(env.init_command, InitCommand::Command("/sbin/init".into()));
        assert!(env.run_argv().contains(&"-d".to_string()));
    }

    #[test]
    fn test_host_lowering_uses_tty() {
        let cfg = builder().build().unwrap();
        let env = cfg.to_environment_config();
        assert!(env.tty);
        assert_eq!(env.init_command, InitCommand::Command("/bin/bash".into()));
    }

    #[test]
    fn test_peering_uses_image_default_init() {
        let cfg = builder()
            .kind(NodeKind::PeeringFirmware(PeeringOptions::default()))
            .build()
            .unwrap();
        let env = cfg.to_environment_config();
        assert_eq!(env.init_command, InitCommand::ImageDefault);
        assert_eq!(env.run_argv().last().unwrap(), "openswitch/genericx86-64");
    }

    #[test]
    fn test_coverage_and_user_mounts_pass_through() {
        let cfg = builder()
            .mount(Mount::new("/srv/keys", "/root/keys"))
            .coverage_dir(Some(PathBuf::from("/tmp/cov")))
            .build()
            .unwrap();
        let argv = cfg.to_environment_config().run_argv();
        assert!(argv.contains(&"/srv/keys:/root/keys".to_string()));
        assert!(argv.contains(&"/tmp/cov:/tmp/cov".to_string()));
    }
}
