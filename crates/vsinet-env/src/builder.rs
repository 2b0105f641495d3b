//! Builder pattern for ergonomic Environment configuration.

use crate::config::{EnvironmentConfig, InitCommand, Mount};
use crate::daemon_log::DaemonLogProbe;
use crate::error::Result;
use crate::poll::PollPolicy;
use crate::runner::HostRunner;
use crate::Environment;
use std::path::PathBuf;
use std::sync::Arc;

/// Fluent builder for configuring and creating Environment instances.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use vsinet_env::{EnvironmentBuilder, ProcessRunner};
///
/// # async fn example() -> vsinet_env::Result<()> {
/// let env = EnvironmentBuilder::new("4711-s1", "openswitch/genericx86-64")
///     .node_dir("/tmp/vsinet-test/4711/s1")
///     .mount("/opt/images:/images".parse()?)
///     .build(Arc::new(ProcessRunner::new()))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct EnvironmentBuilder {
    config: EnvironmentConfig,
}

impl EnvironmentBuilder {
    /// Create a new builder for the given environment id and image.
    pub fn new(id: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            config: EnvironmentConfig {
                id: id.into(),
                image: image.into(),
                ..Default::default()
            },
        }
    }

    /// Run this command as the init process.
    pub fn init_command(mut self, cmd: impl Into<String>) -> Self {
        self.config.init_command = InitCommand::Command(cmd.into());
        self
    }

    /// Let the image run its own entrypoint.
    pub fn image_default_init(mut self) -> Self {
        self.config.init_command = InitCommand::ImageDefault;
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

    /// Set the per-node host directory.
    pub fn node_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.node_dir = path.into();
        self
    }

    /// Allocate a pseudo-terminal for the init process.
    pub fn tty(mut self, tty: bool) -> Self {
        self.config.tty = tty;
        self
    }

    /// Use a different container runtime binary.
    pub fn runtime(mut self, runtime: impl Into<String>) -> Self {
        self.config.runtime = runtime.into();
        self
    }

    /// Mount a coverage data directory at the same path.
    pub fn coverage_dir(mut self, path: Option<PathBuf>) -> Self {
        self.config.coverage_dir = path;
        self
    }

    /// How to wait for the init process to come up.
    pub fn start_poll(mut self, policy: PollPolicy) -> Self {
        self.config.start_poll = policy;
        self
    }

    /// Where to look for the daemon log on start failure.
    pub fn daemon_log(mut self, probe: DaemonLogProbe) -> Self {
        self.config.daemon_log = probe;
        self
    }

    /// Build and return the configuration without creating anything.
    pub fn build_config(self) -> EnvironmentConfig {
        self.config
    }

    /// Create and start the environment.
    ///
    /// # Errors
    /// Returns an error if validation, creation or startup fails.
    pub async fn build(self, runner: Arc<dyn HostRunner>) -> Result<Environment> {
        Environment::create(self.config, runner).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults() {
        let config = EnvironmentBuilder::new("1-h1", "ubuntu").build_config();
        assert_eq!(config.runtime, "docker");
        assert_eq!(config.init_command, InitCommand::Command("/sbin/init".into()));
        assert_eq!(config.base_mounts.len(), 3);
        assert!(!config.tty);
        assert!(config.start_poll.deadline.is_none());
    }

    #[test]
    fn test_builder_fields() {
        let config = EnvironmentBuilder::new("1-q1", "openswitch/quagga")
            .image_default_init()
            .tty(true)
            .node_dir("/tmp/x/q1")
            .mount(Mount::new("/a", "/b"))
            .mounts([Mount::new("/c", "/d")])
            .start_poll(PollPolicy::fixed(Duration::from_millis(5), Duration::from_secs(1)))
            .build_config();

        assert_eq!(config.init_command, InitCommand::ImageDefault);
        assert!(config.tty);
        assert_eq!(config.mounts.len(), 2);
        assert_eq!(config.shared_dir(), PathBuf::from("/tmp/x/q1/shared"));
        assert_eq!(config.start_poll.deadline, Some(Duration::from_secs(1)));
    }
}
