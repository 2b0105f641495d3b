//! Virtual point-to-point links between node namespaces.
//!
//! Each link is a veth pair whose two ends are created directly inside the
//! target network namespaces in one `ip link add` call, so this call never
//! leaves a half-created pair behind.

use crate::error::{CoreError, Result};
use std::fmt;
use std::sync::Arc;
use vsinet_env::HostRunner;

/// Maximum interface name length accepted by the kernel (IFNAMSIZ - 1).
pub const MAX_IFACE_NAME: usize = 15;

/// One end of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Owning node name, for logs and errors
    pub node: String,
    /// PID whose network namespace holds the interface; `None` for the
    /// host's default namespace
    pub netns_pid: Option<u32>,
    pub iface: String,
}

impl Endpoint {
    pub fn new(node: impl Into<String>, netns_pid: Option<u32>, iface: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            netns_pid,
            iface: iface.into(),
        }
    }

    /// Wrap `cmd` so it runs in this endpoint's namespace.
    fn scoped(&self, cmd: &[&str]) -> Vec<String> {
        let mut argv = Vec::with_capacity(cmd.len() + 4);
        if let Some(pid) = self.netns_pid {
            argv.extend([
                "nsenter".to_string(),
                "-t".to_string(),
                pid.to_string(),
                "-n".to_string(),
            ]);
        }
        argv.extend(cmd.iter().map(|s| s.to_string()));
        argv
    }

    fn validate(&self) -> Result<()> {
        if self.iface.is_empty() || self.iface.len() > MAX_IFACE_NAME {
            return Err(CoreError::Config(format!(
                "interface name `{}` on {} must be 1..={MAX_IFACE_NAME} bytes",
                self.iface, self.node
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.iface)
    }
}

/// An established link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub a: Endpoint,
    pub b: Endpoint,
}

/// Creates and removes veth pairs on the host.
#[derive(Clone)]
pub struct LinkFabric {
    runner: Arc<dyn HostRunner>,
}

impl LinkFabric {
    pub fn new(runner: Arc<dyn HostRunner>) -> Self {
        Self { runner }
    }

    /// Create a veth pair between `a` and `b`.
    ///
    /// With `delete_first`, interfaces already using either name are
    /// removed beforehand, which makes repeated calls idempotent.
    pub async fn create_link(&self, a: Endpoint, b: Endpoint, delete_first: bool) -> Result<Link> {
        a.validate()?;
        b.validate()?;

        if delete_first {
            self.delete_interface(&a).await?;
            self.delete_interface(&b).await?;
        }

        let mut argv = vec!["ip".to_string(), "link".to_string(), "add".to_string()];
        push_end(&mut argv, &a);
        argv.extend(["type".to_string(), "veth".to_string(), "peer".to_string()]);
        push_end(&mut argv, &b);

        let out = self.runner.run(&argv).await?;
        if !out.success() {
            tracing::error!(a = %a, b = %b, output = %out.output.trim(), "Failed to create link");
            return Err(CoreError::Link {
                a: a.to_string(),
                b: b.to_string(),
                reason: out.output.trim().to_string(),
            });
        }

        tracing::info!(a = %a, b = %b, "Link created");
        Ok(Link { a, b })
    }

    /// Remove both ends of `link`. Missing interfaces are not an error.
    pub async fn delete_link(&self, link: &Link) -> Result<()> {
        // Removing one end of a veth pair removes its peer
        self.delete_interface(&link.a).await?;
        self.delete_interface(&link.b).await
    }

    /// Remove one interface if present.
    pub async fn delete_interface(&self, end: &Endpoint) -> Result<()> {
        let out = self
            .runner
            .run(&end.scoped(&["ip", "link", "del", &end.iface]))
            .await?;
        if out.success() {
            tracing::debug!(endpoint = %end, "Removed stale interface");
            return Ok(());
        }
        if is_missing(&out.output) {
            tracing::trace!(endpoint = %end, "No stale interface");
            return Ok(());
        }
        Err(CoreError::Link {
            a: end.to_string(),
            b: String::from("-"),
            reason: out.output.trim().to_string(),
        })
    }
}

fn push_end(argv: &mut Vec<String>, end: &Endpoint) {
    argv.push("name".to_string());
    argv.push(end.iface.clone());
    if let Some(pid) = end.netns_pid {
        argv.push("netns".to_string());
        argv.push(pid.to_string());
    }
}

fn is_missing(output: &str) -> bool {
    output.contains("Cannot find device") || output.contains("does not exist")
}
