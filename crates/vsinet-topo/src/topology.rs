//! Topology controller - builds, starts and tears down a set of nodes.

use crate::config::TopoConfig;
use crate::error::{Result, TopoError};
use crate::ping::{parse_ping, PingStats};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vsinet_core::{
    HostOptions, Link, LinkFabric, Node, NodeConfig, NodeKind, PeeringOptions, SwitchOptions,
};
use vsinet_env::HostRunner;

/// A link recorded by [`Topology::add_link`], created on [`Topology::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
struct PlannedLink {
    a: (usize, String),
    b: (usize, String),
}

/// A set of nodes and the links between them for one test run.
pub struct Topology {
    config: TopoConfig,
    runner: Arc<dyn HostRunner>,
    fabric: LinkFabric,
    test_id: String,
    test_dir: PathBuf,
    nodes: Vec<Node>,
    planned: Vec<PlannedLink>,
    links: Vec<Link>,
}

impl std::fmt::Debug for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topology")
            .field("test_id", &self.test_id)
            .field("nodes", &self.nodes.iter().map(Node::name).collect::<Vec<_>>())
            .field("links", &self.planned.len())
            .finish()
    }
}

impl Topology {
    /// Create an empty topology with a fresh test directory
    /// `<test_root>/<test_id>`.
    pub async fn new(config: TopoConfig, runner: Arc<dyn HostRunner>) -> Result<Self> {
        let test_id = config.generate_test_id();
        Self::with_test_id(config, runner, test_id).await
    }

    /// Like [`new`](Self::new) with a caller-chosen test id.
    pub async fn with_test_id(
        config: TopoConfig,
        runner: Arc<dyn HostRunner>,
        test_id: impl Into<String>,
    ) -> Result<Self> {
        let test_id = test_id.into();
        let test_dir = config.test_root.join(&test_id);

        match tokio::fs::remove_dir_all(&test_dir).await {
            Ok(()) => {
                tracing::debug!(path = %test_dir.display(), "Removed previous test directory")
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&test_dir).await?;
        tracing::info!(test_id = %test_id, path = %test_dir.display(), "Topology created");

        Ok(Self {
            fabric: LinkFabric::new(Arc::clone(&runner)),
            config,
            runner,
            test_id,
            test_dir,
            nodes: Vec::new(),
            planned: Vec::new(),
            links: Vec::new(),
        })
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn test_dir(&self) -> &Path {
        &self.test_dir
    }

    pub fn config(&self) -> &TopoConfig {
        &self.config
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Links created by [`start`](Self::start).
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Add a host node. Its environment starts immediately.
    pub async fn add_host(&mut self, name: &str) -> Result<&mut Node> {
        let builder = self
            .node_builder(name)
            .image(&self.config.host_image)
            .kind(NodeKind::Host(HostOptions::default()))
            .mounts(self.config.host_mounts.clone());
        self.add_node(builder.build()?).await
    }

    /// Add a switch node with the configured port count.
    pub async fn add_switch(&mut self, name: &str) -> Result<&mut Node> {
        let opts = SwitchOptions {
            num_ports: self.config.num_ports,
            ..Default::default()
        };
        self.add_switch_with(name, opts).await
    }

    /// Add a switch node with explicit options.
    pub async fn add_switch_with(&mut self, name: &str, opts: SwitchOptions) -> Result<&mut Node> {
        let builder = self
            .node_builder(name)
            .image(&self.config.switch_image)
            .kind(NodeKind::Switch(opts))
            .mounts(self.config.switch_mounts.clone())
            .coverage_dir(self.config.coverage_dir.clone());
        self.add_node(builder.build()?).await
    }

    /// Add a routing peer node.
    pub async fn add_peer(&mut self, name: &str) -> Result<&mut Node> {
        let builder = self
            .node_builder(name)
            .image(&self.config.peer_image)
            .kind(NodeKind::PeeringFirmware(PeeringOptions::default()));
        self.add_node(builder.build()?).await
    }

    /// Add a node from a full configuration.
    pub async fn add_node(&mut self, config: NodeConfig) -> Result<&mut Node> {
        if self.index_of(&config.id.name).is_ok() {
            return Err(TopoError::Config(format!(
                "node {} already exists",
                config.id.name
            )));
        }
        let node = Node::create(config, Arc::clone(&self.runner)).await?;
        self.nodes.push(node);
        let last = self.nodes.len() - 1;
        Ok(&mut self.nodes[last])
    }

    /// Plan a link between two nodes and return the interface names.
    ///
    /// Switch ends are named after the next free port number; other ends
    /// are `<node>-eth<n>`.
    pub fn add_link(&mut self, a: &str, b: &str) -> Result<(String, String)> {
        let ia = self.index_of(a)?;
        let ib = self.index_of(b)?;
        if ia == ib {
            return Err(TopoError::Config(format!("cannot link {a} to itself")));
        }
        let iface_a = self.next_iface(ia)?;
        let iface_b = self.next_iface(ib)?;

        self.planned.push(PlannedLink {
            a: (ia, iface_a.clone()),
            b: (ib, iface_b.clone()),
        });
        tracing::debug!(a = %a, iface_a = %iface_a, b = %b, iface_b = %iface_b, "Link planned");
        Ok((iface_a, iface_b))
    }

    /// Create every link, then start nodes in insertion order.
    ///
    /// The first node that fails to boot aborts the run: no further node
    /// is started and every node is destroyed before the error returns.
    pub async fn start(&mut self) -> Result<()> {
        let start = std::time::Instant::now();
        tracing::info!(test_id = %self.test_id, nodes = self.nodes.len(), "Starting topology");

        if let Err(e) = self.create_links().await {
            self.stop().await;
            return Err(e);
        }

        for i in 0..self.nodes.len() {
            let report = match self.nodes[i].start().await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(
                        node = %self.nodes[i].name(),
                        error = %e,
                        "Node failed to start"
                    );
                    self.stop().await;
                    return Err(e.into());
                }
            };
            if !report.result.is_ok() {
                let node = self.nodes[i].name().to_string();
                tracing::error!(
                    node = %node,
                    result = %report.result,
                    diagnostics = ?report.diagnostics,
                    "Aborting topology"
                );
                self.stop().await;
                return Err(TopoError::Boot {
                    node,
                    result: report.result,
                    diagnostics: report.diagnostics,
                });
            }
        }

        tracing::info!(
            test_id = %self.test_id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Topology started"
        );
        Ok(())
    }

    /// Remove links and destroy every node. Errors are logged, not returned.
    pub async fn stop(&mut self) {
        tracing::info!(test_id = %self.test_id, "Stopping topology");
        for link in std::mem::take(&mut self.links) {
            if let Err(e) = self.fabric.delete_link(&link).await {
                tracing::warn!(a = %link.a, b = %link.b, error = %e, "Failed to remove link");
            }
        }
        for node in &mut self.nodes {
            if let Err(e) = node.destroy().await {
                tracing::warn!(node = %node.name(), error = %e, "Failed to destroy node");
            }
        }
    }

    /// Look up a node by name.
    pub fn node(&mut self, name: &str) -> Result<&mut Node> {
        let i = self.index_of(name)?;
        Ok(&mut self.nodes[i])
    }

    /// Send one ICMP echo from `from` to `addr`.
    ///
    /// `None` when the output carries no ping summary.
    pub async fn ping(&mut self, from: &str, addr: &str) -> Result<Option<PingStats>> {
        let out = self.node(from)?.cmd(&format!("ping -c 1 {addr}")).await?;
        let stats = parse_ping(&out);
        tracing::info!(from = %from, addr = %addr, stats = ?stats, "Ping completed");
        Ok(stats)
    }

    async fn create_links(&mut self) -> Result<()> {
        for plan in self.planned.clone() {
            let (ia, iface_a) = plan.a;
            let (ib, iface_b) = plan.b;
            let a = self.nodes[ia].endpoint(iface_a.as_str());
            let b = self.nodes[ib].endpoint(iface_b.as_str());

            let link = self.fabric.create_link(a, b, true).await?;
            self.nodes[ia].add_interface(iface_a);
            self.nodes[ib].add_interface(iface_b);
            self.links.push(link);
        }
        Ok(())
    }

    fn node_builder(&self, name: &str) -> vsinet_core::NodeConfigBuilder {
        NodeConfig::builder(self.test_id.as_str(), name)
            .test_dir(&self.test_dir)
            .runtime(self.config.runtime.as_str())
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.nodes
            .iter()
            .position(|n| n.name() == name)
            .ok_or_else(|| TopoError::UnknownNode(name.to_string()))
    }

    /// Links already planned on node `i`.
    fn planned_on(&self, i: usize) -> usize {
        self.planned
            .iter()
            .filter(|p| p.a.0 == i || p.b.0 == i)
            .count()
    }

    fn next_iface(&self, i: usize) -> Result<String> {
        let n = self.planned_on(i);
        let node = &self.nodes[i];
        match node.kind() {
            NodeKind::Switch(opts) => {
                let port = n + 1;
                if port > usize::from(opts.num_ports) {
                    return Err(TopoError::Config(format!(
                        "switch {} has no free port (num_ports = {})",
                        node.name(),
                        opts.num_ports
                    )));
                }
                Ok(port.to_string())
            }
            _ => Ok(format!("{}-eth{n}", node.name())),
        }
    }
}

/// Build the canonical topology: one switch `s1` and `k` hosts
/// `h1..hk`, each linked to the switch.
pub async fn single_switch(
    config: TopoConfig,
    runner: Arc<dyn HostRunner>,
    k: usize,
) -> Result<Topology> {
    let mut topo = Topology::new(config, runner).await?;
    topo.add_switch("s1").await?;
    for i in 1..=k {
        let host = format!("h{i}");
        topo.add_host(&host).await?;
        topo.add_link(&host, "s1")?;
    }
    Ok(topo)
}
