//! Configuration for topology runs.
//!
//! This is the only place that reads process environment variables; the
//! core crates receive everything through explicit configuration.

use crate::error::{Result, TopoError};
use std::path::PathBuf;
use vsinet_env::Mount;

/// Resolved settings for one topology run.
#[derive(Debug, Clone, PartialEq)]
pub struct TopoConfig {
    /// Switch firmware image.
    pub switch_image: String,
    /// Host image.
    pub host_image: String,
    /// Routing peer image.
    pub peer_image: String,
    /// Parent of every per-test directory.
    pub test_root: PathBuf,
    /// Logical ports per switch.
    pub num_ports: u16,
    /// Coverage output directory mounted into switches.
    pub coverage_dir: Option<PathBuf>,
    /// Prefix for generated test ids, set when several sandboxes share a host.
    pub sandbox_id: Option<String>,
    /// Extra mounts for switch nodes.
    pub switch_mounts: Vec<Mount>,
    /// Extra mounts for host nodes.
    pub host_mounts: Vec<Mount>,
    /// Container runtime binary.
    pub runtime: String,
}

impl Default for TopoConfig {
    fn default() -> Self {
        Self {
            switch_image: "openswitch/genericx86-64".to_string(),
            host_image: "ubuntu:latest".to_string(),
            peer_image: "openswitch/quagga".to_string(),
            test_root: PathBuf::from("/tmp/vsinet-test"),
            num_ports: 54,
            coverage_dir: None,
            sandbox_id: None,
            switch_mounts: Vec::new(),
            host_mounts: Vec::new(),
            runtime: "docker".to_string(),
        }
    }
}

impl TopoConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `VSI_IMAGE_NAME` | `openswitch/genericx86-64` |
    /// | `VSI_HOST_IMAGE` | `ubuntu:latest` |
    /// | `VSI_PEER_IMAGE` | `openswitch/quagga` |
    /// | `VSI_TEST_ROOT` | `/tmp/vsinet-test` |
    /// | `VSI_NUM_PORTS` | `54` |
    /// | `VSI_COV_DATA_DIR` | unset |
    /// | `SANDBOX_UUID` | unset |
    /// | `VSI_SWITCH_MOUNTS` | empty (comma-separated `host:guest`) |
    /// | `VSI_HOST_MOUNTS` | empty (comma-separated `host:guest`) |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let num_ports = match get("VSI_NUM_PORTS") {
            Some(v) => v
                .trim()
                .parse::<u16>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    TopoError::Config(format!("VSI_NUM_PORTS `{v}` is not a port count"))
                })?,
            None => default.num_ports,
        };

        Ok(Self {
            switch_image: get("VSI_IMAGE_NAME").unwrap_or(default.switch_image),
            host_image: get("VSI_HOST_IMAGE").unwrap_or(default.host_image),
            peer_image: get("VSI_PEER_IMAGE").unwrap_or(default.peer_image),
            test_root: get("VSI_TEST_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.test_root),
            num_ports,
            coverage_dir: get("VSI_COV_DATA_DIR").map(PathBuf::from),
            sandbox_id: get("SANDBOX_UUID"),
            switch_mounts: parse_mounts(get("VSI_SWITCH_MOUNTS").as_deref())?,
            host_mounts: parse_mounts(get("VSI_HOST_MOUNTS").as_deref())?,
            runtime: default.runtime,
        })
    }

    /// A fresh id for one test run: the last group of a v4 UUID, prefixed
    /// by the sandbox id when one is set.
    pub fn generate_test_id(&self) -> String {
        let uuid = uuid::Uuid::new_v4().to_string();
        let tail = uuid.rsplit('-').next().unwrap_or(&uuid).to_string();
        match &self.sandbox_id {
            Some(sandbox) => format!("{sandbox}-{tail}"),
            None => tail,
        }
    }
}

fn parse_mounts(value: Option<&str>) -> Result<Vec<Mount>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<Mount>()
                .map_err(|e| TopoError::Config(e.to_string()))
        })
        .collect()
}
