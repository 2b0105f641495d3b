//! # vsinet-topo
//!
//! Topology controller for vsinet: composes nodes from `vsinet-core`
//! into a test topology, wires the links, starts nodes in order and
//! aborts the whole run when any switch fails to boot.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use vsinet_env::ProcessRunner;
//! use vsinet_topo::{single_switch, TopoConfig};
//!
//! # async fn example() -> vsinet_topo::Result<()> {
//! let config = TopoConfig::from_env()?;
//! let mut topo = single_switch(config, Arc::new(ProcessRunner::new()), 2).await?;
//! topo.start().await?;
//!
//! topo.node("s1")?.ns_cmd("ifconfig 1 10.0.0.10 netmask 255.0.0.0").await?;
//! let stats = topo.ping("h1", "10.0.0.10").await?;
//!
//! topo.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod ping;
pub mod topology;

pub use config::TopoConfig;
pub use error::{Result, TopoError};
pub use ping::{parse_ping, PingStats};
pub use topology::{single_switch, Topology};
