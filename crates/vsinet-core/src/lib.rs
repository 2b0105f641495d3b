//! # vsinet-core
//!
//! Node orchestration layer for vsinet emulated topologies.
//!
//! This crate turns a bare container from `vsinet-env` into a usable
//! network node: it wires nodes together with veth pairs, drives the
//! node's shells over a prompt-synchronised byte stream, and boots
//! switch firmware (tap ports, namespace migration, readiness polling,
//! failure diagnostics).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    vsinet-core (host)                    │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  ┌─────────────────┐     ┌──────────────────────────┐    │
//! │  │      Node       │────▶│  Environment             │    │
//! │  │  - start()      │     │  (from vsinet-env)       │    │
//! │  │  - cmd()/cli()  │     └──────────────────────────┘    │
//! │  │  - destroy()    │                                     │
//! │  └─────────────────┘                                     │
//! │      │         │                                         │
//! │      ▼         ▼                                         │
//! │  ┌─────────┐ ┌──────────────┐   ┌─────────────────────┐  │
//! │  │ Session │ │BootSequencer │   │    LinkFabric       │  │
//! │  │ shell / │ │ ns, taps,    │   │  veth pairs across  │  │
//! │  │ cli     │ │ readiness    │   │  node namespaces    │  │
//! │  └─────────┘ └──────────────┘   └─────────────────────┘  │
//! │      │ 0x7f-terminated prompts                           │
//! └──────┼───────────────────────────────────────────────────┘
//!        ▼
//!   bash / vtysh inside the container
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use vsinet_core::{Endpoint, LinkFabric, Node, NodeConfig, NodeKind, SwitchOptions};
//! use vsinet_env::ProcessRunner;
//!
//! # async fn example() -> vsinet_core::Result<()> {
//! let runner = Arc::new(ProcessRunner::new());
//!
//! let mut s1 = Node::create(
//!     NodeConfig::builder("4711", "s1")
//!         .image("openswitch/genericx86-64")
//!         .kind(NodeKind::Switch(SwitchOptions::default()))
//!         .test_dir("/tmp/vsinet-test/4711")
//!         .build()?,
//!     runner.clone(),
//! )
//! .await?;
//!
//! let report = s1.start().await?;
//! assert!(report.result.is_ok());
//!
//! println!("{}", s1.cli("show running-config").await?);
//! s1.destroy().await?;
//! # Ok(())
//! # }
//! ```

mod boot;
mod config;
mod diagnostics;
mod error;
mod kind;
mod link;
mod node;
mod readiness;
mod session;

pub use boot::{BootOutcome, BootReport, BootResult, BootSequencer, BootState, FirmwareFailure};
pub use config::{NodeConfig, NodeConfigBuilder, NodeId};
pub use diagnostics::{collect as collect_diagnostics, DIAGNOSTICS_FILE};
pub use error::{CoreError, Result};
pub use kind::{
    BootStrategy, CompanionConfig, HostOptions, KindProfile, NodeKind, PeeringOptions,
    SwitchOptions,
};
pub use link::{Endpoint, Link, LinkFabric, MAX_IFACE_NAME};
pub use node::Node;
pub use readiness::{ReadinessStatus, READINESS_SCRIPT, READINESS_SCRIPT_NAME};
pub use session::{Session, SessionKind, SessionState, SENTINEL};
