//! # vsinet-env
//!
//! Execution environment layer for vsinet emulated topologies.
//! Each emulated node runs inside one privileged container; this crate
//! creates, inspects, and destroys those containers through the host's
//! container runtime CLI.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vsinet_env::{EnvironmentBuilder, ProcessRunner};
//!
//! # async fn example() -> vsinet_env::Result<()> {
//! let runner = Arc::new(ProcessRunner::new());
//!
//! // Blocks until the container's init process has a PID
//! let mut env = EnvironmentBuilder::new("4711-h1", "ubuntu:latest")
//!     .node_dir("/tmp/vsinet-test/4711/h1")
//!     .tty(true)
//!     .init_command("/bin/bash")
//!     .build(runner)
//!     .await?;
//!
//! let out = env.run("ip -brief link").await?;
//! println!("{}", out.output);
//!
//! env.destroy().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Crash recovery**: a stale container with the same id is force-removed first
//! - **Shared directory**: `<node_dir>/shared` is bind-mounted at `/shared`
//! - **Start diagnostics**: runtime output and the daemon log tail on failure
//! - **Injectable host seam**: every host command goes through [`HostRunner`]

mod builder;
mod config;
mod daemon_log;
mod environment;
mod error;
mod poll;
mod runner;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use builder::EnvironmentBuilder;
pub use config::{EnvironmentConfig, InitCommand, Mount, BASH_RC_FILE, SHARED_MOUNT_POINT};
pub use daemon_log::{tail_filtered, DaemonLog, DaemonLogProbe, LogCandidate};
pub use environment::{list_all, EnvState, Environment};
pub use error::{EnvError, Result};
pub use poll::{PollError, PollPolicy};
pub use runner::{CommandOutput, HostRunner, Interactive, ProcessRunner};
