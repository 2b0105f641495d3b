//! vsinet demo runner.
//!
//! Builds one switch with two hosts, addresses switch port 1 and host 1,
//! pings across the link and tears everything down. Exits non-zero if a
//! node fails to boot or the ping loses packets.

use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vsinet_env::ProcessRunner;
use vsinet_topo::{single_switch, TopoConfig, TopoError, Topology};

const SWITCH_ADDR: &str = "10.0.0.10";

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("vsinet_topo=info".parse()?)
                .add_directive("vsinet_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = TopoConfig::from_env()?;
    tracing::info!(?config, "Configuration loaded");

    let mut topo = single_switch(config, Arc::new(ProcessRunner::new()), 2).await?;
    tracing::info!(test_id = %topo.test_id(), "Topology built");

    match topo.start().await {
        Ok(()) => {}
        Err(TopoError::Boot { node, result, diagnostics }) => {
            eprintln!("{node} failed to boot: {result}");
            if let Some(path) = diagnostics {
                eprintln!("diagnostics: {}", path.display());
            }
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    }

    let outcome = pingall(&mut topo).await;
    topo.stop().await;

    if outcome? {
        println!("ping {SWITCH_ADDR}: 1/1 received");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("ping {SWITCH_ADDR}: failed");
        Ok(ExitCode::FAILURE)
    }
}

async fn pingall(topo: &mut Topology) -> anyhow::Result<bool> {
    topo.node("s1")?
        .ns_cmd(&format!("ifconfig 1 {SWITCH_ADDR} netmask 255.0.0.0"))
        .await?;
    topo.node("h1")?
        .cmd("ip addr add 10.0.0.11/24 dev h1-eth0 && ip link set h1-eth0 up")
        .await?;

    let stats = topo.ping("h1", SWITCH_ADDR).await?;
    tracing::info!(?stats, "Ping result");
    Ok(stats.is_some_and(|s| s.success()))
}
