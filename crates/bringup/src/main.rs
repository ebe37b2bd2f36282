mod config;
mod signals;

use anyhow::{bail, Context};
use br_common::config::EnvConfig;
use br_dhcp::{ClientError, ClientExit, HookScript};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::BringupConfig;

const USAGE: &str = "usage: bringup <scan|dhcp> [interface]";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,bringup=debug")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let command = args.next();
    let interface = args.next();

    let env = EnvConfig::from_env();
    let config = BringupConfig::load(&env.config_path)
        .with_context(|| format!("loading {}", env.config_path.display()))?;
    let interface = interface.or(env.interface);

    match command.as_deref() {
        Some("scan") => run_scan(config, interface).await,
        Some("dhcp") => run_dhcp(config, interface).await,
        _ => bail!(USAGE),
    }
}

async fn run_scan(config: BringupConfig, interface: Option<String>) -> anyhow::Result<()> {
    let mut scan = config.scan;
    if let Some(interface) = interface {
        scan.interface = interface;
    }
    info!("Scanning on {}", scan.interface);

    let aps = tokio::task::spawn_blocking(move || br_wscan::scan_with(&scan))
        .await
        .context("scan task failed")??;

    println!("{}", serde_json::to_string_pretty(&aps)?);
    Ok(())
}

async fn run_dhcp(config: BringupConfig, interface: Option<String>) -> anyhow::Result<()> {
    let mut dhcp = config.dhcp;
    if let Some(interface) = interface {
        dhcp.interface = interface;
    }
    info!("Starting DHCP client on {}", dhcp.interface);

    let script = HookScript::from_config(&dhcp);
    let mut handle = br_dhcp::spawn_dhcp_client(&dhcp, script)
        .with_context(|| format!("starting DHCP client on {}", dhcp.interface))?;

    let control = handle.controller();
    tokio::spawn(async move {
        if let Err(e) = signals::forward_signals(control).await {
            warn!("Signal handling unavailable: {}", e);
        }
    });

    match handle.wait_bound().await {
        Ok(lease) => println!("{}", serde_json::to_string(&lease)?),
        // The task ended first; join reports why.
        Err(ClientError::Stopped) => {}
        Err(e) => return Err(e.into()),
    }

    match handle.join().await? {
        ClientExit::Terminated => {
            info!("DHCP client terminated");
            Ok(())
        }
        ClientExit::LeaseFailed => {
            error!("No lease obtained on {}", dhcp.interface);
            bail!("no lease obtained on {}", dhcp.interface)
        }
    }
}
