// src/main.rs
mod attacker;
mod config;
mod controller;
mod endpoints;
mod errors;
mod net;
mod oracle;
mod signals;

use anyhow::Result;
use grid_protocol::{DER_ADDR, LOAD_ADDR};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // -------- logging ----------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("microgrid_sim=info".parse().unwrap())
                .add_directive("grid_protocol=info".parse().unwrap())
                .add_directive("tokio=warn".parse().unwrap()),
        )
        .compact()
        .init();

    // -------- config + signals ----------
    let cfg = config::Cli::parse_and_build_config()?;
    info!(?cfg, "Microgrid control-network sim starting");
    let hub = signals::SignalHub::new();

    // -------- fabric wiring ----------
    // one shared ingress; egress 0/1/2 = controller / DER / load
    let (fabric_tx, fabric_rx) = mpsc::channel(1024);
    let (ctrl_tx, ctrl_rx) = mpsc::channel(256);
    let (der_tx, der_rx) = mpsc::channel(256);
    let (load_tx, load_rx) = mpsc::channel(256);
    let switch = net::fabric::Switch::new(
        net::fabric::AddressTable::standard(),
        vec![ctrl_tx, der_tx, load_tx],
        fabric_rx,
        hub.clone(),
    );
    tokio::spawn(switch.run());

    // -------- interception layer on the controller uplink ----------
    // both MITM paths rejoin the same fabric ingress
    let (uplink_tx, uplink_rx) = mpsc::channel(256);
    let mitm = net::mitm::Mitm::new(
        cfg.mitm_offset,
        fabric_tx.clone(),
        fabric_tx.clone(),
        uplink_rx,
    );
    tokio::spawn(mitm.run());

    // -------- passive endpoints ----------
    endpoints::spawn("der", DER_ADDR, fabric_tx.clone(), der_rx);
    endpoints::spawn("load", LOAD_ADDR, fabric_tx.clone(), load_rx);

    // -------- adversarial traffic ----------
    attacker::spawn(&cfg, fabric_tx.clone());

    // -------- controller ----------
    let oracle = Arc::new(oracle::RemoteOracle::new(
        cfg.oracle_addr.clone(),
        cfg.oracle_timeout(),
    ));
    let controller = controller::Controller::new(&cfg, oracle, uplink_tx, ctrl_rx, hub.clone());
    tokio::spawn(controller.run());

    info!("sim running. Press Ctrl+C to stop…");

    // -------- graceful shutdown ----------
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(?e, "failed to install Ctrl+C handler");
    }
    info!("shutdown signal received; exiting.");
    Ok(())
}
