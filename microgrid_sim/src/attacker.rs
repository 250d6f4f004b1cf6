// src/attacker.rs — adversarial traffic generator
//
// Purely generative: on a fixed period, dump a burst of junk frames straight
// onto the fabric to contend for forwarding capacity. No receive side.

use crate::config::Config;
use crate::net::Port;
use grid_protocol::{ATTACKER_ADDR, CONTROLLER_ADDR, Frame};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::info;

pub fn spawn(cfg: &Config, fabric_in: Port) -> JoinHandle<()> {
    let burst = cfg.burst_size;
    let interval = cfg.attack_interval();

    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // prime: first burst lands one full interval in
        ticker.tick().await;

        loop {
            ticker.tick().await;
            info!(burst, "attacker: launching flood burst");
            for _ in 0..burst {
                let tag: u32 = rand::random();
                let frame = Frame::junk(ATTACKER_ADDR, CONTROLLER_ADDR, format!("flood-{tag:08x}"));
                if fabric_in.send(frame).await.is_err() {
                    return;
                }
            }
        }
    })
}

// ================================ Tests =====================================
