// src/net/fabric.rs — address-table-driven switch
//
// Strictly static forwarding: destination hit goes out the mapped egress
// unchanged, miss is dropped and reported. No learning, no flooding.

use super::Port;
use crate::errors::SimError;
use crate::signals::{SignalHub, SignalKind};
use grid_protocol::{CONTROLLER_ADDR, DER_ADDR, Frame, LOAD_ADDR, NodeAddress};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Destination-to-egress mapping, fixed at initialization.
#[derive(Debug, Clone)]
pub struct AddressTable {
    map: HashMap<NodeAddress, usize>,
}

impl AddressTable {
    pub fn new(entries: impl IntoIterator<Item = (NodeAddress, usize)>) -> Self {
        Self {
            map: entries.into_iter().collect(),
        }
    }

    /// The fixed network design: controller on egress 0, DER on 1, load on 2.
    pub fn standard() -> Self {
        Self::new([(CONTROLLER_ADDR, 0), (DER_ADDR, 1), (LOAD_ADDR, 2)])
    }

    pub fn lookup(&self, dst: &NodeAddress) -> Option<usize> {
        self.map.get(dst).copied()
    }
}

pub struct Switch {
    table: AddressTable,
    egress: Vec<Port>,
    rx: mpsc::Receiver<Frame>,
    hub: SignalHub,
}

impl Switch {
    pub fn new(
        table: AddressTable,
        egress: Vec<Port>,
        rx: mpsc::Receiver<Frame>,
        hub: SignalHub,
    ) -> Self {
        Self {
            table,
            egress,
            rx,
            hub,
        }
    }

    /// Forward one frame, or drop it on a table miss.
    pub async fn route(&self, frame: Frame) -> Result<(), SimError> {
        match self.table.lookup(&frame.header.dst) {
            Some(idx) => {
                debug!(
                    egress = idx,
                    frame = %serde_json::to_string(&frame).unwrap_or_default(),
                    "switch: forwarding"
                );
                self.egress[idx]
                    .send(frame)
                    .await
                    .map_err(|_| SimError::ChannelClosed("switch egress"))
            }
            None => {
                warn!(dst = %frame.header.dst, kind = ?frame.header.kind, "switch: unknown destination, dropping");
                self.hub.emit(SignalKind::ForwardingMiss, 1.0).await;
                Ok(())
            }
        }
    }

    pub async fn run(mut self) {
        while let Some(frame) = self.rx.recv().await {
            if let Err(e) = self.route(frame).await {
                warn!(%e, "switch: forwarding stopped");
                break;
            }
        }
    }
}

// ================================ Tests =====================================
