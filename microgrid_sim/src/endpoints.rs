// src/endpoints.rs — passive actuator endpoints
//
// Contract: one acknowledgment back to the controller per received frame,
// regardless of content. The endpoint interprets nothing; it only mirrors
// the sequence number of a sequenced payload.

use crate::net::Port;
use grid_protocol::{AckMessage, CONTROLLER_ADDR, Frame, NodeAddress};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub fn spawn(
    name: &'static str,
    addr: NodeAddress,
    uplink: Port,
    mut rx: mpsc::Receiver<Frame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            info!(
                node = name,
                kind = ?frame.header.kind,
                from = %frame.header.src,
                "endpoint: frame received"
            );
            let ack = Frame::ack(addr, CONTROLLER_ADDR, AckMessage::echoing(frame.payload.seq()));
            if uplink.send(ack).await.is_err() {
                warn!(node = name, "endpoint: uplink closed, stopping");
                break;
            }
        }
    })
}

// ================================ Tests =====================================

#[cfg(test)]
mod tests {
    use super::*;
    use grid_protocol::{
        ATTACKER_ADDR, ControlMessage, DER_ADDR, Directive, FrameKind, FramePayload,
    };

    #[tokio::test]
    async fn every_frame_gets_exactly_one_ack_echoing_its_seq() {
        let (up_tx, mut up_rx) = mpsc::channel(8);
        let (in_tx, in_rx) = mpsc::channel(8);
        let _task = spawn("der", DER_ADDR, up_tx, in_rx);

        let cmd = Frame::control(
            CONTROLLER_ADDR,
            DER_ADDR,
            ControlMessage::new(5, Directive::Decrease, 1.5),
        );
        in_tx.send(cmd).await.unwrap();

        let ack = up_rx.recv().await.unwrap();
        assert_eq!(ack.header.kind, FrameKind::Ack);
        assert_eq!(ack.header.src, DER_ADDR);
        assert_eq!(ack.header.dst, CONTROLLER_ADDR);
        match ack.payload {
            FramePayload::Ack(a) => assert_eq!(a.acked_seq, Some(5)),
            other => panic!("expected ack payload, got {other:?}"),
        }
        assert!(up_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn junk_is_acked_without_a_sequence() {
        let (up_tx, mut up_rx) = mpsc::channel(8);
        let (in_tx, in_rx) = mpsc::channel(8);
        let _task = spawn("load", grid_protocol::LOAD_ADDR, up_tx, in_rx);

        in_tx
            .send(Frame::junk(ATTACKER_ADDR, grid_protocol::LOAD_ADDR, "noise"))
            .await
            .unwrap();

        let ack = up_rx.recv().await.unwrap();
        match ack.payload {
            FramePayload::Ack(a) => assert_eq!(a.acked_seq, None),
            other => panic!("expected ack payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_deliveries_are_acked_each_time() {
        // at-least-once transport: the endpoint does not deduplicate
        let (up_tx, mut up_rx) = mpsc::channel(8);
        let (in_tx, in_rx) = mpsc::channel(8);
        let _task = spawn("der", DER_ADDR, up_tx, in_rx);

        let cmd = Frame::control(
            CONTROLLER_ADDR,
            DER_ADDR,
            ControlMessage::new(7, Directive::Increase, 2.0),
        );
        in_tx.send(cmd.clone()).await.unwrap();
        in_tx.send(cmd).await.unwrap();

        for _ in 0..2 {
            let ack = up_rx.recv().await.unwrap();
            match ack.payload {
                FramePayload::Ack(a) => assert_eq!(a.acked_seq, Some(7)),
                other => panic!("expected ack payload, got {other:?}"),
            }
        }
        assert!(up_rx.try_recv().is_err());
    }
}
