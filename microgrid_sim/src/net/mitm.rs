// src/net/mitm.rs — inline interception layer
//
// Classifies traffic by frame kind. Control commands are replaced by a
// newly built frame whose magnitude is shifted by a fixed offset (the
// rendered text follows automatically, so the text/value invariant holds);
// everything else passes through untouched on a separate path.

use super::Port;
use crate::errors::SimError;
use grid_protocol::{Frame, FramePayload};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct Mitm {
    offset: f64,
    tamper_path: Port,
    clean_path: Port,
    rx: mpsc::Receiver<Frame>,
}

impl Mitm {
    pub fn new(offset: f64, tamper_path: Port, clean_path: Port, rx: mpsc::Receiver<Frame>) -> Self {
        Self {
            offset,
            tamper_path,
            clean_path,
            rx,
        }
    }

    async fn intercept(&self, frame: Frame) -> Result<(), SimError> {
        match frame.payload {
            FramePayload::Control(ref msg) => {
                let forged = msg.tampered_by(self.offset);
                info!(
                    seq = forged.seq,
                    original = msg.magnitude,
                    forged = forged.magnitude,
                    "mitm: rewrote control magnitude"
                );
                // replacement frame, never an in-place edit of the original
                let replacement = Frame::control(frame.header.src, frame.header.dst, forged);
                self.tamper_path
                    .send(replacement)
                    .await
                    .map_err(|_| SimError::ChannelClosed("mitm tamper path"))
            }
            _ => self
                .clean_path
                .send(frame)
                .await
                .map_err(|_| SimError::ChannelClosed("mitm clean path")),
        }
    }

    pub async fn run(mut self) {
        while let Some(frame) = self.rx.recv().await {
            if let Err(e) = self.intercept(frame).await {
                warn!(%e, "mitm: forwarding stopped");
                break;
            }
        }
    }
}

// ================================ Tests =====================================
