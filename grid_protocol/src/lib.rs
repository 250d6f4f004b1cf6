// lib.rs — Shared control-network protocol (frames, addresses, control payloads)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// =============================== Common =====================================

pub type Timestamp = DateTime<Utc>;

pub const PROTOCOL_VERSION: u16 = 1;

/// Marker appended to the rendered command text by the interception layer.
pub const TAMPER_MARK: &str = "[MITM modified]";

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("bad node address {0:?}")]
    BadAddress(String),
    #[error("no numeric magnitude in command text {0:?}")]
    BadMagnitude(String),
}

// ============================== Addressing ==================================

/// MAC-style node address on the shared medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress(pub [u8; 6]);

pub const CONTROLLER_ADDR: NodeAddress = NodeAddress([0, 0, 0, 0, 0, 0x02]);
pub const DER_ADDR: NodeAddress = NodeAddress([0, 0, 0, 0, 0, 0x04]);
pub const LOAD_ADDR: NodeAddress = NodeAddress([0, 0, 0, 0, 0, 0x05]);
pub const ATTACKER_ADDR: NodeAddress = NodeAddress([0, 0, 0, 0, 0xAA, 0xAA]);

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for NodeAddress {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = 0;
        for (i, part) in s.split(':').enumerate() {
            if i >= 6 {
                return Err(ProtocolError::BadAddress(s.to_string()));
            }
            bytes[i] = u8::from_str_radix(part, 16)
                .map_err(|_| ProtocolError::BadAddress(s.to_string()))?;
            parts += 1;
        }
        if parts != 6 {
            return Err(ProtocolError::BadAddress(s.to_string()));
        }
        Ok(NodeAddress(bytes))
    }
}

// ============================ Control payloads ==============================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    Increase,
    Decrease,
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Directive::Increase => write!(f, "Increase"),
            Directive::Decrease => write!(f, "Decrease"),
        }
    }
}

/// Commands travel with centi-unit resolution so the rendered text and the
/// numeric magnitude round-trip exactly.
fn round_centi(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// One feedback-control command. The human-readable text is a pure rendering
/// of the structured fields, never stored state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub seq: u64,
    pub sent_at: Timestamp,
    pub directive: Directive,
    pub magnitude: f64,
    pub tampered: bool,
}

impl ControlMessage {
    pub fn new(seq: u64, directive: Directive, magnitude: f64) -> Self {
        Self {
            seq,
            sent_at: Utc::now(),
            directive,
            magnitude: round_centi(magnitude),
            tampered: false,
        }
    }

    /// Copy of this message with the magnitude shifted by `offset` and the
    /// tamper mark set. Same seq and timestamp: the wire sees a plausible
    /// original, not a new command.
    pub fn tampered_by(&self, offset: f64) -> Self {
        Self {
            magnitude: round_centi(self.magnitude + offset),
            tampered: true,
            ..self.clone()
        }
    }

    /// e.g. `"Increase DER output by 3.08"`, plus the tamper mark when set.
    pub fn command_text(&self) -> String {
        let base = format!("{} DER output by {}", self.directive, self.magnitude);
        if self.tampered {
            format!("{base} {TAMPER_MARK}")
        } else {
            base
        }
    }
}

/// Recover the numeric magnitude from a rendered command text (the trailing
/// numeric token, ignoring a tamper mark).
pub fn parse_magnitude(text: &str) -> Result<f64, ProtocolError> {
    let body = text.trim_end().trim_end_matches(TAMPER_MARK).trim_end();
    body.split_whitespace()
        .last()
        .and_then(|tok| tok.parse::<f64>().ok())
        .ok_or_else(|| ProtocolError::BadMagnitude(text.to_string()))
}

/// Endpoint acknowledgment. Endpoints do not interpret commands; they only
/// mirror the sequence number of whatever payload they received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckMessage {
    pub acked_seq: Option<u64>,
    pub sent_at: Timestamp,
}

impl AckMessage {
    pub fn echoing(acked_seq: Option<u64>) -> Self {
        Self {
            acked_seq,
            sent_at: Utc::now(),
        }
    }
}

// ================================ Frames ====================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Control,
    Ack,
    Junk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub frame_id: String,
    pub src: NodeAddress,
    pub dst: NodeAddress,
    pub kind: FrameKind,
    pub protocol_version: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum FramePayload {
    Control(ControlMessage),
    Ack(AckMessage),
    Junk(String),
}

impl FramePayload {
    pub fn seq(&self) -> Option<u64> {
        match self {
            FramePayload::Control(m) => Some(m.seq),
            _ => None,
        }
    }

    fn kind(&self) -> FrameKind {
        match self {
            FramePayload::Control(_) => FrameKind::Control,
            FramePayload::Ack(_) => FrameKind::Ack,
            FramePayload::Junk(_) => FrameKind::Junk,
        }
    }
}

/// Minimal addressed unit on the simulated medium. Immutable once sent:
/// forwarding hops pass it through as-is or replace it with a newly built
/// frame, never mutate a shared copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: FramePayload,
}

impl Frame {
    pub fn new(src: NodeAddress, dst: NodeAddress, payload: FramePayload) -> Self {
        Self {
            header: FrameHeader {
                frame_id: Uuid::new_v4().to_string(),
                src,
                dst,
                kind: payload.kind(),
                protocol_version: PROTOCOL_VERSION,
            },
            payload,
        }
    }

    pub fn control(src: NodeAddress, dst: NodeAddress, msg: ControlMessage) -> Self {
        Self::new(src, dst, FramePayload::Control(msg))
    }

    pub fn ack(src: NodeAddress, dst: NodeAddress, ack: AckMessage) -> Self {
        Self::new(src, dst, FramePayload::Ack(ack))
    }

    pub fn junk(src: NodeAddress, dst: NodeAddress, note: impl Into<String>) -> Self {
        Self::new(src, dst, FramePayload::Junk(note.into()))
    }
}

// ================================ Tests =====================================
