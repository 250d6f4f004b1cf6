// src/net/mod.rs
pub mod fabric;
pub mod mitm;

use grid_protocol::Frame;

/// One directional path on the simulated medium. mpsc preserves FIFO per
/// path, which is the ordering guarantee the fabric promises.
pub type Port = tokio::sync::mpsc::Sender<Frame>;
