// src/signals.rs — timestamped scalar observability events
//
// Every signal goes out on an in-process broadcast bus (tests subscribe
// there) and, for the real binary, is appended to logs/signals.csv.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{Mutex, OnceCell, broadcast};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    ControlOutput,
    ControlError,
    DeliveryLatency,
    Retransmission,
    ForwardingMiss,
    DeliveryFailed,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::ControlOutput => "control_output",
            SignalKind::ControlError => "control_error",
            SignalKind::DeliveryLatency => "delivery_latency",
            SignalKind::Retransmission => "retransmission",
            SignalKind::ForwardingMiss => "forwarding_miss",
            SignalKind::DeliveryFailed => "delivery_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalEvent {
    pub ts: DateTime<Utc>,
    pub kind: SignalKind,
    pub value: f64,
}

/// Cheap-to-clone handle; every component gets one instead of a global.
#[derive(Clone)]
pub struct SignalHub {
    tx: broadcast::Sender<SignalEvent>,
    to_csv: bool,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::build(true)
    }

    /// Bus-only hub for tests; never touches the filesystem.
    pub fn in_memory() -> Self {
        Self::build(false)
    }

    fn build(to_csv: bool) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self { tx, to_csv }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SignalEvent> {
        self.tx.subscribe()
    }

    pub async fn emit(&self, kind: SignalKind, value: f64) {
        let ev = SignalEvent {
            ts: Utc::now(),
            kind,
            value,
        };
        // nobody listening is fine
        let _ = self.tx.send(ev.clone());
        if self.to_csv {
            append_csv(&ev).await;
        }
    }
}

// ------------------------------ CSV sink ------------------------------------

static SIGNALS: OnceCell<Arc<Mutex<BufWriter<tokio::fs::File>>>> = OnceCell::const_new();

async fn get_file() -> Arc<Mutex<BufWriter<tokio::fs::File>>> {
    let arc = SIGNALS
        .get_or_init(|| async {
            let _ = fs::create_dir_all("logs").await;
            let path = "logs/signals.csv";
            let fresh = !fs::try_exists(path).await.unwrap_or(false);
            let f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .expect("open signals.csv");
            let writer = BufWriter::new(f);
            let m = Arc::new(Mutex::new(writer));
            if fresh {
                let mut g = m.lock().await;
                let _ = g.write_all(b"ts,signal,value\n").await;
                let _ = g.flush().await;
            }
            m
        })
        .await;
    arc.clone()
}

/// signals.csv: ts,signal,value
async fn append_csv(ev: &SignalEvent) {
    let line = format!(
        "{},{},{:.6}\n",
        ev.ts.to_rfc3339(),
        ev.kind.as_str(),
        ev.value
    );
    let file = get_file().await;
    let mut f = file.lock().await;
    let _ = f.write_all(line.as_bytes()).await;
    let _ = f.flush().await;
}

// ================================ Tests =====================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitted_signals_reach_subscribers() {
        let hub = SignalHub::in_memory();
        let mut rx = hub.subscribe();

        hub.emit(SignalKind::ControlError, 0.2).await;
        hub.emit(SignalKind::Retransmission, 1.0).await;

        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind, SignalKind::ControlError);
        assert_eq!(first.value, 0.2);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.kind, SignalKind::Retransmission);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn late_subscribers_miss_nothing_new() {
        let hub = SignalHub::in_memory();
        hub.emit(SignalKind::ControlOutput, 3.08).await;

        // subscribed after the first emit; only sees what follows
        let mut rx = hub.subscribe();
        hub.emit(SignalKind::DeliveryLatency, 0.5).await;
        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.kind, SignalKind::DeliveryLatency);
        assert!(rx.try_recv().is_err());
    }
}
