// src/controller/mod.rs — closed-loop control and reliable command transport
//
// Every measurement period: ask the oracle for the load, run the PID, send a
// setpoint command toward the DER, and push the same magnitude back to the
// oracle. Delivery is at-least-once: one pending slot, ack matching by
// sequence number, retransmission on timeout.

pub mod pid;

use crate::config::Config;
use crate::net::Port;
use crate::oracle::PowerOracle;
use crate::signals::{SignalHub, SignalKind};
use grid_protocol::{
    CONTROLLER_ADDR, ControlMessage, DER_ADDR, Directive, Frame, FramePayload,
};
use pid::PidState;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Placeholder deadline for the disabled select branch; never polled.
const FAR_FUTURE: Duration = Duration::from_secs(3600);

/// The single currently-unacknowledged outgoing command.
#[derive(Debug, Clone)]
struct PendingDelivery {
    message: ControlMessage,
    sent_at: Instant,
    retransmissions: u32,
    deadline: Instant,
}

pub struct Controller {
    pid: PidState,
    oracle: Arc<dyn PowerOracle>,
    uplink: Port,
    rx: mpsc::Receiver<Frame>,
    hub: SignalHub,
    warmup: Duration,
    period: Duration,
    ack_timeout: Duration,
    max_retries: Option<u32>,
    next_seq: u64,
    pending: Option<PendingDelivery>,
}

impl Controller {
    pub fn new(
        cfg: &Config,
        oracle: Arc<dyn PowerOracle>,
        uplink: Port,
        rx: mpsc::Receiver<Frame>,
        hub: SignalHub,
    ) -> Self {
        Self {
            pid: PidState::new(cfg.setpoint, cfg.kp, cfg.ki, cfg.kd, cfg.dt_secs()),
            oracle,
            uplink,
            rx,
            hub,
            warmup: cfg.warmup(),
            period: cfg.measure_period(),
            ack_timeout: cfg.ack_timeout(),
            max_retries: cfg.max_retries,
            next_seq: 0,
            pending: None,
        }
    }

    pub async fn run(mut self) {
        time::sleep(self.warmup).await;
        let mut ticker = time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let ack_deadline = self.pending.as_ref().map(|p| p.deadline);
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_measurement_cycle().await;
                }
                maybe = self.rx.recv() => match maybe {
                    Some(frame) => self.handle_frame(frame).await,
                    None => {
                        warn!("controller: ingress closed, stopping");
                        break;
                    }
                },
                _ = time::sleep_until(ack_deadline.unwrap_or_else(|| Instant::now() + FAR_FUTURE)),
                    if ack_deadline.is_some() =>
                {
                    self.on_ack_timeout().await;
                }
            }
        }
    }

    /// One control decision cycle. An unreachable oracle or garbage reply
    /// abandons the cycle; the next periodic tick starts fresh.
    async fn run_measurement_cycle(&mut self) {
        let measured = match self.oracle.get_power().await {
            Ok(v) => v,
            Err(e) => {
                warn!(%e, "oracle unavailable; skipping control cycle");
                return;
            }
        };

        let (output, error) = self.pid.update(measured);
        info!(
            measured,
            error = format_args!("{error:.4}"),
            output = format_args!("{output:.4}"),
            "pid cycle"
        );
        self.hub.emit(SignalKind::ControlError, error).await;
        self.hub.emit(SignalKind::ControlOutput, output).await;

        let directive = if output > 0.0 {
            Directive::Increase
        } else {
            Directive::Decrease
        };
        let msg = self.send_control_command(directive, output.abs()).await;

        // same magnitude goes to the physical model as the new DER setpoint
        if let Err(e) = self.oracle.set_der_output(msg.magnitude).await {
            warn!(%e, "oracle rejected setpoint update");
        }
    }

    /// Build, transmit, and record the next control command. A still-unacked
    /// predecessor is superseded: its slot and timer are simply replaced.
    async fn send_control_command(&mut self, directive: Directive, magnitude: f64) -> ControlMessage {
        let msg = ControlMessage::new(self.next_seq, directive, magnitude);
        self.next_seq += 1;

        info!(seq = msg.seq, text = %msg.command_text(), "sending control command");
        let frame = Frame::control(CONTROLLER_ADDR, DER_ADDR, msg.clone());
        if self.uplink.send(frame).await.is_err() {
            warn!("controller: uplink closed, command not sent");
        }

        if let Some(old) = self.pending.take() {
            warn!(
                old_seq = old.message.seq,
                new_seq = msg.seq,
                "superseding unacknowledged command"
            );
        }
        let now = Instant::now();
        self.pending = Some(PendingDelivery {
            message: msg.clone(),
            sent_at: now,
            retransmissions: 0,
            deadline: now + self.ack_timeout,
        });
        msg
    }

    /// Ack window expired: resend an exact duplicate (same seq, same payload)
    /// and re-arm, unless a configured retry bound says give up.
    async fn on_ack_timeout(&mut self) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };

        if let Some(max) = self.max_retries {
            if pending.retransmissions >= max {
                let seq = pending.message.seq;
                let tries = pending.retransmissions;
                self.pending = None;
                warn!(seq, tries, "no ack within retry bound; giving up on command");
                self.hub.emit(SignalKind::DeliveryFailed, f64::from(tries)).await;
                return;
            }
        }

        pending.retransmissions += 1;
        pending.deadline = Instant::now() + self.ack_timeout;
        let dup = pending.message.clone();
        let n = pending.retransmissions;

        warn!(seq = dup.seq, retransmissions = n, "ack timeout; retransmitting");
        if self
            .uplink
            .send(Frame::control(CONTROLLER_ADDR, DER_ADDR, dup))
            .await
            .is_err()
        {
            warn!("controller: uplink closed, retransmission not sent");
        }
        self.hub.emit(SignalKind::Retransmission, 1.0).await;
    }

    /// Acks matching the pending command clear it; everything else — stale
    /// acks, attacker junk, stray control frames — is unrelated noise.
    async fn handle_frame(&mut self, frame: Frame) {
        match frame.payload {
            FramePayload::Ack(ack) => match self.pending.take() {
                Some(p) if ack.acked_seq == Some(p.message.seq) => {
                    // slot stays cleared; the ack timer is disarmed with it
                    let latency_s = p.sent_at.elapsed().as_secs_f64();
                    info!(
                        seq = p.message.seq,
                        latency_s = format_args!("{latency_s:.3}"),
                        retransmissions = p.retransmissions,
                        "command acknowledged"
                    );
                    self.hub.emit(SignalKind::DeliveryLatency, latency_s).await;
                }
                other => {
                    self.pending = other;
                    debug!(acked_seq = ?ack.acked_seq, "stale or unmatched ack; ignoring");
                }
            },
            _ => {
                debug!(
                    kind = ?frame.header.kind,
                    from = %frame.header.src,
                    "unrelated traffic at controller; discarding"
                );
            }
        }
    }
}

// ================================ Tests =====================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{MockPowerOracle, OracleError};
    use grid_protocol::AckMessage;
    use mockall::Sequence;

    fn harness(
        oracle: MockPowerOracle,
        cfg: &Config,
    ) -> (Controller, mpsc::Receiver<Frame>, Port, SignalHub) {
        let (uplink_tx, uplink_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::channel(64);
        let hub = SignalHub::in_memory();
        let ctrl = Controller::new(cfg, Arc::new(oracle), uplink_tx, in_rx, hub.clone());
        (ctrl, uplink_rx, in_tx, hub)
    }

    fn steady_oracle(measured: f64) -> MockPowerOracle {
        let mut oracle = MockPowerOracle::new();
        oracle.expect_get_power().returning(move || Ok(measured));
        oracle.expect_set_der_output().returning(|_| Ok(()));
        oracle
    }

    fn sent_message(frame: &Frame) -> &ControlMessage {
        match &frame.payload {
            FramePayload::Control(m) => m,
            other => panic!("expected control frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_cycle_sends_the_expected_command() {
        let mut oracle = MockPowerOracle::new();
        oracle.expect_get_power().times(1).returning(|| Ok(0.1));
        oracle
            .expect_set_der_output()
            .times(1)
            .withf(|m| (m - 3.08).abs() < 1e-9)
            .returning(|_| Ok(()));

        let cfg = Config::default();
        let (mut ctrl, mut uplink, _in_tx, hub) = harness(oracle, &cfg);
        let mut signals = hub.subscribe();

        ctrl.run_measurement_cycle().await;

        let frame = uplink.try_recv().unwrap();
        let msg = sent_message(&frame);
        assert_eq!(msg.seq, 0);
        assert_eq!(msg.directive, Directive::Increase);
        assert_eq!(msg.command_text(), "Increase DER output by 3.08");
        assert_eq!(frame.header.dst, DER_ADDR);
        assert!(ctrl.pending.is_some());

        let err_ev = signals.try_recv().unwrap();
        assert_eq!(err_ev.kind, SignalKind::ControlError);
        assert!((err_ev.value - 0.2).abs() < 1e-12);
        let out_ev = signals.try_recv().unwrap();
        assert_eq!(out_ev.kind, SignalKind::ControlOutput);
        assert!((out_ev.value - 3.08).abs() < 1e-9);
    }

    #[tokio::test]
    async fn oracle_failure_abandons_the_cycle() {
        let mut oracle = MockPowerOracle::new();
        let mut seq = Sequence::new();
        oracle
            .expect_get_power()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(OracleError::Timeout));
        oracle
            .expect_get_power()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(0.1));
        oracle.expect_set_der_output().returning(|_| Ok(()));

        let cfg = Config::default();
        let (mut ctrl, mut uplink, _in_tx, _hub) = harness(oracle, &cfg);

        ctrl.run_measurement_cycle().await;
        assert!(uplink.try_recv().is_err());
        assert!(ctrl.pending.is_none());

        // next periodic cycle proceeds normally
        ctrl.run_measurement_cycle().await;
        let msg = uplink.try_recv().unwrap();
        assert_eq!(sent_message(&msg).seq, 0);
    }

    #[tokio::test]
    async fn sequences_increase_and_new_commands_supersede() {
        let cfg = Config::default();
        let (mut ctrl, mut uplink, _in_tx, _hub) = harness(steady_oracle(0.1), &cfg);

        ctrl.send_control_command(Directive::Increase, 1.0).await;
        ctrl.send_control_command(Directive::Increase, 2.0).await;

        let first = uplink.try_recv().unwrap();
        let second = uplink.try_recv().unwrap();
        assert_eq!(sent_message(&first).seq, 0);
        assert_eq!(sent_message(&second).seq, 1);

        // at most one in flight: only the newest command occupies the slot
        let pending = ctrl.pending.as_ref().unwrap();
        assert_eq!(pending.message.seq, 1);
        assert_eq!(pending.retransmissions, 0);
    }

    #[tokio::test]
    async fn retransmissions_reuse_the_exact_message() {
        let cfg = Config::default();
        let (mut ctrl, mut uplink, _in_tx, hub) = harness(steady_oracle(0.1), &cfg);
        let mut signals = hub.subscribe();

        let original = ctrl.send_control_command(Directive::Increase, 3.08).await;
        let _ = uplink.try_recv().unwrap();

        for _ in 0..3 {
            ctrl.on_ack_timeout().await;
        }

        for _ in 0..3 {
            let frame = uplink.try_recv().unwrap();
            assert_eq!(sent_message(&frame), &original);
        }
        assert!(uplink.try_recv().is_err());

        let retrans: Vec<_> = std::iter::from_fn(|| signals.try_recv().ok())
            .filter(|ev| ev.kind == SignalKind::Retransmission)
            .collect();
        assert_eq!(retrans.len(), 3);
        assert_eq!(ctrl.pending.as_ref().unwrap().retransmissions, 3);
    }

    #[tokio::test]
    async fn matching_ack_clears_pending_and_records_latency() {
        let cfg = Config::default();
        let (mut ctrl, mut uplink, _in_tx, hub) = harness(steady_oracle(0.1), &cfg);
        let mut signals = hub.subscribe();

        ctrl.send_control_command(Directive::Increase, 1.0).await;
        let _ = uplink.try_recv().unwrap();

        let ack = Frame::ack(DER_ADDR, CONTROLLER_ADDR, AckMessage::echoing(Some(0)));
        ctrl.handle_frame(ack).await;

        assert!(ctrl.pending.is_none());
        let ev = signals.try_recv().unwrap();
        assert_eq!(ev.kind, SignalKind::DeliveryLatency);
        assert!(ev.value >= 0.0);
    }

    #[tokio::test]
    async fn stale_ack_leaves_the_superseding_command_untouched() {
        let cfg = Config::default();
        let (mut ctrl, mut uplink, _in_tx, _hub) = harness(steady_oracle(0.1), &cfg);

        ctrl.send_control_command(Directive::Increase, 1.0).await;
        ctrl.send_control_command(Directive::Decrease, 2.0).await;
        let _ = uplink.try_recv().unwrap();
        let _ = uplink.try_recv().unwrap();
        let deadline_before = ctrl.pending.as_ref().unwrap().deadline;

        // ack for the superseded command arrives late
        let stale = Frame::ack(DER_ADDR, CONTROLLER_ADDR, AckMessage::echoing(Some(0)));
        ctrl.handle_frame(stale).await;

        let pending = ctrl.pending.as_ref().unwrap();
        assert_eq!(pending.message.seq, 1);
        assert_eq!(pending.deadline, deadline_before);

        // the matching ack still works afterwards
        let good = Frame::ack(DER_ADDR, CONTROLLER_ADDR, AckMessage::echoing(Some(1)));
        ctrl.handle_frame(good).await;
        assert!(ctrl.pending.is_none());
    }

    #[tokio::test]
    async fn junk_frames_never_disturb_the_pending_slot() {
        let cfg = Config::default();
        let (mut ctrl, mut uplink, _in_tx, _hub) = harness(steady_oracle(0.1), &cfg);

        ctrl.send_control_command(Directive::Increase, 1.0).await;
        let _ = uplink.try_recv().unwrap();

        let junk = Frame::junk(grid_protocol::ATTACKER_ADDR, CONTROLLER_ADDR, "flood");
        ctrl.handle_frame(junk).await;
        let no_seq_ack = Frame::ack(DER_ADDR, CONTROLLER_ADDR, AckMessage::echoing(None));
        ctrl.handle_frame(no_seq_ack).await;

        assert!(ctrl.pending.is_some());
    }

    #[tokio::test]
    async fn retry_bound_gives_up_with_a_failure_signal() {
        let cfg = Config {
            max_retries: Some(2),
            ..Config::default()
        };
        let (mut ctrl, mut uplink, _in_tx, hub) = harness(steady_oracle(0.1), &cfg);
        let mut signals = hub.subscribe();

        ctrl.send_control_command(Directive::Increase, 1.0).await;
        let _ = uplink.try_recv().unwrap();

        ctrl.on_ack_timeout().await; // retransmission 1
        ctrl.on_ack_timeout().await; // retransmission 2
        ctrl.on_ack_timeout().await; // bound hit: give up

        assert!(ctrl.pending.is_none());
        assert!(uplink.try_recv().is_ok());
        assert!(uplink.try_recv().is_ok());
        assert!(uplink.try_recv().is_err());

        let kinds: Vec<_> = std::iter::from_fn(|| signals.try_recv().ok())
            .map(|ev| ev.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                SignalKind::Retransmission,
                SignalKind::Retransmission,
                SignalKind::DeliveryFailed
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timer_driven_loop_retransmits_until_acked() {
        let cfg = Config::default();
        let (ctrl, mut uplink, in_tx, _hub) = harness(steady_oracle(0.1), &cfg);
        tokio::spawn(ctrl.run());

        // warm-up elapses, first cycle fires
        let first = uplink.recv().await.unwrap();
        let original = sent_message(&first).clone();
        assert_eq!(original.seq, 0);

        // no ack for 2 time units: an exact duplicate goes out
        let retrans = uplink.recv().await.unwrap();
        assert_eq!(sent_message(&retrans), &original);

        // ack it; the next frame on the wire is the next cycle's command
        in_tx
            .send(Frame::ack(DER_ADDR, CONTROLLER_ADDR, AckMessage::echoing(Some(0))))
            .await
            .unwrap();
        let next = uplink.recv().await.unwrap();
        assert_eq!(sent_message(&next).seq, 1);
    }
}
