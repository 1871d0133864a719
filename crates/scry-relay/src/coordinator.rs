//! Broadcast coordination: decides when serialized state leaves the
//! producing context.
//!
//! A single pending slot coalesces bursts of snapshots into the latest one;
//! an acknowledgment flag bounds in-flight work to one broadcast; and
//! serialization is deferred to a quiet moment, no later than `max_delay`
//! after it was scheduled, so a large state never janks foreground work.
//!
//! The transition table lives in [`BroadcastState`], which is pure and
//! timer-free; [`spawn_coordinator`] wraps it in the async driver that owns
//! scheduling and the wire.

use std::sync::Arc;
use std::time::Duration;

use scry_core::ids::EndpointId;
use scry_core::protocol::{Envelope, MessageType};
use scry_core::snapshot::{StateBroadcast, StoreSnapshot};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use crate::relay::Relay;

/// Tuning for the broadcast coordinator.
#[derive(Clone, Copy, Debug)]
pub struct BroadcastConfig {
    /// Upper bound on how long a scheduled transmission may wait for an
    /// idle moment.
    pub max_delay: Duration,
    /// How long the event stream must stay quiet before the context counts
    /// as idle.
    pub idle_window: Duration,
    /// Serialized-size threshold for the diagnostic warning, in bytes.
    pub warn_bytes: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            max_delay: Duration::from_secs(120),
            idle_window: Duration::from_millis(25),
            warn_bytes: 10_000_000,
        }
    }
}

/// The coordinator's state machine: `Idle` (no ack outstanding) or
/// `Awaiting` (one broadcast in flight), plus the single pending slot.
///
/// Invariant: a pending broadcast implies an outstanding ack; at most one
/// broadcast is ever in flight.
pub struct BroadcastState {
    seq: u64,
    pending: Option<StateBroadcast>,
    awaiting_ack: bool,
    warn_bytes: usize,
}

impl BroadcastState {
    pub fn new(warn_bytes: usize) -> Self {
        Self {
            seq: 0,
            pending: None,
            awaiting_ack: false,
            warn_bytes,
        }
    }

    /// A snapshot arrived. Overwrites whatever was pending; only the
    /// latest state matters to an inspector. Returns true when the caller
    /// should schedule a transmission.
    pub fn on_snapshot(&mut self, snapshot: StoreSnapshot) -> bool {
        self.seq += 1;
        self.pending = Some(StateBroadcast::new(self.seq, snapshot));
        if self.awaiting_ack {
            false
        } else {
            self.awaiting_ack = true;
            true
        }
    }

    /// The scheduled transmission fired. Hands the pending broadcast to the
    /// caller for serialization and clears the slot; the ack stays
    /// outstanding.
    pub fn on_fire(&mut self) -> Option<StateBroadcast> {
        self.pending.take()
    }

    /// The remote acknowledged the broadcast in flight. Returns true when a
    /// coalesced snapshot accumulated meanwhile and the caller should
    /// schedule again. An ack while idle is a no-op.
    pub fn on_ack(&mut self) -> bool {
        if !self.awaiting_ack {
            return false;
        }
        if self.pending.is_some() {
            true
        } else {
            self.awaiting_ack = false;
            false
        }
    }

    /// Feed the serialized length of a transmission into the watermark.
    /// Returns the raised watermark when the observation breached it.
    pub fn record_size(&mut self, bytes: usize) -> Option<usize> {
        if bytes > self.warn_bytes {
            self.warn_bytes = bytes * 2;
            Some(self.warn_bytes)
        } else {
            None
        }
    }

    pub fn is_awaiting_ack(&self) -> bool {
        self.awaiting_ack
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn watermark(&self) -> usize {
        self.warn_bytes
    }
}

enum CoordinatorEvent {
    Snapshot(StoreSnapshot),
    Ack,
}

/// Ingestion side of a running coordinator. Cheap to clone; handing one to
/// the snapshot producer and another to the ack listener is the expected
/// wiring.
#[derive(Clone)]
pub struct CoordinatorHandle {
    events: mpsc::UnboundedSender<CoordinatorEvent>,
}

impl CoordinatorHandle {
    /// Stage a snapshot for broadcast. Never blocks; bursts coalesce into
    /// the latest snapshot.
    pub fn ingest(&self, snapshot: StoreSnapshot) {
        let _ = self.events.send(CoordinatorEvent::Snapshot(snapshot));
    }

    /// The remote consumed the broadcast in flight.
    pub fn acknowledge(&self) {
        let _ = self.events.send(CoordinatorEvent::Ack);
    }
}

/// Start a coordinator that emits `broadcast.new` envelopes to `to` through
/// `relay`. The driver task ends when every handle is dropped.
pub fn spawn_coordinator(
    relay: Arc<Relay>,
    to: EndpointId,
    config: BroadcastConfig,
) -> (CoordinatorHandle, tokio::task::JoinHandle<()>) {
    let (events, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(rx, relay, to, config));
    (CoordinatorHandle { events }, task)
}

async fn run(
    mut events: mpsc::UnboundedReceiver<CoordinatorEvent>,
    relay: Arc<Relay>,
    to: EndpointId,
    config: BroadcastConfig,
) {
    let mut state = BroadcastState::new(config.warn_bytes);
    // Armed while a transmission is scheduled: fire after `idle_window` of
    // quiet, or at the deadline, whichever comes first.
    let mut deadline: Option<Instant> = None;

    loop {
        let fire = match deadline {
            Some(at) => {
                tokio::select! {
                    event = events.recv() => match event {
                        None => break,
                        Some(event) => {
                            // Already armed; the earlier deadline stands.
                            apply(&mut state, event);
                            false
                        }
                    },
                    _ = time::sleep(config.idle_window) => true,
                    _ = time::sleep_until(at) => true,
                }
            }
            None => match events.recv().await {
                None => break,
                Some(event) => {
                    if apply(&mut state, event) {
                        deadline = Some(Instant::now() + config.max_delay);
                    }
                    false
                }
            },
        };

        if fire {
            transmit(&mut state, &relay, &to);
            deadline = None;
        }
    }
}

fn apply(state: &mut BroadcastState, event: CoordinatorEvent) -> bool {
    match event {
        CoordinatorEvent::Snapshot(snapshot) => state.on_snapshot(snapshot),
        CoordinatorEvent::Ack => state.on_ack(),
    }
}

fn transmit(state: &mut BroadcastState, relay: &Relay, to: &EndpointId) {
    let Some(broadcast) = state.on_fire() else {
        return;
    };
    let seq = broadcast.seq;
    match serde_json::to_string(&broadcast) {
        Ok(payload) => {
            let bytes = payload.len();
            relay.send(&Envelope::with_payload(
                to.clone(),
                MessageType::BroadcastNew,
                payload,
            ));
            match state.record_size(bytes) {
                Some(watermark) => tracing::warn!(
                    bytes,
                    watermark,
                    seq,
                    "serialized state is large and may degrade the host"
                ),
                None => tracing::debug!(bytes, seq, "state broadcast sent"),
            }
        }
        Err(error) => tracing::warn!(%error, seq, "failed to serialize state broadcast"),
    }
}
