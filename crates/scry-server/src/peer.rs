use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use scry_core::ids::{ConnectionId, EndpointId};
use scry_core::protocol::Envelope;
use scry_relay::Relay;
use scry_telemetry::MetricsRecorder;
use tokio::sync::mpsc;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const PEER_TIMEOUT: Duration = Duration::from_secs(90);

/// A remote context connected to the hub.
pub struct Peer {
    pub id: ConnectionId,
    pub endpoint: EndpointId,
    pub tx: mpsc::Sender<String>,
    pub connected: AtomicBool,
    pub last_pong: AtomicU64,
}

impl Peer {
    fn new(id: ConnectionId, endpoint: EndpointId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            endpoint,
            tx,
            connected: AtomicBool::new(true),
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < PEER_TIMEOUT.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Registry of connected peers, tracking which connection currently owns
/// each endpoint name. A later connection for the same endpoint takes the
/// name over; the earlier one loses ownership but stays connected until it
/// drops.
pub struct PeerRegistry {
    peers: DashMap<ConnectionId, Arc<Peer>>,
    owners: DashMap<EndpointId, ConnectionId>,
    max_send_queue: usize,
}

impl PeerRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            peers: DashMap::new(),
            owners: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a new peer for an endpoint name and return it with the
    /// receiving half of its outbound queue.
    pub fn register(&self, endpoint: EndpointId) -> (Arc<Peer>, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        let peer = Arc::new(Peer::new(id.clone(), endpoint.clone(), tx));
        self.peers.insert(id.clone(), Arc::clone(&peer));
        self.owners.insert(endpoint, id);
        (peer, rx)
    }

    /// Remove a peer. Returns true when it still owned its endpoint name,
    /// in which case the caller should also drop the relay connection.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let Some((_, peer)) = self.peers.remove(id) else {
            return false;
        };
        peer.connected.store(false, Ordering::Relaxed);
        let owned = self
            .owners
            .get(&peer.endpoint)
            .is_some_and(|owner| owner.value() == id);
        if owned {
            self.owners.remove(&peer.endpoint);
        }
        owned
    }

    pub fn count(&self) -> usize {
        self.peers.len()
    }

    /// Remove peers that stopped answering pings, dropping the relay
    /// connection of any that still owned their endpoint name.
    pub fn cleanup_dead_peers(&self, relay: &Relay) -> usize {
        let dead: Vec<Arc<Peer>> = self
            .peers
            .iter()
            .filter(|entry| !entry.value().is_alive())
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut removed = 0;
        for peer in dead {
            if self.unregister(&peer.id) {
                relay.remove_connection(&peer.endpoint);
            }
            removed += 1;
            tracing::info!(peer = %peer.id, endpoint = %peer.endpoint, "cleaned up dead peer");
        }
        removed
    }
}

/// Build the relay transport for a peer's outbound leg: serialize the
/// envelope and queue it, dropping on overflow so a stalled peer cannot
/// stall the hub.
pub fn outbound_transport(
    endpoint: EndpointId,
    tx: mpsc::Sender<String>,
    metrics: Arc<MetricsRecorder>,
) -> impl Fn(&Envelope) + Send + Sync {
    move |envelope: &Envelope| match envelope.to_wire() {
        Ok(frame) => match tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics.increment_counter("envelopes_dropped", &[("endpoint", endpoint.as_str())], 1);
                tracing::warn!(
                    endpoint = %endpoint,
                    message = %envelope.message,
                    "send queue full, dropping envelope"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        },
        Err(error) => tracing::warn!(%error, "failed to serialize envelope for the wire"),
    }
}

/// Handle a peer's WebSocket: split into reader/writer, route inbound
/// envelopes through the hub relay, keep liveness with ping/pong.
pub async fn handle_peer_connection(
    socket: WebSocket,
    peer: Arc<Peer>,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<PeerRegistry>,
    relay: Arc<Relay>,
    metrics: Arc<MetricsRecorder>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: drain the outbound queue, ping periodically.
    let writer_peer = Arc::clone(&peer);
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    match frame {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(peer = %writer_peer.id, "sent ping");
                }
            }
        }

        writer_peer.connected.store(false, Ordering::Relaxed);
    });

    // Reader task: route well-formed envelopes, ignore everything else.
    let reader_peer = Arc::clone(&peer);
    let reader_relay = Arc::clone(&relay);
    let reader_metrics = Arc::clone(&metrics);
    let reader = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_rx.next().await {
            match message {
                WsMessage::Text(text) => match Envelope::from_wire(text.as_str()) {
                    Some(envelope) => {
                        reader_metrics.increment_counter(
                            "envelopes_routed",
                            &[("message", envelope.message.as_wire())],
                            1,
                        );
                        reader_relay.send(&envelope);
                    }
                    None => {
                        reader_metrics.increment_counter("frames_ignored", &[], 1);
                        tracing::trace!(peer = %reader_peer.id, "unroutable frame ignored");
                    }
                },
                WsMessage::Pong(_) => reader_peer.record_pong(),
                WsMessage::Close(_) => break,
                WsMessage::Ping(_) => {} // axum answers pongs automatically
                _ => {}
            }
        }
    });

    // Whichever half finishes first ends the connection.
    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    if registry.unregister(&peer.id) {
        relay.remove_connection(&peer.endpoint);
    }
    tracing::info!(peer = %peer.id, endpoint = %peer.endpoint, "peer disconnected");
}

/// Start a background task that periodically sweeps dead peers.
pub fn start_cleanup_task(
    registry: Arc<PeerRegistry>,
    relay: Arc<Relay>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_peers(&relay);
            if removed > 0 {
                tracing::info!(removed, "dead peer sweep");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scry_core::protocol::MessageType;

    #[test]
    fn register_and_unregister() {
        let registry = PeerRegistry::new(32);
        assert_eq!(registry.count(), 0);

        let (a, _rx_a) = registry.register(EndpointId::new("store"));
        let (b, _rx_b) = registry.register(EndpointId::new("panel"));
        assert_eq!(registry.count(), 2);

        assert!(registry.unregister(&a.id));
        assert!(!a.is_connected());
        assert_eq!(registry.count(), 1);

        assert!(registry.unregister(&b.id));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn unregister_unknown_peer_is_false() {
        let registry = PeerRegistry::new(32);
        assert!(!registry.unregister(&ConnectionId::new()));
    }

    #[test]
    fn reconnect_takes_over_endpoint_ownership() {
        let registry = PeerRegistry::new(32);
        let (old, _rx_old) = registry.register(EndpointId::new("panel"));
        let (new, _rx_new) = registry.register(EndpointId::new("panel"));

        // The stale connection dropping must not revoke the name from the
        // replacement.
        assert!(!registry.unregister(&old.id));
        assert!(registry.unregister(&new.id));
    }

    #[test]
    fn pong_tracking_keeps_peer_alive() {
        let registry = PeerRegistry::new(32);
        let (peer, _rx) = registry.register(EndpointId::new("store"));
        assert!(peer.is_alive());

        peer.record_pong();
        assert!(peer.is_alive());

        peer.last_pong.store(0, Ordering::Relaxed);
        assert!(!peer.is_alive());
    }

    #[test]
    fn cleanup_removes_expired_peers_and_relay_connections() {
        let relay = Relay::new();
        let registry = PeerRegistry::new(32);
        let (dead, _rx_dead) = registry.register(EndpointId::new("panel"));
        let (_live, _rx_live) = registry.register(EndpointId::new("store"));

        let (tx, _rx) = mpsc::channel(32);
        relay.add_connection(
            EndpointId::new("panel"),
            outbound_transport(
                EndpointId::new("panel"),
                tx,
                Arc::new(MetricsRecorder::new()),
            ),
        );
        assert_eq!(relay.connection_count(), 1);

        dead.last_pong.store(0, Ordering::Relaxed);
        let removed = registry.cleanup_dead_peers(&relay);
        assert_eq!(removed, 1);
        assert_eq!(registry.count(), 1);
        assert_eq!(relay.connection_count(), 0);
    }

    #[tokio::test]
    async fn outbound_transport_queues_frames() {
        let (tx, mut rx) = mpsc::channel(4);
        let transport = outbound_transport(
            EndpointId::new("panel"),
            tx,
            Arc::new(MetricsRecorder::new()),
        );

        transport(&Envelope::with_payload(
            EndpointId::new("panel"),
            MessageType::StateUpdate,
            "{}",
        ));

        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("\"message\":\"state.update\""));
    }

    #[tokio::test]
    async fn outbound_transport_drops_on_overflow() {
        let (tx, _rx) = mpsc::channel(2);
        let metrics = Arc::new(MetricsRecorder::new());
        let transport =
            outbound_transport(EndpointId::new("panel"), tx, Arc::clone(&metrics));

        for _ in 0..3 {
            transport(&Envelope::new(EndpointId::new("panel"), MessageType::ActionFired));
        }

        assert_eq!(
            metrics.counter_value("envelopes_dropped", &[("endpoint", "panel")]),
            1
        );
    }

    #[tokio::test]
    async fn outbound_transport_ignores_closed_queue() {
        let (tx, rx) = mpsc::channel(2);
        drop(rx);
        let metrics = Arc::new(MetricsRecorder::new());
        let transport =
            outbound_transport(EndpointId::new("panel"), tx, Arc::clone(&metrics));

        transport(&Envelope::new(EndpointId::new("panel"), MessageType::ActionFired));

        assert_eq!(metrics.counter_value("envelopes_dropped", &[("endpoint", "panel")]), 0);
    }
}
