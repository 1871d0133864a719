use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use scry_core::ids::EndpointId;
use scry_core::protocol::{Envelope, InboundMessage, MessageType};

/// How an envelope leaves this context for a given endpoint.
pub type Transport = Arc<dyn Fn(&Envelope) + Send + Sync>;

type Handler = Arc<dyn Fn(&InboundMessage) + Send + Sync>;

/// Context-agnostic transport multiplexer: one instance per execution
/// context. Routes outbound envelopes to named endpoint transports and
/// dispatches inbound data to type-subscribed handlers.
///
/// The relay holds no snapshot state; its only mutations are the
/// connection table and the listener lists.
#[derive(Default)]
pub struct Relay {
    connections: DashMap<EndpointId, Transport>,
    listeners: RwLock<HashMap<MessageType, Vec<Handler>>>,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace how to reach `endpoint`. Side effect only.
    pub fn add_connection(
        &self,
        endpoint: EndpointId,
        transport: impl Fn(&Envelope) + Send + Sync + 'static,
    ) {
        self.connections.insert(endpoint, Arc::new(transport));
    }

    /// Register a transport that forwards envelopes into a channel. Handy
    /// for in-process contexts and tests.
    pub fn connect_channel(
        &self,
        endpoint: EndpointId,
        tx: tokio::sync::mpsc::UnboundedSender<Envelope>,
    ) {
        self.add_connection(endpoint, move |envelope| {
            let _ = tx.send(envelope.clone());
        });
    }

    pub fn remove_connection(&self, endpoint: &EndpointId) {
        self.connections.remove(endpoint);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Route an envelope to its destination's transport. An unregistered
    /// destination is a silent no-op: the sender cannot know whether the
    /// receiver exists yet.
    pub fn send(&self, envelope: &Envelope) {
        let transport = self
            .connections
            .get(&envelope.to)
            .map(|entry| Arc::clone(entry.value()));
        match transport {
            Some(transport) => transport(envelope),
            None => tracing::trace!(
                to = %envelope.to,
                message = %envelope.message,
                "no connection for destination, dropping"
            ),
        }
    }

    /// Subscribe `handler` to one message type. Subscriptions are
    /// cumulative and invoked in registration order.
    pub fn listen(
        &self,
        message: MessageType,
        handler: impl Fn(&InboundMessage) + Send + Sync + 'static,
    ) {
        self.listeners
            .write()
            .entry(message)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Dispatch raw inbound data to every handler registered for its
    /// message type. Data without a known `message` tag is ignored; the
    /// relay must not take down its host on garbage from an untrusted
    /// channel.
    pub fn broadcast(&self, data: &serde_json::Value) {
        match InboundMessage::from_value(data) {
            Some(inbound) => self.dispatch(&inbound),
            None => tracing::trace!("inbound data without a known message tag, ignoring"),
        }
    }

    /// Typed dispatch path for envelopes already decoded in this process.
    pub fn deliver(&self, envelope: &Envelope) {
        self.dispatch(&InboundMessage::from(envelope));
    }

    fn dispatch(&self, inbound: &InboundMessage) {
        // Clone the handler list out of the lock so handlers may subscribe
        // or send without deadlocking.
        let handlers: Vec<Handler> = self
            .listeners
            .read()
            .get(&inbound.message)
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler(inbound);
        }
    }

    /// Hop rule for an intermediate context: re-address every inbound
    /// message of `message` type to `to` and send it on.
    pub fn forward(self: &Arc<Self>, message: MessageType, to: EndpointId) {
        let relay = Arc::downgrade(self);
        self.listen(message, move |inbound| {
            if let Some(relay) = relay.upgrade() {
                let envelope = Envelope {
                    to: to.clone(),
                    message: inbound.message,
                    payload: inbound.payload.clone(),
                };
                relay.send(&envelope);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn collector() -> (Arc<Mutex<Vec<Envelope>>>, impl Fn(&Envelope) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |envelope: &Envelope| {
            sink.lock().push(envelope.clone())
        })
    }

    #[test]
    fn send_routes_to_registered_transport() {
        let relay = Relay::new();
        let (seen, transport) = collector();
        relay.add_connection(EndpointId::new("panel"), transport);

        relay.send(&Envelope::with_payload(
            EndpointId::new("panel"),
            MessageType::StateUpdate,
            "{}",
        ));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].message, MessageType::StateUpdate);
    }

    #[test]
    fn send_to_unregistered_endpoint_is_silent() {
        let relay = Relay::new();
        let (seen, transport) = collector();
        relay.add_connection(EndpointId::new("panel"), transport);

        relay.send(&Envelope::new(EndpointId::new("ghost"), MessageType::ActionFired));

        assert!(seen.lock().is_empty());
    }

    #[test]
    fn later_registration_replaces_transport() {
        let relay = Relay::new();
        let (first, transport_a) = collector();
        let (second, transport_b) = collector();
        relay.add_connection(EndpointId::new("panel"), transport_a);
        relay.add_connection(EndpointId::new("panel"), transport_b);

        relay.send(&Envelope::new(EndpointId::new("panel"), MessageType::ActionFired));

        assert!(first.lock().is_empty());
        assert_eq!(second.lock().len(), 1);
    }

    #[test]
    fn removed_connection_stops_delivery() {
        let relay = Relay::new();
        let (seen, transport) = collector();
        let panel = EndpointId::new("panel");
        relay.add_connection(panel.clone(), transport);
        relay.remove_connection(&panel);

        relay.send(&Envelope::new(panel, MessageType::ActionFired));

        assert!(seen.lock().is_empty());
        assert_eq!(relay.connection_count(), 0);
    }

    #[test]
    fn handlers_run_in_subscription_order() {
        let relay = Relay::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            relay.listen(MessageType::StateUpdate, move |_| order.lock().push(tag));
        }

        relay.broadcast(&serde_json::json!({"message": "state.update"}));

        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn broadcast_without_message_tag_is_ignored() {
        let relay = Relay::new();
        let called = Arc::new(Mutex::new(0u32));
        let count = Arc::clone(&called);
        relay.listen(MessageType::StateUpdate, move |_| *count.lock() += 1);

        relay.broadcast(&serde_json::json!({}));
        relay.broadcast(&serde_json::json!({"message": 17}));
        relay.broadcast(&serde_json::json!({"message": "unknown.tag"}));

        assert_eq!(*called.lock(), 0);
    }

    #[test]
    fn broadcast_only_reaches_matching_type() {
        let relay = Relay::new();
        let updates = Arc::new(Mutex::new(0u32));
        let acks = Arc::new(Mutex::new(0u32));
        let u = Arc::clone(&updates);
        relay.listen(MessageType::StateUpdate, move |_| *u.lock() += 1);
        let a = Arc::clone(&acks);
        relay.listen(MessageType::BroadcastAck, move |_| *a.lock() += 1);

        relay.broadcast(&serde_json::json!({"message": "broadcast.ack"}));

        assert_eq!(*updates.lock(), 0);
        assert_eq!(*acks.lock(), 1);
    }

    #[test]
    fn handlers_see_payload() {
        let relay = Relay::new();
        let payloads = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&payloads);
        relay.listen(MessageType::BroadcastNew, move |inbound| {
            sink.lock().push(inbound.payload.clone());
        });

        relay.broadcast(&serde_json::json!({
            "message": "broadcast.new",
            "payload": r#"{"seq":4}"#,
        }));

        assert_eq!(payloads.lock()[0].as_deref(), Some(r#"{"seq":4}"#));
    }

    #[test]
    fn deliver_dispatches_decoded_envelope() {
        let relay = Relay::new();
        let called = Arc::new(Mutex::new(0u32));
        let count = Arc::clone(&called);
        relay.listen(MessageType::BroadcastAck, move |_| *count.lock() += 1);

        relay.deliver(&Envelope::new(EndpointId::new("store"), MessageType::BroadcastAck));

        assert_eq!(*called.lock(), 1);
    }

    #[test]
    fn forward_readdresses_inbound_messages() {
        let relay = Arc::new(Relay::new());
        let (seen, transport) = collector();
        relay.add_connection(EndpointId::new("panel"), transport);
        relay.forward(MessageType::ActionFired, EndpointId::new("panel"));

        relay.broadcast(&serde_json::json!({
            "message": "store.action",
            "payload": "{}",
        }));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].to, EndpointId::new("panel"));
        assert_eq!(seen[0].message, MessageType::ActionFired);
        assert_eq!(seen[0].payload.as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn channel_transport_delivers() {
        let relay = Relay::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        relay.connect_channel(EndpointId::new("panel"), tx);

        relay.send(&Envelope::new(EndpointId::new("panel"), MessageType::InspectorInit));

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.message, MessageType::InspectorInit);
    }
}
