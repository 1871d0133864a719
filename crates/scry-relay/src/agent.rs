use std::sync::Arc;

use scry_core::ids::EndpointId;
use scry_core::protocol::{Envelope, MessageType};
use scry_core::replay::{ReplayHandler, ReplayRequest};
use scry_core::snapshot::StoreInspector;

use crate::coordinator::CoordinatorHandle;
use crate::relay::Relay;

/// Wires an inspected store into the relay: answers the inspector's
/// bootstrap and refresh requests with full snapshots, routes replays
/// through the store's executor, and feeds acknowledgments into the
/// broadcast coordinator.
pub struct StoreAgent {
    relay: Arc<Relay>,
    store: Arc<dyn StoreInspector>,
    replays: Arc<dyn ReplayHandler>,
    coordinator: CoordinatorHandle,
    inspector: EndpointId,
}

impl StoreAgent {
    /// Subscribe the agent's message flows on `relay`. Outbound snapshots
    /// and replay outcomes go to the `inspector` endpoint. Must run inside
    /// a tokio runtime: replay execution is spawned off the dispatch path.
    pub fn attach(
        relay: Arc<Relay>,
        store: Arc<dyn StoreInspector>,
        replays: Arc<dyn ReplayHandler>,
        coordinator: CoordinatorHandle,
        inspector: EndpointId,
    ) -> Arc<Self> {
        let agent = Arc::new(Self {
            relay,
            store,
            replays,
            coordinator,
            inspector,
        });

        let weak = Arc::downgrade(&agent);
        agent.relay.listen(MessageType::InspectorInit, move |_| {
            if let Some(agent) = weak.upgrade() {
                agent.send_snapshot(MessageType::PanelCreate);
            }
        });

        let weak = Arc::downgrade(&agent);
        agent.relay.listen(MessageType::StateRequest, move |_| {
            if let Some(agent) = weak.upgrade() {
                agent.send_snapshot(MessageType::StateUpdate);
            }
        });

        let weak = Arc::downgrade(&agent);
        agent.relay.listen(MessageType::ReplayRequest, move |inbound| {
            let Some(agent) = weak.upgrade() else { return };
            match inbound.payload_json::<ReplayRequest>() {
                Some(request) => agent.run_replay(request),
                None => tracing::trace!("replay request without a decodable payload, ignoring"),
            }
        });

        let weak = Arc::downgrade(&agent);
        agent.relay.listen(MessageType::BroadcastAck, move |_| {
            if let Some(agent) = weak.upgrade() {
                agent.coordinator.acknowledge();
            }
        });

        agent
    }

    /// Entry point for the store's action hook: stage the latest state for
    /// broadcast and nudge the inspector.
    pub fn action_fired(&self) {
        self.coordinator.ingest(self.store.snapshot());
        self.relay.send(&Envelope::new(
            self.inspector.clone(),
            MessageType::ActionFired,
        ));
    }

    fn send_snapshot(&self, message: MessageType) {
        match serde_json::to_string(&self.store.snapshot()) {
            Ok(payload) => self.relay.send(&Envelope::with_payload(
                self.inspector.clone(),
                message,
                payload,
            )),
            Err(error) => tracing::warn!(%error, "failed to serialize store snapshot"),
        }
    }

    fn run_replay(&self, request: ReplayRequest) {
        let relay = Arc::clone(&self.relay);
        let replays = Arc::clone(&self.replays);
        let inspector = self.inspector.clone();
        tokio::spawn(async move {
            let outcome = replays.replay(request).await;
            match serde_json::to_string(&outcome) {
                Ok(payload) => relay.send(&Envelope::with_payload(
                    inspector,
                    MessageType::ReplayResponse,
                    payload,
                )),
                Err(error) => tracing::warn!(%error, "failed to serialize replay outcome"),
            }
        });
    }
}
