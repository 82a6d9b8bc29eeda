//! Message router
//!
//! Fans a PUBLISH out to every client whose subscriptions match the topic.
//! Best-effort: a client that has disconnected (no entry in the client
//! table) simply doesn't receive the message — there's no offline queue.

use std::sync::Arc;

use dashmap::DashMap;

use crate::broker::writer::SessionWriter;
use crate::protocol::{Packet, Publish, QoS};
use crate::topic::SubscriptionRegistry;

/// Routes published messages from the registry's matching clients to their
/// writers. Delivery order per publisher is FIFO because the router only
/// ever drives writes through a single connection task per client.
pub struct Router {
    registry: Arc<SubscriptionRegistry>,
    clients: Arc<DashMap<Arc<str>, Arc<SessionWriter>>>,
}

impl Router {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        clients: Arc<DashMap<Arc<str>, Arc<SessionWriter>>>,
    ) -> Self {
        Self { registry, clients }
    }

    /// Deliver `publish` to every subscriber of `topic`. This core serves
    /// only QoS 0, so the outbound packet always carries `qos=AtMostOnce`,
    /// `dup=false`, and no `packet_id`, regardless of what the publisher sent.
    pub fn publish(&self, topic: &str, publish: &Publish) {
        let outbound = Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: publish.retain,
            topic: publish.topic.clone(),
            packet_id: None,
            payload: publish.payload.clone(),
        });
        for client_id in self.registry.matching_clients(topic) {
            if let Some(writer) = self.clients.get(&client_id) {
                let _ = writer.send_packet(&outbound);
            }
        }
    }
}
