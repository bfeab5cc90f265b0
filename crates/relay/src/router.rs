use socialnet_common::protocol::ws::OutboundFrame;
use tracing::debug;

use crate::connection::ConnectionContext;
use crate::envelope::Envelope;
use crate::filter;
use crate::metrics;
use crate::registry::{RoomRegistry, RoomSubscription};
use crate::room::RoomKey;

/// Fans envelopes out through the registry and decides, per receiving
/// connection, whether the envelope reaches the socket.
#[derive(Clone, Default)]
pub struct BroadcastRouter {
    registry: RoomRegistry,
}

impl BroadcastRouter {
    pub fn new(registry: RoomRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub async fn join(&self, context: &ConnectionContext) -> RoomSubscription {
        self.registry.subscribe(context.room, context.connection_id).await
    }

    pub async fn leave(&self, context: &ConnectionContext) {
        self.registry.unsubscribe(context.room, context.connection_id).await;
    }

    /// Never blocks on the number of recipients; the publishing connection
    /// only pays for one channel send.
    pub async fn publish(&self, room: RoomKey, envelope: Envelope) -> usize {
        let status = envelope.status();
        let target_id = envelope.target_id();
        let subscribers = self.registry.publish(room, envelope).await;
        metrics::record_published();
        debug!(room = %room, status = status.as_str(), target_id = %target_id, subscribers, "published envelope");
        subscribers
    }

    /// Runs on the receiving connection's task. Returns the frame to write,
    /// or `None` when the filter drops it.
    pub fn on_receive(
        &self,
        context: &ConnectionContext,
        envelope: &Envelope,
    ) -> Option<OutboundFrame> {
        let deliver = filter::may_deliver(context, envelope);
        metrics::record_delivery(deliver);
        if !deliver {
            debug!(
                connection_id = %context.connection_id,
                room = %context.room,
                target_id = %envelope.target_id(),
                "filtered envelope"
            );
            return None;
        }
        Some(envelope.client_frame())
    }
}
