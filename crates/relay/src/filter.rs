// Per-recipient authorization, evaluated for every envelope on every local
// connection before anything is written to its socket.

use crate::connection::ConnectionContext;
use crate::envelope::{Envelope, EventKind};
use crate::gateway::Identity;
use crate::membership::SubscriptionGrant;
use crate::room::RoomKey;

/// `false` means a silent drop: no frame, no close.
pub fn may_deliver(context: &ConnectionContext, envelope: &Envelope) -> bool {
    let user_id = match context.identity {
        Identity::User { id } => id,
        Identity::InternalPublisher | Identity::Unauthenticated => return false,
    };

    match (context.room, envelope.kind()) {
        (RoomKey::Chat(_), EventKind::ChatMessage) => match context.grant {
            SubscriptionGrant::Member | SubscriptionGrant::DmSelf => true,
            // Only the recipient listening on its own room hears a new DM.
            SubscriptionGrant::DmInitiator { .. } => false,
            SubscriptionGrant::Publisher | SubscriptionGrant::Notifications => false,
        },
        (RoomKey::Notifications, EventKind::Notification) => {
            let receivers = envelope.receiver_ids();
            if receivers.is_empty() {
                // Id-only deletions without a receiver list reveal nothing.
                return envelope.payload().is_none();
            }
            receivers.contains(&user_id)
        }
        (RoomKey::Chat(_), EventKind::Notification)
        | (RoomKey::Notifications, EventKind::ChatMessage) => false,
    }
}
