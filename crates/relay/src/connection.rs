use uuid::Uuid;

use crate::gateway::Identity;
use crate::membership::SubscriptionGrant;
use crate::room::RoomKey;

/// Everything known about one live socket once it has been admitted.
/// Lives exactly as long as the connection task; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionContext {
    pub connection_id: Uuid,
    pub room: RoomKey,
    pub identity: Identity,
    pub grant: SubscriptionGrant,
}

impl ConnectionContext {
    pub fn new(room: RoomKey, identity: Identity, grant: SubscriptionGrant) -> Self {
        Self { connection_id: Uuid::new_v4(), room, identity, grant }
    }
}
