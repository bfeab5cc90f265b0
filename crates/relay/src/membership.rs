// Subscribe-time authorization. Membership is read once here; a later change
// becomes visible to a connection only when it reconnects.

use socialnet_common::protocol::ws::ErrorType;
use tracing::warn;
use uuid::Uuid;

use crate::error::RelayError;
use crate::gateway::Identity;
use crate::room::RoomKey;
use crate::store::SocialStore;

/// Why a connection was admitted to its room. The authorization filter keys
/// delivery decisions off this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionGrant {
    /// Internal publisher. May send to any room, never receives.
    Publisher,
    /// Authenticated user on the notifications room.
    Notifications,
    /// A user listening on `chat_{own id}` for direct chats opened to them.
    DmSelf,
    /// Owner or member of the chat.
    Member,
    /// First message of a direct chat that does not exist yet.
    DmInitiator { recipient: Uuid },
}

impl SubscriptionGrant {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Publisher => "publisher",
            Self::Notifications => "notifications",
            Self::DmSelf => "dm_self",
            Self::Member => "member",
            Self::DmInitiator { .. } => "dm_initiator",
        }
    }

    /// The user a not-yet-created direct chat is being opened to.
    pub fn dm_recipient(&self) -> Option<Uuid> {
        match self {
            Self::DmInitiator { recipient } => Some(*recipient),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MembershipDecision {
    Allow(SubscriptionGrant),
    Deny(RelayError),
}

pub async fn validate(
    store: &SocialStore,
    identity: &Identity,
    room: &RoomKey,
) -> anyhow::Result<MembershipDecision> {
    let user_id = match identity {
        Identity::InternalPublisher => {
            return Ok(MembershipDecision::Allow(SubscriptionGrant::Publisher))
        }
        Identity::User { id } => *id,
        Identity::Unauthenticated => {
            return Ok(MembershipDecision::Deny(RelayError::from_code(ErrorType::Auth)))
        }
    };

    let room_id = match room {
        RoomKey::Notifications => {
            return Ok(MembershipDecision::Allow(SubscriptionGrant::Notifications))
        }
        RoomKey::Chat(id) => *id,
    };

    if room_id == user_id {
        return Ok(MembershipDecision::Allow(SubscriptionGrant::DmSelf));
    }

    if let Some(chat) = store.chat_membership(room_id).await? {
        if chat.includes(user_id) {
            return Ok(MembershipDecision::Allow(SubscriptionGrant::Member));
        }
        warn!(user_id = %user_id, chat_id = %room_id, "rejected chat subscription from non-member");
        return Ok(MembershipDecision::Deny(RelayError::from_code(ErrorType::NotAMember)));
    }

    if store.user_exists(room_id).await? {
        return Ok(MembershipDecision::Allow(SubscriptionGrant::DmInitiator { recipient: room_id }));
    }

    warn!(user_id = %user_id, room_id = %room_id, "rejected chat subscription to unknown id");
    Ok(MembershipDecision::Deny(RelayError::from_code(ErrorType::InvalidId)))
}
