// Chat membership snapshots and the single validated path that mutates them.

use std::collections::BTreeSet;

use uuid::Uuid;

/// Largest member set a group chat may hold. The owner is not counted.
pub const MAX_GROUP_MEMBERS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatType {
    Dm,
    Group,
}

impl ChatType {
    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "DM" => Some(Self::Dm),
            "GROUP" => Some(Self::Group),
            _ => None,
        }
    }

    pub const fn as_db_value(self) -> &'static str {
        match self {
            Self::Dm => "DM",
            Self::Group => "GROUP",
        }
    }
}

/// Owner and member set of a chat, read when a connection subscribes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMembership {
    pub chat_id: Uuid,
    pub ctype: ChatType,
    pub owner_id: Uuid,
    pub member_ids: BTreeSet<Uuid>,
}

impl ChatMembership {
    pub fn includes(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id || self.member_ids.contains(&user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MembershipChangeError {
    #[error("chat {0} does not exist")]
    ChatNotFound(Uuid),
    #[error("user {0} does not exist")]
    UnknownUser(Uuid),
    #[error("Owner cannot be in users")]
    OwnerInMembers,
    #[error("You can't assign more than 1 user")]
    DmMemberLimit,
    #[error("A group chat cannot have more than {max} users")]
    GroupMemberLimit { max: usize },
}

/// Computes the membership that results from adding then removing users.
///
/// Removing a user that is not a member is a no-op. The result is only
/// returned when every invariant holds, so callers can persist it as is.
pub fn apply_membership_change(
    chat: &ChatMembership,
    adds: &[Uuid],
    removes: &[Uuid],
) -> Result<ChatMembership, MembershipChangeError> {
    let mut member_ids = chat.member_ids.clone();
    member_ids.extend(adds.iter().copied());
    for user_id in removes {
        member_ids.remove(user_id);
    }

    if member_ids.contains(&chat.owner_id) {
        return Err(MembershipChangeError::OwnerInMembers);
    }

    match chat.ctype {
        ChatType::Dm if member_ids.len() > 1 => return Err(MembershipChangeError::DmMemberLimit),
        ChatType::Group if member_ids.len() > MAX_GROUP_MEMBERS => {
            return Err(MembershipChangeError::GroupMemberLimit { max: MAX_GROUP_MEMBERS });
        }
        _ => {}
    }

    Ok(ChatMembership { member_ids, ..chat.clone() })
}
