use std::fmt;

use uuid::Uuid;

/// A broadcast group. Rooms are derived: one exists while at least one
/// connection maps to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKey {
    /// `chat_{id}`, where `id` is a chat id or, for the first message of a
    /// direct chat, the recipient's user id.
    Chat(Uuid),
    Notifications,
}

impl RoomKey {
    pub fn group_name(&self) -> String {
        match self {
            Self::Chat(id) => format!("chat_{id}"),
            Self::Notifications => "notifications".to_string(),
        }
    }

    /// Request path of the endpoint serving this room.
    pub fn path(&self) -> String {
        match self {
            Self::Chat(id) => format!("/ws/chat/{id}"),
            Self::Notifications => "/ws/notifications".to_string(),
        }
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.group_name())
    }
}
