// Projections shared by the relay and the request handlers that publish to it.

use serde::{Deserialize, Serialize};

/// Public view of a user embedded in message and notification frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSummary {
    pub name: String,
    pub slug: String,
    pub avatar: Option<String>,
}

impl UserSummary {
    pub fn new(first_name: &str, last_name: &str, username: &str, avatar: Option<String>) -> Self {
        Self {
            name: format!("{first_name} {last_name}").trim().to_string(),
            slug: username.to_string(),
            avatar,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    Reaction,
    Comment,
    Reply,
    Admin,
}

/// What a notification points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationTarget {
    Post,
    Comment,
    Reply,
}

impl NotificationType {
    /// Human-readable line shown to the receiver.
    ///
    /// `Admin` notifications carry their own text and return `None`.
    pub fn message(self, sender_name: &str, target: NotificationTarget) -> Option<String> {
        let message = match (self, target) {
            (Self::Reaction, NotificationTarget::Comment) => {
                format!("{sender_name} reacted to your comment")
            }
            (Self::Reaction, NotificationTarget::Reply) => {
                format!("{sender_name} reacted to your reply")
            }
            (Self::Reaction, NotificationTarget::Post) => {
                format!("{sender_name} reacted to your post")
            }
            (Self::Comment, _) => format!("{sender_name} commented on your post"),
            (Self::Reply, _) => format!("{sender_name} replied your comment"),
            (Self::Admin, _) => return None,
        };
        Some(message)
    }
}
