// WebSocket frame types for the socialnet real-time endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{NotificationTarget, NotificationType, UserSummary};

/// Close code sent right after an authentication error frame.
pub const CLOSE_AUTH_FAILED: u16 = 4001;

/// Close code sent after an authorization or subscribe-time validation
/// failure. Clients already treat 1001 as "denied", so it is kept even though
/// RFC 6455 names it "going away".
pub const CLOSE_DENIED: u16 = 1001;

/// Lifecycle status carried by every event frame.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Created,
    Updated,
    Deleted,
}

impl EventStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Updated => "UPDATED",
            Self::Deleted => "DELETED",
        }
    }
}

/// Frame received from a connection.
///
/// Ordinary clients send only `status` and `id`. Internal publishers may attach
/// a `payload` and, for notifications, the `receiver_ids`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundFrame {
    pub status: EventStatus,
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub receiver_ids: Vec<Uuid>,
}

/// Server -> client: a created or updated chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessageFrame {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<Uuid>,
    pub sender: UserSummary,
    pub text: Option<String>,
    pub file: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub status: EventStatus,
}

/// Server -> client: a created, updated or read notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationFrame {
    pub id: Uuid,
    pub sender: Option<UserSummary>,
    pub ntype: NotificationType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_slug: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_slug: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    pub status: EventStatus,
}

/// A notification before its text is rendered. The receiver-facing
/// `message` is always derived from `ntype` and `target`; `admin_message` is
/// only read for `Admin` notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationDraft {
    pub id: Uuid,
    pub sender: Option<UserSummary>,
    pub ntype: NotificationType,
    pub target: NotificationTarget,
    pub post_slug: Option<String>,
    pub comment_slug: Option<String>,
    pub reply_slug: Option<String>,
    pub admin_message: Option<String>,
}

impl NotificationDraft {
    pub fn into_frame(self, status: EventStatus) -> NotificationFrame {
        let sender_name =
            self.sender.as_ref().map(|sender| sender.name.as_str()).unwrap_or_default();
        let message = self
            .ntype
            .message(sender_name, self.target)
            .or(self.admin_message)
            .unwrap_or_default();

        NotificationFrame {
            id: self.id,
            sender: self.sender,
            ntype: self.ntype,
            message,
            post_slug: self.post_slug,
            comment_slug: self.comment_slug,
            reply_slug: self.reply_slug,
            is_read: false,
            status,
        }
    }
}

/// Server -> client: a deletion. Never carries the deleted object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeletedFrame {
    pub id: Uuid,
    pub status: EventStatus,
}

impl DeletedFrame {
    pub fn new(id: Uuid) -> Self {
        Self { id, status: EventStatus::Deleted }
    }
}

/// Any frame the server writes for an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OutboundFrame {
    ChatMessage(ChatMessageFrame),
    Notification(NotificationFrame),
    Deleted(DeletedFrame),
}

/// Wire error codes, shared by both endpoints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Auth,
    InvalidDataType,
    InvalidEntry,
    NonExistent,
    InvalidOwner,
    NotAllowed,
    InvalidId,
    NotAMember,
    ServerError,
}

impl ErrorType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::InvalidDataType => "invalid_data_type",
            Self::InvalidEntry => "invalid_entry",
            Self::NonExistent => "non_existent",
            Self::InvalidOwner => "invalid_owner",
            Self::NotAllowed => "not_allowed",
            Self::InvalidId => "invalid_id",
            Self::NotAMember => "not_a_member",
            Self::ServerError => "server_error",
        }
    }

    pub const fn default_message(self) -> &'static str {
        match self {
            Self::Auth => "Auth token is invalid or expired",
            Self::InvalidDataType => "Data is not a valid json",
            Self::InvalidEntry => "Invalid entry data",
            Self::NonExistent => "Message does not exist",
            Self::InvalidOwner => "You are not the sender of this message",
            Self::NotAllowed => "You're not allowed to send data",
            Self::InvalidId => "Invalid ID",
            Self::NotAMember => "You're not a member of this chat",
            Self::ServerError => "Server error",
        }
    }
}

/// `{"status": "error", "type", "message", "data"?}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorFrame {
    pub status: ErrorStatus,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// The constant `"error"` status tag of an [`ErrorFrame`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStatus {
    Error,
}

impl ErrorFrame {
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self { status: ErrorStatus::Error, error_type, message: message.into(), data: None }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}
