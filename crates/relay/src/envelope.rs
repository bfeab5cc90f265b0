// Event envelopes and the validator that turns an inbound text frame into one.

use serde_json::{json, Map, Value};
use socialnet_common::protocol::ws::{
    ChatMessageFrame, DeletedFrame, ErrorType, EventStatus, InboundFrame, NotificationFrame,
    OutboundFrame,
};
use tracing::error;
use uuid::Uuid;

use crate::connection::ConnectionContext;
use crate::error::RelayError;
use crate::room::RoomKey;
use crate::store::{SocialStore, StoredMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ChatMessage,
    Notification,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopePayload {
    ChatMessage(ChatMessageFrame),
    Notification(NotificationFrame),
}

/// One event on its way through a room.
///
/// A `DELETED` envelope never carries a payload; the constructors drop it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    kind: EventKind,
    status: EventStatus,
    target_id: Uuid,
    payload: Option<EnvelopePayload>,
    receiver_ids: Vec<Uuid>,
}

impl Envelope {
    pub fn chat_message(frame: ChatMessageFrame) -> Self {
        if frame.status == EventStatus::Deleted {
            return Self::chat_message_deleted(frame.id);
        }
        Self {
            kind: EventKind::ChatMessage,
            status: frame.status,
            target_id: frame.id,
            payload: Some(EnvelopePayload::ChatMessage(frame)),
            receiver_ids: Vec::new(),
        }
    }

    pub fn chat_message_deleted(message_id: Uuid) -> Self {
        Self {
            kind: EventKind::ChatMessage,
            status: EventStatus::Deleted,
            target_id: message_id,
            payload: None,
            receiver_ids: Vec::new(),
        }
    }

    pub fn notification(frame: NotificationFrame, receiver_ids: Vec<Uuid>) -> Self {
        if frame.status == EventStatus::Deleted {
            return Self::notification_deleted(frame.id, receiver_ids);
        }
        Self {
            kind: EventKind::Notification,
            status: frame.status,
            target_id: frame.id,
            payload: Some(EnvelopePayload::Notification(frame)),
            receiver_ids,
        }
    }

    pub fn notification_deleted(notification_id: Uuid, receiver_ids: Vec<Uuid>) -> Self {
        Self {
            kind: EventKind::Notification,
            status: EventStatus::Deleted,
            target_id: notification_id,
            payload: None,
            receiver_ids,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn status(&self) -> EventStatus {
        self.status
    }

    pub fn target_id(&self) -> Uuid {
        self.target_id
    }

    pub fn payload(&self) -> Option<&EnvelopePayload> {
        self.payload.as_ref()
    }

    pub fn receiver_ids(&self) -> &[Uuid] {
        &self.receiver_ids
    }

    /// What a subscriber sees. Receiver lists never leave the relay.
    pub fn client_frame(&self) -> OutboundFrame {
        match &self.payload {
            Some(EnvelopePayload::ChatMessage(frame)) => OutboundFrame::ChatMessage(frame.clone()),
            Some(EnvelopePayload::Notification(frame)) => {
                OutboundFrame::Notification(frame.clone())
            }
            None => OutboundFrame::Deleted(DeletedFrame::new(self.target_id)),
        }
    }

    /// What an internal publisher sends for this envelope. Chat messages go
    /// out as `{status, id}` because the relay re-reads the stored message.
    pub fn publish_frame(&self) -> InboundFrame {
        let payload = match (&self.kind, &self.payload) {
            (EventKind::Notification, Some(EnvelopePayload::Notification(frame))) => {
                serde_json::to_value(frame).ok()
            }
            _ => None,
        };
        InboundFrame {
            status: self.status,
            id: self.target_id,
            payload,
            receiver_ids: self.receiver_ids.clone(),
        }
    }
}

/// Checked for every inbound frame, text or binary, before its content is
/// looked at. Only the publish bridge may write to the notifications room.
pub fn check_write_access(context: &ConnectionContext) -> Result<(), RelayError> {
    if context.room == RoomKey::Notifications && !context.identity.is_internal() {
        return Err(RelayError::from_code(ErrorType::NotAllowed));
    }
    Ok(())
}

/// Validates one inbound text frame against the connection it arrived on.
pub async fn validate(
    store: &SocialStore,
    raw: &str,
    context: &ConnectionContext,
) -> Result<Envelope, RelayError> {
    check_write_access(context)?;

    let value: Value = serde_json::from_str(raw)
        .map_err(|_| RelayError::from_code(ErrorType::InvalidDataType))?;
    let Value::Object(fields) = value else {
        return Err(RelayError::from_code(ErrorType::InvalidDataType));
    };
    let frame = parse_inbound_frame(&fields)?;

    match context.room {
        RoomKey::Notifications => validate_notification(frame),
        RoomKey::Chat(room_id) => validate_chat_message(store, room_id, frame, context).await,
    }
}

fn parse_inbound_frame(fields: &Map<String, Value>) -> Result<InboundFrame, RelayError> {
    let mut errors = Map::new();

    let status = match fields.get("status") {
        None | Some(Value::Null) => {
            errors.insert("status".into(), json!("This field is required."));
            None
        }
        Some(value) => match serde_json::from_value::<EventStatus>(value.clone()) {
            Ok(status) => Some(status),
            Err(_) => {
                errors.insert(
                    "status".into(),
                    json!(format!("{} is not a valid choice.", display_value(value))),
                );
                None
            }
        },
    };

    let id = match fields.get("id") {
        None | Some(Value::Null) => {
            errors.insert("id".into(), json!("This field is required."));
            None
        }
        Some(value) => match value.as_str().and_then(|raw| Uuid::parse_str(raw).ok()) {
            Some(id) => Some(id),
            None => {
                errors.insert("id".into(), json!("Must be a valid UUID."));
                None
            }
        },
    };

    let receiver_ids = match fields.get("receiver_ids") {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => match serde_json::from_value::<Vec<Uuid>>(value.clone()) {
            Ok(ids) => ids,
            Err(_) => {
                errors.insert("receiver_ids".into(), json!("Must be a list of valid UUIDs."));
                Vec::new()
            }
        },
    };

    let payload = fields.get("payload").filter(|value| !value.is_null()).cloned();

    match (status, id) {
        (Some(status), Some(id)) if errors.is_empty() => {
            Ok(InboundFrame { status, id, payload, receiver_ids })
        }
        _ => Err(invalid_entry(errors)),
    }
}

fn validate_notification(frame: InboundFrame) -> Result<Envelope, RelayError> {
    if frame.status == EventStatus::Deleted {
        return Ok(Envelope::notification_deleted(frame.id, frame.receiver_ids));
    }

    let mut errors = Map::new();
    let notification = match frame.payload {
        None => {
            errors.insert("payload".into(), json!("This field is required."));
            None
        }
        Some(payload) => match serde_json::from_value::<NotificationFrame>(payload) {
            Ok(notification) if notification.id == frame.id => Some(notification),
            Ok(_) => {
                errors.insert("payload".into(), json!("Payload id does not match id."));
                None
            }
            Err(error) => {
                errors.insert("payload".into(), json!(error.to_string()));
                None
            }
        },
    };
    if frame.receiver_ids.is_empty() {
        errors.insert("receiver_ids".into(), json!("This list may not be empty."));
    }

    match notification {
        Some(mut notification) if errors.is_empty() => {
            notification.status = frame.status;
            Ok(Envelope::notification(notification, frame.receiver_ids))
        }
        _ => Err(invalid_entry(errors)),
    }
}

async fn validate_chat_message(
    store: &SocialStore,
    room_id: Uuid,
    frame: InboundFrame,
    context: &ConnectionContext,
) -> Result<Envelope, RelayError> {
    if frame.status == EventStatus::Deleted {
        if !context.identity.is_internal() {
            return Err(invalid_entry_field("status", "DELETED is not a valid choice."));
        }
        return Ok(Envelope::chat_message_deleted(frame.id));
    }

    let message = store
        .message_projection(frame.id)
        .await
        .map_err(|error| server_error(error, context))?
        .ok_or_else(|| RelayError::from_code(ErrorType::NonExistent))?;

    if let Some(user_id) = context.identity.user_id() {
        if message.sender_id != user_id {
            return Err(RelayError::from_code(ErrorType::InvalidOwner));
        }
    }

    let belongs = message_belongs_to_room(store, room_id, &message)
        .await
        .map_err(|error| server_error(error, context))?;
    if !belongs {
        return Err(invalid_entry_field("id", "Message does not belong to this chat."));
    }

    Ok(Envelope::chat_message(message.to_frame(frame.status)))
}

/// A message belongs to `chat_{room_id}` when it was posted in that chat, or
/// when `room_id` is a user id and the message's chat involves that user.
async fn message_belongs_to_room(
    store: &SocialStore,
    room_id: Uuid,
    message: &StoredMessage,
) -> anyhow::Result<bool> {
    if message.chat_id == room_id {
        return Ok(true);
    }
    Ok(store
        .chat_membership(message.chat_id)
        .await?
        .is_some_and(|chat| chat.includes(room_id)))
}

fn invalid_entry(errors: Map<String, Value>) -> RelayError {
    RelayError::from_code(ErrorType::InvalidEntry).with_data(Value::Object(errors))
}

fn invalid_entry_field(field: &str, message: &str) -> RelayError {
    let mut errors = Map::new();
    errors.insert(field.to_string(), json!(message));
    invalid_entry(errors)
}

fn server_error(error: anyhow::Error, context: &ConnectionContext) -> RelayError {
    error!(
        error = ?error,
        connection_id = %context.connection_id,
        room = %context.room,
        "failed to validate inbound frame"
    );
    RelayError::from_code(ErrorType::ServerError)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(raw) => raw.clone(),
        other => other.to_string().replace('"', ""),
    }
}
