// Publish bridge: request handlers (possibly in another process) hand events
// to the live broadcast layer by dialing the relay's own WebSocket endpoint
// as the internal publisher.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use futures_util::{SinkExt, StreamExt};
use socialnet_common::protocol::ws::{EventStatus, NotificationDraft, NotificationFrame};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue},
        Message,
    },
};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::envelope::Envelope;
use crate::metrics;
use crate::room::RoomKey;
use crate::store::StoredMessage;

const RELAY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct PublishBridge {
    host: Arc<str>,
    secured: bool,
    socket_secret: Arc<str>,
}

impl PublishBridge {
    pub fn new(host: impl Into<Arc<str>>, secured: bool, socket_secret: impl Into<Arc<str>>) -> Self {
        Self { host: host.into(), secured, socket_secret: socket_secret.into() }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.public_host.as_str(), config.secured, config.socket_secret.as_str())
    }

    pub fn endpoint_url(&self, room: RoomKey) -> anyhow::Result<Url> {
        let scheme = if self.secured { "wss" } else { "ws" };
        Url::parse(&format!("{scheme}://{}{}", self.host, room.path()))
            .with_context(|| format!("invalid relay host '{}'", self.host))
    }

    /// Sends one envelope into `room`. Failures are logged and swallowed so
    /// the caller's own work is never affected; the return value only says
    /// whether the frame went out.
    pub async fn relay(&self, room: RoomKey, envelope: Envelope) -> bool {
        let target_id = envelope.target_id();
        match tokio::time::timeout(RELAY_TIMEOUT, self.try_relay(room, &envelope)).await {
            Ok(Ok(())) => {
                debug!(room = %room, target_id = %target_id, "relayed envelope");
                metrics::record_bridge_relay(true);
                true
            }
            Ok(Err(error)) => {
                warn!(error = ?error, room = %room, target_id = %target_id, "failed to relay envelope");
                metrics::record_bridge_relay(false);
                false
            }
            Err(_) => {
                warn!(room = %room, target_id = %target_id, "timed out relaying envelope");
                metrics::record_bridge_relay(false);
                false
            }
        }
    }

    /// Fire-and-forget variant for request handlers.
    pub fn spawn_relay(&self, room: RoomKey, envelope: Envelope) -> JoinHandle<bool> {
        let bridge = self.clone();
        tokio::spawn(async move { bridge.relay(room, envelope).await })
    }

    async fn try_relay(&self, room: RoomKey, envelope: &Envelope) -> anyhow::Result<()> {
        let url = self.endpoint_url(room)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .context("failed to build relay handshake request")?;
        let secret = HeaderValue::from_str(&self.socket_secret)
            .map_err(|_| anyhow!("socket secret is not a valid header value"))?;
        request.headers_mut().insert(AUTHORIZATION, secret);

        let (mut socket, _) =
            connect_async(request).await.with_context(|| format!("failed to connect to {url}"))?;

        let frame = serde_json::to_string(&envelope.publish_frame())
            .context("failed to encode relay frame")?;
        socket.send(Message::Text(frame.into())).await.context("failed to send relay frame")?;
        socket.close(None).await.context("failed to close relay socket")?;

        // The relay handles the frame before it answers the close, so waiting
        // here keeps back-to-back relays from one caller in order.
        while let Some(frame) = socket.next().await {
            if frame.is_err() {
                break;
            }
        }

        Ok(())
    }
}

/// Room and envelope for a created or edited chat message. A message that
/// opens a direct chat is relayed to the recipient's room instead of the
/// chat's.
pub fn message_event(
    message: &StoredMessage,
    status: EventStatus,
    dm_recipient: Option<Uuid>,
) -> (RoomKey, Envelope) {
    let room = RoomKey::Chat(dm_recipient.unwrap_or(message.chat_id));
    (room, Envelope::chat_message(message.to_frame(status)))
}

pub fn message_deleted_event(chat_id: Uuid, message_id: Uuid) -> (RoomKey, Envelope) {
    (RoomKey::Chat(chat_id), Envelope::chat_message_deleted(message_id))
}

/// A new notification; its text is rendered from the draft's type and target.
pub fn notification_created_event(
    draft: NotificationDraft,
    receiver_ids: Vec<Uuid>,
) -> (RoomKey, Envelope) {
    let notification = draft.into_frame(EventStatus::Created);
    (RoomKey::Notifications, Envelope::notification(notification, receiver_ids))
}

/// A receiver marked the notification read; only that receiver is told.
pub fn notification_read_event(
    mut notification: NotificationFrame,
    reader_id: Uuid,
) -> (RoomKey, Envelope) {
    notification.status = EventStatus::Updated;
    notification.is_read = true;
    (RoomKey::Notifications, Envelope::notification(notification, vec![reader_id]))
}

pub fn notification_deleted_event(
    notification_id: Uuid,
    receiver_ids: Vec<Uuid>,
) -> (RoomKey, Envelope) {
    (RoomKey::Notifications, Envelope::notification_deleted(notification_id, receiver_ids))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EventKind;
    use chrono::Utc;
    use socialnet_common::types::{NotificationTarget, NotificationType, UserSummary};

    fn notification() -> NotificationFrame {
        NotificationFrame {
            id: Uuid::new_v4(),
            sender: Some(UserSummary::new("Ada", "Lovelace", "ada", None)),
            ntype: NotificationType::Reaction,
            message: "Ada Lovelace reacted to your post".to_string(),
            post_slug: Some("hello-world".to_string()),
            comment_slug: None,
            reply_slug: None,
            is_read: false,
            status: EventStatus::Created,
        }
    }

    #[test]
    fn endpoint_url_follows_scheme_and_room() {
        let chat_id = Uuid::new_v4();
        let plain = PublishBridge::new("relay.internal:8000", false, "secret");
        assert_eq!(
            plain.endpoint_url(RoomKey::Chat(chat_id)).expect("url").as_str(),
            format!("ws://relay.internal:8000/ws/chat/{chat_id}")
        );

        let secured = PublishBridge::new("relay.example.com", true, "secret");
        assert_eq!(
            secured.endpoint_url(RoomKey::Notifications).expect("url").as_str(),
            "wss://relay.example.com/ws/notifications"
        );
    }

    #[tokio::test]
    async fn unreachable_relay_is_swallowed() {
        let bridge = PublishBridge::new("127.0.0.1:1", false, "secret");
        let delivered = bridge
            .spawn_relay(RoomKey::Notifications, Envelope::notification_deleted(Uuid::new_v4(), vec![]))
            .await
            .expect("relay task should not panic");
        assert!(!delivered);
    }

    #[test]
    fn first_dm_message_targets_the_recipient_room() {
        let recipient = Uuid::new_v4();
        let now = Utc::now();
        let message = StoredMessage {
            id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            sender: UserSummary::new("Ada", "Lovelace", "ada", None),
            text: Some("hi".to_string()),
            file_url: None,
            created_at: now,
            updated_at: now,
        };

        let (room, envelope) = message_event(&message, EventStatus::Created, Some(recipient));
        assert_eq!(room, RoomKey::Chat(recipient));
        assert_eq!(envelope.kind(), EventKind::ChatMessage);

        let (room, _) = message_event(&message, EventStatus::Updated, None);
        assert_eq!(room, RoomKey::Chat(message.chat_id));
    }

    #[test]
    fn created_notification_renders_its_text() {
        let receiver = Uuid::new_v4();
        let draft = NotificationDraft {
            id: Uuid::new_v4(),
            sender: Some(UserSummary::new("Ada", "Lovelace", "ada", None)),
            ntype: NotificationType::Reply,
            target: NotificationTarget::Comment,
            post_slug: Some("hello-world".to_string()),
            comment_slug: Some("first".to_string()),
            reply_slug: Some("answer".to_string()),
            admin_message: None,
        };

        let (room, envelope) = notification_created_event(draft, vec![receiver]);
        assert_eq!(room, RoomKey::Notifications);
        assert_eq!(envelope.status(), EventStatus::Created);
        let payload = envelope.publish_frame().payload.expect("payload");
        assert_eq!(payload["message"], "Ada Lovelace replied your comment");
        assert_eq!(payload["reply_slug"], "answer");
    }

    #[test]
    fn read_notification_is_addressed_to_the_reader() {
        let reader = Uuid::new_v4();
        let (room, envelope) = notification_read_event(notification(), reader);

        assert_eq!(room, RoomKey::Notifications);
        assert_eq!(envelope.status(), EventStatus::Updated);
        assert_eq!(envelope.receiver_ids(), &[reader]);
        let frame = envelope.publish_frame();
        assert_eq!(frame.payload.expect("payload")["is_read"], true);
    }

    #[test]
    fn deleted_notification_relays_without_payload() {
        let id = Uuid::new_v4();
        let (_, envelope) = notification_deleted_event(id, vec![]);
        assert_eq!(
            serde_json::to_value(envelope.publish_frame()).expect("serialize"),
            serde_json::json!({ "status": "DELETED", "id": id })
        );
    }
}
