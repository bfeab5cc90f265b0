use serde_json::{json, Value};
use socialnet_common::protocol::ws::{
    ChatMessageFrame, DeletedFrame, ErrorFrame, ErrorType, EventStatus, InboundFrame,
    NotificationFrame, OutboundFrame,
};
use socialnet_common::types::{NotificationType, UserSummary};
use uuid::Uuid;

fn object_keys(value: &Value) -> Vec<String> {
    let mut keys: Vec<String> =
        value.as_object().expect("frame should be a JSON object").keys().cloned().collect();
    keys.sort();
    keys
}

fn sender() -> UserSummary {
    UserSummary::new("Ada", "Lovelace", "ada-lovelace", Some("https://cdn.example/ada.png".into()))
}

#[test]
fn chat_message_frame_shape() {
    let frame = OutboundFrame::ChatMessage(ChatMessageFrame {
        id: Uuid::new_v4(),
        chat_id: Some(Uuid::new_v4()),
        sender: sender(),
        text: Some("hello".to_string()),
        file: None,
        created_at: "2024-05-01T10:00:00+00:00".to_string(),
        updated_at: "2024-05-01T10:00:00+00:00".to_string(),
        status: EventStatus::Created,
    });
    let value = serde_json::to_value(frame).expect("frame should serialize");

    assert_eq!(
        object_keys(&value),
        ["chat_id", "created_at", "file", "id", "sender", "status", "text", "updated_at"]
    );
    assert_eq!(object_keys(&value["sender"]), ["avatar", "name", "slug"]);
    assert_eq!(value["sender"]["name"], "Ada Lovelace");
    assert_eq!(value["status"], "CREATED");
}

#[test]
fn notification_frame_shape_omits_absent_slugs() {
    let frame = OutboundFrame::Notification(NotificationFrame {
        id: Uuid::new_v4(),
        sender: Some(sender()),
        ntype: NotificationType::Reaction,
        message: "Ada Lovelace reacted to your post".to_string(),
        post_slug: Some("first-post".to_string()),
        comment_slug: None,
        reply_slug: None,
        is_read: false,
        status: EventStatus::Updated,
    });
    let value = serde_json::to_value(frame).expect("frame should serialize");

    assert_eq!(
        object_keys(&value),
        ["id", "is_read", "message", "ntype", "post_slug", "sender", "status"]
    );
    assert_eq!(value["ntype"], "REACTION");
}

#[test]
fn untagged_outbound_frame_reads_back_as_deleted() {
    let id = Uuid::new_v4();
    let frame: OutboundFrame =
        serde_json::from_value(json!({ "id": id, "status": "DELETED" })).expect("frame should parse");
    assert_eq!(frame, OutboundFrame::Deleted(DeletedFrame::new(id)));
}

#[test]
fn publisher_inbound_frame_round_trips_receivers() {
    let receiver = Uuid::new_v4();
    let raw = json!({
        "status": "CREATED",
        "id": Uuid::new_v4(),
        "payload": { "anything": true },
        "receiver_ids": [receiver],
    });
    let frame: InboundFrame = serde_json::from_value(raw.clone()).expect("frame should parse");

    assert_eq!(frame.receiver_ids, vec![receiver]);
    assert_eq!(serde_json::to_value(&frame).expect("frame should serialize"), raw);
}

#[test]
fn error_codes_use_snake_case_on_the_wire() {
    let expected = [
        (ErrorType::Auth, "auth"),
        (ErrorType::InvalidDataType, "invalid_data_type"),
        (ErrorType::InvalidEntry, "invalid_entry"),
        (ErrorType::NonExistent, "non_existent"),
        (ErrorType::InvalidOwner, "invalid_owner"),
        (ErrorType::NotAllowed, "not_allowed"),
        (ErrorType::InvalidId, "invalid_id"),
        (ErrorType::NotAMember, "not_a_member"),
        (ErrorType::ServerError, "server_error"),
    ];

    for (code, wire) in expected {
        let value = serde_json::to_value(ErrorFrame::new(code, code.default_message()))
            .expect("error should serialize");
        assert_eq!(value["type"], wire);
        assert_eq!(value["status"], "error");
        assert_eq!(code.as_str(), wire);
    }
}
