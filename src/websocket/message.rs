use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connection_manager::ConnectionId;

/// Sender tag used on the direct echo of a chat message
pub const SERVER_SENDER: &str = "server";

/// Messages sent from client to server, as they appear on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "join")]
    Join {
        #[serde(default)]
        room: Option<serde_json::Value>,
    },
    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        content: Option<serde_json::Value>,
        /// Only a non-empty string counts as a room; any other value is ignored
        #[serde(default)]
        room: Option<serde_json::Value>,
    },
}

/// An inbound text frame, decoded once at the connection boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Join { room: Option<String> },
    Chat { content: String, room: Option<String> },
    Unknown { kind: Option<String> },
}

impl InboundFrame {
    /// Classify a text frame.
    ///
    /// JSON objects are routed by their `type` field; objects with a missing
    /// or unrecognized `type` become `Unknown`. A `room` that is not a
    /// non-empty string is dropped. Anything that is not a JSON object is
    /// treated as plain chat text.
    pub fn decode(text: &str) -> Self {
        let value = match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value @ serde_json::Value::Object(_)) => value,
            _ => {
                return Self::Chat {
                    content: text.to_string(),
                    room: None,
                }
            }
        };

        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .map(str::to_string);

        match serde_json::from_value::<ClientMessage>(value) {
            Ok(ClientMessage::Join { room }) => Self::Join {
                room: room_name(room),
            },
            Ok(ClientMessage::Message { content, room }) => Self::Chat {
                content: content_to_string(content),
                room: room_name(room),
            },
            Err(_) => Self::Unknown { kind },
        }
    }
}

fn room_name(room: Option<serde_json::Value>) -> Option<String> {
    match room {
        Some(serde_json::Value::String(r)) if !r.trim().is_empty() => Some(r),
        _ => None,
    }
}

fn content_to_string(content: Option<serde_json::Value>) -> String {
    match content {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "connection")]
    Connection {
        status: String,
        client_id: ConnectionId,
        hostname: String,
    },
    #[serde(rename = "room_users")]
    RoomUsers { users: Vec<ConnectionId> },
    #[serde(rename = "user_joined")]
    UserJoined {
        #[serde(rename = "userId")]
        user_id: ConnectionId,
        username: String,
    },
    #[serde(rename = "user_left")]
    UserLeft {
        #[serde(rename = "userId")]
        user_id: ConnectionId,
        username: String,
    },
    #[serde(rename = "message")]
    Message {
        sender: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerMessage {
    pub fn connected(client_id: ConnectionId, hostname: impl Into<String>) -> Self {
        Self::Connection {
            status: "connected".to_string(),
            client_id,
            hostname: hostname.into(),
        }
    }

    pub fn room_users(users: Vec<ConnectionId>) -> Self {
        Self::RoomUsers { users }
    }

    pub fn user_joined(user_id: ConnectionId) -> Self {
        Self::UserJoined {
            user_id,
            username: user_id.to_string(),
        }
    }

    pub fn user_left(user_id: ConnectionId) -> Self {
        Self::UserLeft {
            user_id,
            username: user_id.to_string(),
        }
    }

    /// Direct acknowledgement of a chat message, sent only to its author
    pub fn echo(content: impl Into<String>) -> Self {
        Self::Message {
            sender: SERVER_SENDER.to_string(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Room copy of a chat message, attributed to its author
    pub fn chat(sender: ConnectionId, content: impl Into<String>) -> Self {
        Self::Message {
            sender: sender.to_string(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::RoomUsers { .. } => "room_users",
            Self::UserJoined { .. } => "user_joined",
            Self::UserLeft { .. } => "user_left",
            Self::Message { .. } => "message",
            Self::Error { .. } => "error",
        }
    }
}

/// What a connection's writer task pulls off its queue
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// Serialized by the writer
    Raw(ServerMessage),
    /// Serialized once and shared across every recipient of a broadcast
    Serialized(Arc<str>),
    /// Send a close frame and stop writing
    Close,
}

impl OutboundMessage {
    pub fn preserialized(message: &ServerMessage) -> serde_json::Result<Self> {
        Ok(Self::Serialized(Arc::from(serde_json::to_string(message)?)))
    }

    /// Render as JSON text; `None` for control messages.
    pub fn to_json(&self) -> Option<serde_json::Result<String>> {
        match self {
            Self::Raw(message) => Some(serde_json::to_string(message)),
            Self::Serialized(text) => Some(Ok(text.to_string())),
            Self::Close => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_join_with_room() {
        let frame = InboundFrame::decode(r#"{"type":"join","room":"support"}"#);
        assert_eq!(
            frame,
            InboundFrame::Join {
                room: Some("support".to_string())
            }
        );
    }

    #[test]
    fn test_decode_join_without_room_or_empty_room() {
        assert_eq!(
            InboundFrame::decode(r#"{"type":"join"}"#),
            InboundFrame::Join { room: None }
        );
        assert_eq!(
            InboundFrame::decode(r#"{"type":"join","room":"  "}"#),
            InboundFrame::Join { room: None }
        );
    }

    #[test]
    fn test_decode_join_ignores_extra_fields() {
        let frame = InboundFrame::decode(r#"{"type":"join","room":"general","userId":"abc"}"#);
        assert_eq!(
            frame,
            InboundFrame::Join {
                room: Some("general".to_string())
            }
        );
    }

    #[test]
    fn test_decode_message() {
        let frame = InboundFrame::decode(r#"{"type":"message","content":"hi"}"#);
        assert_eq!(
            frame,
            InboundFrame::Chat {
                content: "hi".to_string(),
                room: None
            }
        );
    }

    #[test]
    fn test_decode_message_defaults_content() {
        let frame = InboundFrame::decode(r#"{"type":"message"}"#);
        assert_eq!(
            frame,
            InboundFrame::Chat {
                content: String::new(),
                room: None
            }
        );
    }

    #[test]
    fn test_decode_message_non_string_content() {
        let frame = InboundFrame::decode(r#"{"type":"message","content":42}"#);
        assert_eq!(
            frame,
            InboundFrame::Chat {
                content: "42".to_string(),
                room: None
            }
        );
    }

    #[test]
    fn test_decode_plain_text() {
        let frame = InboundFrame::decode("hello");
        assert_eq!(
            frame,
            InboundFrame::Chat {
                content: "hello".to_string(),
                room: None
            }
        );
    }

    #[test]
    fn test_decode_non_object_json_is_plain_text() {
        assert_eq!(
            InboundFrame::decode("123"),
            InboundFrame::Chat {
                content: "123".to_string(),
                room: None
            }
        );
        assert_eq!(
            InboundFrame::decode(r#""quoted""#),
            InboundFrame::Chat {
                content: r#""quoted""#.to_string(),
                room: None
            }
        );
    }

    #[test]
    fn test_decode_unknown_type() {
        assert_eq!(
            InboundFrame::decode(r#"{"type":"typing"}"#),
            InboundFrame::Unknown {
                kind: Some("typing".to_string())
            }
        );
        assert_eq!(
            InboundFrame::decode(r#"{"content":"no type"}"#),
            InboundFrame::Unknown { kind: None }
        );
    }

    #[test]
    fn test_decode_non_string_room_is_dropped() {
        assert_eq!(
            InboundFrame::decode(r#"{"type":"message","content":"hi","room":7}"#),
            InboundFrame::Chat {
                content: "hi".to_string(),
                room: None
            }
        );
        assert_eq!(
            InboundFrame::decode(r#"{"type":"join","room":["general"]}"#),
            InboundFrame::Join { room: None }
        );
    }

    #[test]
    fn test_connection_wire_shape() {
        let id = ConnectionId::new();
        let value = serde_json::to_value(ServerMessage::connected(id, "host-1")).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "connection",
                "status": "connected",
                "client_id": id.to_string(),
                "hostname": "host-1"
            })
        );
    }

    #[test]
    fn test_presence_wire_shape() {
        let id = ConnectionId::new();
        let joined = serde_json::to_value(ServerMessage::user_joined(id)).unwrap();
        assert_eq!(joined["type"], "user_joined");
        assert_eq!(joined["userId"], id.to_string());
        assert_eq!(joined["username"], id.to_string());

        let left = serde_json::to_value(ServerMessage::user_left(id)).unwrap();
        assert_eq!(left["type"], "user_left");
        assert_eq!(left["userId"], id.to_string());
    }

    #[test]
    fn test_echo_and_chat_senders() {
        let id = ConnectionId::new();
        let echo = serde_json::to_value(ServerMessage::echo("hi")).unwrap();
        assert_eq!(echo["type"], "message");
        assert_eq!(echo["sender"], "server");
        assert_eq!(echo["content"], "hi");
        assert!(echo["timestamp"].is_string());

        let chat = serde_json::to_value(ServerMessage::chat(id, "hi")).unwrap();
        assert_eq!(chat["sender"], id.to_string());
    }

    #[test]
    fn test_outbound_close_has_no_json() {
        assert!(OutboundMessage::Close.to_json().is_none());

        let message = ServerMessage::room_users(vec![]);
        let preserialized = OutboundMessage::preserialized(&message).unwrap();
        let text = preserialized.to_json().unwrap().unwrap();
        assert_eq!(text, r#"{"type":"room_users","users":[]}"#);
    }
}
