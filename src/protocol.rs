use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// A serialized event, shared between every recipient of one broadcast.
pub type Frame = Arc<str>;

/// MessageType identifies what kind of event is being sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    // Client → Server
    Join,
    // Both directions
    Message,
    Typing,
    // Server → Client
    Users,
    /// Anything the hub does not understand, including a missing `type`.
    #[default]
    #[serde(other)]
    Unknown,
}

/// Every event is a single JSON object carried in one WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type", default)]
    pub msg_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<String>>,
}

impl Message {
    fn new(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            user: None,
            text: None,
            users: None,
        }
    }

    pub fn join(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            ..Self::new(MessageType::Join)
        }
    }

    pub fn chat(user: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            text: Some(text.into()),
            ..Self::new(MessageType::Message)
        }
    }

    pub fn typing(user: impl Into<String>, text: Option<String>) -> Self {
        Self {
            user: Some(user.into()),
            text,
            ..Self::new(MessageType::Typing)
        }
    }

    /// Roster event. The list is always serialized, even when empty.
    pub fn users(users: Vec<String>) -> Self {
        Self {
            users: Some(users),
            ..Self::new(MessageType::Users)
        }
    }

    /// Events are field-tagged objects. `null` decodes as an ignorable
    /// [`MessageType::Unknown`]; arrays and other scalars are rejected.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        match serde_json::from_slice::<Value>(data)? {
            value @ Value::Object(_) => Ok(serde_json::from_value(value)?),
            Value::Null => Ok(Self::new(MessageType::Unknown)),
            Value::Array(_) => Err(ProtocolError::NotAnObject("array")),
            Value::Bool(_) => Err(ProtocolError::NotAnObject("boolean")),
            Value::Number(_) => Err(ProtocolError::NotAnObject("number")),
            Value::String(_) => Err(ProtocolError::NotAnObject("string")),
        }
    }

    pub fn encode(&self) -> Result<Frame, ProtocolError> {
        Ok(serde_json::to_string(self)?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_join() {
        let msg = Message::decode(br#"{"type":"join","user":"ann"}"#).unwrap();
        assert_eq!(msg, Message::join("ann"));
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        let msg = Message::decode(br#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg.msg_type, MessageType::Unknown);
    }

    #[test]
    fn missing_type_decodes_as_unknown() {
        let msg = Message::decode(br#"{"user":"ann","text":"hi"}"#).unwrap();
        assert_eq!(msg.msg_type, MessageType::Unknown);
        assert_eq!(msg.text.as_deref(), Some("hi"));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(
            Message::decode(b"{not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(Message::decode(br#"{"type":"message","user":5}"#).is_err());
    }

    #[test]
    fn positional_array_is_rejected() {
        assert!(matches!(
            Message::decode(br#"["join","ann"]"#),
            Err(ProtocolError::NotAnObject("array"))
        ));
        assert!(Message::decode(b"42").is_err());
        assert!(Message::decode(br#""join""#).is_err());
    }

    #[test]
    fn null_decodes_as_ignorable_event() {
        let msg = Message::decode(b"null").unwrap();
        assert_eq!(msg.msg_type, MessageType::Unknown);
        assert_eq!(msg.user, None);
    }

    #[test]
    fn chat_omits_absent_fields() {
        let frame = Message::chat("A", "hi").encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({"type": "message", "user": "A", "text": "hi"}));
    }

    #[test]
    fn empty_roster_still_carries_a_list() {
        let frame = Message::users(Vec::new()).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({"type": "users", "users": []}));
    }
}
