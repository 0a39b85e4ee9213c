//! Server → Client messages

use serde::{Deserialize, Serialize};

use crate::{ASSISTANT_SENDER, SYSTEM_SENDER};

/// Kind of a stored chat record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Text,
    AiChat,
    FunctionResult,
    Image,
    Error,
    System,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Text => "text",
            RecordKind::AiChat => "ai_chat",
            RecordKind::FunctionResult => "function_result",
            RecordKind::Image => "image",
            RecordKind::Error => "error",
            RecordKind::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "text" => RecordKind::Text,
            "ai_chat" => RecordKind::AiChat,
            "function_result" => RecordKind::FunctionResult,
            "image" => RecordKind::Image,
            "error" => RecordKind::Error,
            "system" => RecordKind::System,
            _ => return None,
        })
    }
}

/// A persisted chat record. This is the only payload ever broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub kind: RecordKind,
    pub sender: String,
    pub body: String,
    /// ISO-8601 UTC, assigned by the server
    pub timestamp: String,
    /// Base64 image payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A record that has not been persisted yet (no id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub kind: RecordKind,
    pub sender: String,
    pub body: String,
    pub timestamp: String,
    pub attachment: Option<String>,
    pub error: Option<String>,
}

impl NewRecord {
    fn plain(kind: RecordKind, sender: &str, body: String, timestamp: String) -> Self {
        Self {
            kind,
            sender: sender.to_string(),
            body,
            timestamp,
            attachment: None,
            error: None,
        }
    }

    pub fn text(sender: &str, body: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self::plain(RecordKind::Text, sender, body.into(), timestamp.into())
    }

    pub fn assistant_reply(reply: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self::plain(
            RecordKind::AiChat,
            ASSISTANT_SENDER,
            reply.into(),
            timestamp.into(),
        )
    }

    pub fn function_result(body: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self::plain(
            RecordKind::FunctionResult,
            ASSISTANT_SENDER,
            body.into(),
            timestamp.into(),
        )
    }

    pub fn image(prompt: &str, image_base64: String, timestamp: impl Into<String>) -> Self {
        Self {
            attachment: Some(image_base64),
            ..Self::plain(
                RecordKind::Image,
                ASSISTANT_SENDER,
                format!("Image generated: {prompt}"),
                timestamp.into(),
            )
        }
    }

    /// Assistant-side failure, surfaced as ordinary chat content.
    pub fn failure(summary: &str, error: impl Into<String>, timestamp: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            error: Some(error.clone()),
            ..Self::plain(
                RecordKind::Error,
                ASSISTANT_SENDER,
                format!("{summary}: {error}"),
                timestamp.into(),
            )
        }
    }

    pub fn departure(identity: &str, timestamp: impl Into<String>) -> Self {
        Self::plain(
            RecordKind::System,
            SYSTEM_SENDER,
            format!("{identity} left the chat."),
            timestamp.into(),
        )
    }

    /// Attach the store-assigned id.
    pub fn into_record(self, id: String) -> MessageRecord {
        MessageRecord {
            id,
            kind: self.kind,
            sender: self.sender,
            body: self.body,
            timestamp: self.timestamp,
            attachment: self.attachment,
            error: self.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_match_wire_format() {
        for kind in [
            RecordKind::Text,
            RecordKind::AiChat,
            RecordKind::FunctionResult,
            RecordKind::Image,
            RecordKind::Error,
            RecordKind::System,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            assert_eq!(RecordKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RecordKind::parse("bogus"), None);
    }

    #[test]
    fn optional_fields_are_omitted_on_the_wire() {
        let record = NewRecord::text("alice", "hi", "2024-01-15T12:30:45.000000Z")
            .into_record("id-1".to_string());
        let value = serde_json::to_value(&record).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object["kind"], "text");
        assert_eq!(object["sender"], "alice");
        assert!(!object.contains_key("attachment"));
        assert!(!object.contains_key("error"));
    }

    #[test]
    fn failure_records_carry_error_and_no_attachment() {
        let record = NewRecord::failure("Image generation failed", "quota exceeded", "t");
        assert_eq!(record.kind, RecordKind::Error);
        assert_eq!(record.sender, ASSISTANT_SENDER);
        assert_eq!(record.error.as_deref(), Some("quota exceeded"));
        assert!(record.attachment.is_none());
        assert!(record.body.contains("quota exceeded"));
    }

    #[test]
    fn departure_mentions_identity() {
        let record = NewRecord::departure("bob", "t");
        assert_eq!(record.kind, RecordKind::System);
        assert_eq!(record.sender, SYSTEM_SENDER);
        assert!(record.body.contains("bob"));
    }
}
