//! Client → Server messages

use serde::{Deserialize, Serialize};

/// What the client wants done with an envelope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// Plain chat message, relayed as-is
    #[default]
    Text,
    /// Ask the assistant for a conversational reply
    AiChat,
    /// Let the assistant pick and run tools (weather, spelling, translation, images)
    FunctionCall,
    /// Generate an image from the message as a prompt
    ImageGeneration,
    /// Anything this server version does not understand
    #[serde(other)]
    Unknown,
}

/// One inbound frame on the chat socket.
///
/// Only `type` and `message` are meaningful for every kind; both default when
/// absent so `{"message": "hi"}` is a plain text message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientEnvelope {
    #[serde(rename = "type", default)]
    pub kind: EnvelopeKind,
    #[serde(default)]
    pub message: String,
    /// Sender claimed by the client. Honored for `text` only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
}

impl ClientEnvelope {
    pub fn new(kind: EnvelopeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            nickname: None,
            target_language: None,
        }
    }

    /// Claimed sender, ignoring blank values.
    pub fn claimed_nickname(&self) -> Option<&str> {
        self.nickname
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// Body of `/spellcheck` and `/generate-image`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextRequest {
    pub text: String,
}

/// Body of `/translate`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
}

/// Body of `/weather`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherRequest {
    pub location: String,
}
