//! Core types shared across the protocol

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::server::RecordKind;

/// Chat role as understood by the language model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    /// Role a stored record plays in conversation context.
    pub fn for_record(kind: RecordKind) -> Self {
        match kind {
            RecordKind::AiChat => ChatRole::Assistant,
            _ => ChatRole::User,
        }
    }
}

/// One turn of conversation context handed to the assistant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: ChatRole,
    pub content: String,
}

/// Result of letting the assistant route a request to its tools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FunctionOutcome {
    /// The model answered directly without calling a tool
    Text { content: Option<String> },
    /// The model called one or more tools
    FunctionCall {
        content: Option<String>,
        results: Vec<FunctionResult>,
    },
}

/// Output of one tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResult {
    pub function: String,
    pub result: Value,
}

/// Spelling correction returned by the assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpellingCorrection {
    pub original: String,
    pub corrected: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub corrections: Vec<Correction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    #[serde(default)]
    pub wrong: String,
    #[serde(default)]
    pub correct: String,
    /// Models answer with either a word index or a description
    #[serde(default)]
    pub position: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    pub original: String,
    pub translated: String,
    pub target_language: String,
}

/// Weather snapshot for one location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub location: String,
    pub temperature: String,
    pub condition: String,
    pub humidity: String,
    pub wind: String,
}

/// Generated image as returned over HTTP and inside tool results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub image_url: String,
    pub image_base64: String,
    pub prompt: String,
}
