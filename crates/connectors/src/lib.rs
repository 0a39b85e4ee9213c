//! chatrelay connectors
//!
//! The AI assistant the chat relay talks to. The server only depends on the
//! [`Assistant`] trait; [`OpenAiAssistant`] is the production implementation.

pub mod openai;
pub mod tools;
pub mod weather;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

use chatrelay_protocol::{
    ContextMessage, FunctionOutcome, ImagePayload, SpellingCorrection, Translation, WeatherReport,
};

pub use openai::{OpenAiAssistant, OpenAiConfig};

/// Errors that can occur while talking to the assistant
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("OpenAI API key is not configured")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OpenAI API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Empty response from OpenAI API")]
    EmptyResponse,

    #[error("Image download failed: {0}")]
    ImageDownload(String),

    #[error("Invalid arguments for {name}: {reason}")]
    ToolArguments { name: String, reason: String },
}

impl AssistantError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AssistantError::Api { status: 429, .. })
    }
}

/// An image produced by the assistant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub prompt: String,
    pub source_url: String,
    pub bytes: Vec<u8>,
}

impl GeneratedImage {
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn to_payload(&self) -> ImagePayload {
        ImagePayload {
            image_url: self.source_url.clone(),
            image_base64: self.to_base64(),
            prompt: self.prompt.clone(),
        }
    }
}

/// Operations the chat relay needs from an AI backend.
///
/// Every call may fail; callers turn failures into chat content.
#[async_trait]
pub trait Assistant: Send + Sync {
    /// Conversational reply given prior context (oldest first).
    async fn converse(
        &self,
        message: &str,
        context: &[ContextMessage],
    ) -> Result<String, AssistantError>;

    /// Let the model choose tools for `message`, run them, and collect the results.
    async fn route_and_execute(
        &self,
        message: &str,
        target_language: Option<&str>,
    ) -> Result<FunctionOutcome, AssistantError>;

    async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage, AssistantError>;

    async fn correct_spelling(&self, text: &str) -> Result<SpellingCorrection, AssistantError>;

    async fn translate(
        &self,
        text: &str,
        target_language: &str,
    ) -> Result<Translation, AssistantError>;

    async fn weather(&self, location: &str) -> Result<WeatherReport, AssistantError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_image_encodes_bytes() {
        let image = GeneratedImage {
            prompt: "a cat".to_string(),
            source_url: "https://img.example/cat.png".to_string(),
            bytes: b"png".to_vec(),
        };
        let payload = image.to_payload();
        assert_eq!(payload.image_base64, "cG5n");
        assert_eq!(payload.image_url, "https://img.example/cat.png");
        assert_eq!(payload.prompt, "a cat");
    }

    #[test]
    fn only_429_counts_as_rate_limited() {
        let limited = AssistantError::Api {
            status: 429,
            body: String::new(),
        };
        let server = AssistantError::Api {
            status: 500,
            body: String::new(),
        };
        assert!(limited.is_rate_limited());
        assert!(!server.is_rate_limited());
        assert!(!AssistantError::EmptyResponse.is_rate_limited());
    }
}
