//! OpenAI-backed assistant.
//!
//! Talks to the chat-completions and image-generation endpoints with a plain
//! reqwest client. Rate-limited requests (429) are retried once.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use chatrelay_protocol::{
    ContextMessage, FunctionOutcome, SpellingCorrection, Translation, WeatherReport,
    DEFAULT_TARGET_LANGUAGE,
};

use crate::tools::{execute_tool_call, parse_tool_calls, tool_definitions};
use crate::weather::mock_weather;
use crate::{Assistant, AssistantError, GeneratedImage};

const SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant taking part in a group chat. Keep replies friendly and concise.";

const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(2);

/// Connection settings for the OpenAI API
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API root, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    pub api_key: Option<String>,
    pub chat_model: String,
    pub image_model: String,
    pub image_size: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            chat_model: "gpt-4".to_string(),
            image_model: "dall-e-3".to_string(),
            image_size: "1024x1024".to_string(),
        }
    }
}

pub struct OpenAiAssistant {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiAssistant {
    pub fn new(config: OpenAiConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: OpenAiConfig) -> Self {
        Self { client, config }
    }

    pub fn has_api_key(&self) -> bool {
        self.config
            .api_key
            .as_deref()
            .is_some_and(|key| !key.is_empty())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, AssistantError> {
        match self.post_once(path, body).await {
            Err(e) if e.is_rate_limited() => {
                warn!(
                    component = "openai",
                    event = "openai.rate_limited",
                    path = %path,
                    "Rate limited, retrying once"
                );
                tokio::time::sleep(RATE_LIMIT_BACKOFF).await;
                self.post_once(path, body).await
            }
            result => result,
        }
    }

    async fn post_once(&self, path: &str, body: &Value) -> Result<Value, AssistantError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(AssistantError::MissingApiKey)?;

        let resp = self
            .client
            .post(self.endpoint(path))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AssistantError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(resp.json().await?)
    }

    /// Run a chat completion and return `choices[0].message`.
    async fn chat(&self, messages: Value, tools: Option<Value>) -> Result<Value, AssistantError> {
        let mut body = json!({
            "model": self.config.chat_model,
            "messages": messages,
        });
        if let Some(tools) = tools {
            body["tools"] = tools;
            body["tool_choice"] = json!("auto");
        }

        let mut json = self.post_json("chat/completions", &body).await?;
        match json.pointer_mut("/choices/0/message").map(Value::take) {
            Some(message) if !message.is_null() => Ok(message),
            _ => Err(AssistantError::EmptyResponse),
        }
    }

    async fn chat_text(&self, messages: Value) -> Result<String, AssistantError> {
        let message = self.chat(messages, None).await?;
        let content = message["content"].as_str().unwrap_or("").trim().to_string();
        if content.is_empty() {
            return Err(AssistantError::EmptyResponse);
        }
        Ok(content)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, AssistantError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AssistantError::ImageDownload(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AssistantError::ImageDownload(format!(
                "{} returned {}",
                url, status
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| AssistantError::ImageDownload(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Assistant for OpenAiAssistant {
    async fn converse(
        &self,
        message: &str,
        context: &[ContextMessage],
    ) -> Result<String, AssistantError> {
        let mut messages = vec![json!({ "role": "system", "content": SYSTEM_PROMPT })];
        for turn in context {
            messages.push(serde_json::to_value(turn)?);
        }
        messages.push(json!({ "role": "user", "content": message }));

        debug!(
            component = "openai",
            event = "openai.converse",
            context_len = context.len(),
            "Requesting chat reply"
        );
        self.chat_text(Value::Array(messages)).await
    }

    async fn route_and_execute(
        &self,
        message: &str,
        target_language: Option<&str>,
    ) -> Result<FunctionOutcome, AssistantError> {
        let default_language = target_language
            .map(str::trim)
            .filter(|lang| !lang.is_empty())
            .unwrap_or(DEFAULT_TARGET_LANGUAGE);

        let mut messages = Vec::new();
        if target_language.is_some() {
            messages.push(json!({
                "role": "system",
                "content": format!("When translating, use {default_language} unless the user names another language."),
            }));
        }
        messages.push(json!({ "role": "user", "content": message }));

        let reply = self
            .chat(Value::Array(messages), Some(tool_definitions()))
            .await?;
        let content = reply["content"].as_str().map(str::to_string);
        let calls = parse_tool_calls(&reply);

        if calls.is_empty() {
            return Ok(FunctionOutcome::Text { content });
        }

        info!(
            component = "openai",
            event = "openai.tool_calls",
            count = calls.len(),
            tools = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "Model requested tool calls"
        );

        let mut results = Vec::with_capacity(calls.len());
        for call in &calls {
            results.push(execute_tool_call(self, call, default_language).await);
        }

        Ok(FunctionOutcome::FunctionCall { content, results })
    }

    async fn generate_image(&self, prompt: &str) -> Result<GeneratedImage, AssistantError> {
        let body = json!({
            "model": self.config.image_model,
            "prompt": prompt,
            "n": 1,
            "size": self.config.image_size,
        });
        let json = self.post_json("images/generations", &body).await?;
        let entry = &json["data"][0];

        if let Some(url) = entry["url"].as_str() {
            let bytes = self.download(url).await?;
            return Ok(GeneratedImage {
                prompt: prompt.to_string(),
                source_url: url.to_string(),
                bytes,
            });
        }

        // Some deployments answer with inline base64 instead of a URL
        if let Some(data) = entry["b64_json"].as_str() {
            let bytes = STANDARD
                .decode(data)
                .map_err(|e| AssistantError::ImageDownload(format!("base64 decode: {e}")))?;
            return Ok(GeneratedImage {
                prompt: prompt.to_string(),
                source_url: String::new(),
                bytes,
            });
        }

        Err(AssistantError::EmptyResponse)
    }

    async fn correct_spelling(&self, text: &str) -> Result<SpellingCorrection, AssistantError> {
        let prompt = format!(
            "Correct the spelling of the following sentence. Reply with JSON only.\n\n\
             Sentence: \"{text}\"\n\n\
             Format:\n\
             {{\"original\": \"original sentence\", \"corrected\": \"corrected sentence\", \
             \"corrections\": [{{\"wrong\": \"\", \"correct\": \"\", \"position\": \"\"}}]}}"
        );
        let reply = self
            .chat_text(json!([{ "role": "user", "content": prompt }]))
            .await?;

        match serde_json::from_str::<SpellingCorrection>(strip_code_fence(&reply)) {
            Ok(correction) => Ok(correction),
            Err(e) => {
                debug!(
                    component = "openai",
                    event = "openai.spelling.unstructured",
                    error = %e,
                    "Spelling reply was not JSON, using raw text"
                );
                Ok(SpellingCorrection {
                    original: text.to_string(),
                    corrected: reply,
                    corrections: Vec::new(),
                })
            }
        }
    }

    async fn translate(
        &self,
        text: &str,
        target_language: &str,
    ) -> Result<Translation, AssistantError> {
        let prompt = format!(
            "Translate the following text into {target_language}:\n\n{text}\n\nOutput only the translation."
        );
        let translated = self
            .chat_text(json!([{ "role": "user", "content": prompt }]))
            .await?;

        Ok(Translation {
            original: text.to_string(),
            translated,
            target_language: target_language.to_string(),
        })
    }

    async fn weather(&self, location: &str) -> Result<WeatherReport, AssistantError> {
        Ok(mock_weather(location))
    }
}

/// Models like to wrap JSON answers in ```json fences.
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
