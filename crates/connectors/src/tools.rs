//! Tool table offered to the model for function routing, and the glue that
//! runs a model-chosen tool call against an [`Assistant`].

use serde_json::{json, Value};
use tracing::warn;

use chatrelay_protocol::FunctionResult;

use crate::{Assistant, AssistantError};

pub const GET_WEATHER: &str = "get_weather";
pub const CORRECT_SPELLING: &str = "correct_spelling";
pub const TRANSLATE_TEXT: &str = "translate_text";
pub const GENERATE_IMAGE: &str = "generate_image";

/// Tool definitions in chat-completions `tools` format.
pub fn tool_definitions() -> Value {
    json!([
        {
            "type": "function",
            "function": {
                "name": GET_WEATHER,
                "description": "Get the current weather for a location",
                "parameters": {
                    "type": "object",
                    "properties": { "location": { "type": "string" } },
                    "required": ["location"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": CORRECT_SPELLING,
                "description": "Correct the spelling of a piece of text",
                "parameters": {
                    "type": "object",
                    "properties": { "text": { "type": "string" } },
                    "required": ["text"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": TRANSLATE_TEXT,
                "description": "Translate text into another language",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "text": { "type": "string" },
                        "target_language": { "type": "string" }
                    },
                    "required": ["text"]
                }
            }
        },
        {
            "type": "function",
            "function": {
                "name": GENERATE_IMAGE,
                "description": "Generate an image from a prompt",
                "parameters": {
                    "type": "object",
                    "properties": { "prompt": { "type": "string" } },
                    "required": ["prompt"]
                }
            }
        }
    ])
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments, exactly as the model produced them
    pub arguments: String,
}

/// Extract tool calls from a chat-completions `message` object.
pub fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
    let Some(calls) = message["tool_calls"].as_array() else {
        return Vec::new();
    };

    calls
        .iter()
        .filter_map(|call| {
            let function = &call["function"];
            Some(ToolCall {
                id: call["id"].as_str().unwrap_or_default().to_string(),
                name: function["name"].as_str()?.to_string(),
                arguments: function["arguments"].as_str().unwrap_or("{}").to_string(),
            })
        })
        .collect()
}

/// Run one tool call. Failures become `{"error": ...}` results so the
/// remaining calls still execute.
pub async fn execute_tool_call<A: Assistant + ?Sized>(
    assistant: &A,
    call: &ToolCall,
    default_language: &str,
) -> FunctionResult {
    let result = match run_tool(assistant, call, default_language).await {
        Ok(value) => value,
        Err(e) => {
            warn!(
                component = "tools",
                event = "tool.failed",
                tool = %call.name,
                error = %e,
                "Tool call failed"
            );
            json!({ "error": e.to_string() })
        }
    };

    FunctionResult {
        function: call.name.clone(),
        result,
    }
}

async fn run_tool<A: Assistant + ?Sized>(
    assistant: &A,
    call: &ToolCall,
    default_language: &str,
) -> Result<Value, AssistantError> {
    let args: Value =
        serde_json::from_str(&call.arguments).map_err(|e| AssistantError::ToolArguments {
            name: call.name.clone(),
            reason: e.to_string(),
        })?;

    let value = match call.name.as_str() {
        GET_WEATHER => {
            let location = required_str(&args, "location", &call.name)?;
            serde_json::to_value(assistant.weather(location).await?)?
        }
        CORRECT_SPELLING => {
            let text = required_str(&args, "text", &call.name)?;
            serde_json::to_value(assistant.correct_spelling(text).await?)?
        }
        TRANSLATE_TEXT => {
            let text = required_str(&args, "text", &call.name)?;
            let language = args["target_language"]
                .as_str()
                .filter(|lang| !lang.trim().is_empty())
                .unwrap_or(default_language);
            serde_json::to_value(assistant.translate(text, language).await?)?
        }
        GENERATE_IMAGE => {
            let prompt = required_str(&args, "prompt", &call.name)?;
            serde_json::to_value(assistant.generate_image(prompt).await?.to_payload())?
        }
        other => json!({ "error": format!("unknown function: {other}") }),
    };

    Ok(value)
}

fn required_str<'a>(args: &'a Value, key: &str, tool: &str) -> Result<&'a str, AssistantError> {
    args[key]
        .as_str()
        .ok_or_else(|| AssistantError::ToolArguments {
            name: tool.to_string(),
            reason: format!("missing string field `{key}`"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weather::mock_weather;
    use crate::GeneratedImage;
    use async_trait::async_trait;
    use chatrelay_protocol::{
        ContextMessage, FunctionOutcome, SpellingCorrection, Translation, WeatherReport,
    };

    /// Answers every tool locally; image generation always fails.
    struct LocalAssistant;

    #[async_trait]
    impl Assistant for LocalAssistant {
        async fn converse(
            &self,
            message: &str,
            _context: &[ContextMessage],
        ) -> Result<String, AssistantError> {
            Ok(message.to_string())
        }

        async fn route_and_execute(
            &self,
            _message: &str,
            _target_language: Option<&str>,
        ) -> Result<FunctionOutcome, AssistantError> {
            Ok(FunctionOutcome::Text { content: None })
        }

        async fn generate_image(&self, _prompt: &str) -> Result<GeneratedImage, AssistantError> {
            Err(AssistantError::EmptyResponse)
        }

        async fn correct_spelling(
            &self,
            text: &str,
        ) -> Result<SpellingCorrection, AssistantError> {
            Ok(SpellingCorrection {
                original: text.to_string(),
                corrected: text.replace("teh", "the"),
                corrections: Vec::new(),
            })
        }

        async fn translate(
            &self,
            text: &str,
            target_language: &str,
        ) -> Result<Translation, AssistantError> {
            Ok(Translation {
                original: text.to_string(),
                translated: format!("[{target_language}] {text}"),
                target_language: target_language.to_string(),
            })
        }

        async fn weather(&self, location: &str) -> Result<WeatherReport, AssistantError> {
            Ok(mock_weather(location))
        }
    }

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    #[test]
    fn offers_all_four_tools() {
        let names: Vec<String> = tool_definitions()
            .as_array()
            .unwrap()
            .iter()
            .map(|tool| tool["function"]["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            [GET_WEATHER, CORRECT_SPELLING, TRANSLATE_TEXT, GENERATE_IMAGE]
        );
    }

    #[test]
    fn parses_tool_calls_from_message() {
        let message = json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [
                {
                    "id": "call_a",
                    "type": "function",
                    "function": { "name": "get_weather", "arguments": "{\"location\":\"Busan\"}" }
                },
                { "id": "call_b", "type": "function", "function": {} }
            ]
        });
        let calls = parse_tool_calls(&message);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].name, GET_WEATHER);

        assert!(parse_tool_calls(&json!({"content": "hi"})).is_empty());
    }

    #[tokio::test]
    async fn translate_falls_back_to_default_language() {
        let result = execute_tool_call(
            &LocalAssistant,
            &call(TRANSLATE_TEXT, r#"{"text":"안녕"}"#),
            "English",
        )
        .await;
        assert_eq!(result.function, TRANSLATE_TEXT);
        assert_eq!(result.result["target_language"], "English");
        assert_eq!(result.result["translated"], "[English] 안녕");
    }

    #[tokio::test]
    async fn weather_tool_returns_report() {
        let result = execute_tool_call(
            &LocalAssistant,
            &call(GET_WEATHER, r#"{"location":"Seoul"}"#),
            "English",
        )
        .await;
        assert_eq!(result.result["location"], "Seoul");
    }

    #[tokio::test]
    async fn failures_become_error_results() {
        let unknown = execute_tool_call(&LocalAssistant, &call("launch_rocket", "{}"), "English").await;
        assert_eq!(unknown.result["error"], "unknown function: launch_rocket");

        let bad_args =
            execute_tool_call(&LocalAssistant, &call(GET_WEATHER, "not json"), "English").await;
        assert!(bad_args.result["error"]
            .as_str()
            .unwrap()
            .contains("Invalid arguments for get_weather"));

        let missing =
            execute_tool_call(&LocalAssistant, &call(CORRECT_SPELLING, "{}"), "English").await;
        assert!(missing.result["error"].as_str().unwrap().contains("`text`"));

        let image = execute_tool_call(
            &LocalAssistant,
            &call(GENERATE_IMAGE, r#"{"prompt":"cat"}"#),
            "English",
        )
        .await;
        assert_eq!(image.result["error"], "Empty response from OpenAI API");
    }
}
