//! Server configuration
//!
//! Every option can come from a flag or its environment variable.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::warn;

use chatrelay_connectors::OpenAiConfig;

use crate::dispatch::DEFAULT_CONTEXT_WINDOW;
use crate::paths::DataPaths;

#[derive(Debug, Clone, Parser)]
#[command(name = "chatrelay", version, about = "Real-time chat relay with an AI assistant")]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "CHATRELAY_BIND", default_value = "0.0.0.0:8000")]
    pub bind: SocketAddr,

    /// Data directory for the database and logs (default: ~/.chatrelay)
    #[arg(long, env = "CHATRELAY_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Origin allowed by CORS
    #[arg(long, env = "FRONTEND_ORIGIN", default_value = "http://localhost:3000")]
    pub frontend_origin: String,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,

    #[arg(long, env = "CHATRELAY_CHAT_MODEL", default_value = "gpt-4")]
    pub chat_model: String,

    #[arg(long, env = "CHATRELAY_IMAGE_MODEL", default_value = "dall-e-3")]
    pub image_model: String,

    /// Number of recent records sent to the assistant as context
    #[arg(long, env = "CHATRELAY_CONTEXT_WINDOW", default_value_t = DEFAULT_CONTEXT_WINDOW)]
    pub context_window: usize,
}

impl ServerConfig {
    pub fn openai_config(&self, api_key: Option<String>) -> OpenAiConfig {
        OpenAiConfig {
            base_url: self.openai_base_url.trim_end_matches('/').to_string(),
            api_key,
            chat_model: self.chat_model.clone(),
            image_model: self.image_model.clone(),
            ..OpenAiConfig::default()
        }
    }
}

/// `OPENAI_API_KEY` first, then the key file in the data dir.
pub fn resolve_api_key(paths: &DataPaths) -> Option<String> {
    if let Some(key) = std::env::var("OPENAI_API_KEY")
        .ok()
        .and_then(|value| non_empty(&value))
    {
        return Some(key);
    }
    read_key_file(paths)
}

fn read_key_file(paths: &DataPaths) -> Option<String> {
    let path = paths.api_key_path();
    match std::fs::read_to_string(&path) {
        Ok(contents) => non_empty(&contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(
                component = "config",
                event = "config.api_key.read_failed",
                path = %path.display(),
                error = %e,
                "Failed to read API key file"
            );
            None
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::try_parse_from(["chatrelay"]).unwrap();
        assert_eq!(config.bind, "0.0.0.0:8000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.context_window, 10);
        assert_eq!(config.chat_model, "gpt-4");
    }

    #[test]
    fn flags_override_defaults() {
        let config = ServerConfig::try_parse_from([
            "chatrelay",
            "--bind",
            "127.0.0.1:9000",
            "--context-window",
            "4",
            "--openai-base-url",
            "http://localhost:8080/v1/",
        ])
        .unwrap();
        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.context_window, 4);
        let openai = config.openai_config(None);
        assert_eq!(openai.base_url, "http://localhost:8080/v1");
        assert!(openai.api_key.is_none());
    }

    #[test]
    fn key_file_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::resolve(Some(dir.path())).unwrap();
        std::fs::write(paths.api_key_path(), "sk-test\n").unwrap();
        assert_eq!(read_key_file(&paths).as_deref(), Some("sk-test"));

        std::fs::write(paths.api_key_path(), "  \n").unwrap();
        assert_eq!(read_key_file(&paths), None);
    }

    #[test]
    fn missing_key_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::resolve(Some(dir.path())).unwrap();
        assert_eq!(read_key_file(&paths), None);
    }
}
