//! HTTP endpoints
//!
//! Pass-through access to the assistant plus history replay. These bypass
//! the chat log: nothing here is persisted or broadcast.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use chatrelay_connectors::AssistantError;
use chatrelay_protocol::{
    ImagePayload, MessageRecord, SpellingCorrection, TextRequest, TranslateRequest, Translation,
    WeatherReport, WeatherRequest, DEFAULT_TARGET_LANGUAGE,
};

use crate::persistence::StoreError;
use crate::state::AppState;
use crate::websocket::ws_handler;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Assistant(#[from] AssistantError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Assistant(_) => StatusCode::BAD_GATEWAY,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(
                component = "http",
                event = "http.request.failed",
                status = status.as_u16(),
                error = %self,
                "Request failed"
            );
        } else {
            debug!(
                component = "http",
                event = "http.request.rejected",
                error = %self,
                "Request rejected"
            );
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Every route the server exposes, WebSocket included.
pub fn router(state: Arc<AppState>, cors: CorsLayer) -> Router {
    Router::new()
        .route("/ws/{nickname}", get(ws_handler))
        .route("/messages", get(list_messages))
        .route("/spellcheck", post(spellcheck))
        .route("/translate", post(translate))
        .route("/weather", post(weather))
        .route("/generate-image", post(generate_image))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn require(value: &str, field: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<MessageRecord>>, ApiError> {
    Ok(Json(state.store.all().await?))
}

async fn spellcheck(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TextRequest>,
) -> Result<Json<SpellingCorrection>, ApiError> {
    require(&req.text, "text")?;
    Ok(Json(state.assistant.correct_spelling(&req.text).await?))
}

async fn translate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TranslateRequest>,
) -> Result<Json<Translation>, ApiError> {
    require(&req.text, "text")?;
    let target = req
        .target_language
        .as_deref()
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .unwrap_or(DEFAULT_TARGET_LANGUAGE);
    Ok(Json(state.assistant.translate(&req.text, target).await?))
}

async fn weather(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WeatherRequest>,
) -> Result<Json<WeatherReport>, ApiError> {
    require(&req.location, "location")?;
    Ok(Json(state.assistant.weather(&req.location).await?))
}

async fn generate_image(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TextRequest>,
) -> Result<Json<ImagePayload>, ApiError> {
    require(&req.text, "text")?;
    let image = state.assistant.generate_image(&req.text).await?;
    Ok(Json(image.to_payload()))
}
