//! chatrelay protocol
//!
//! Shared types for communication between the chatrelay server and clients.
//! These types are serialized as JSON over WebSocket and the HTTP API.

use uuid::Uuid;

// Re-exports
pub mod client;
pub mod server;
pub mod types;

pub use client::{ClientEnvelope, EnvelopeKind, TextRequest, TranslateRequest, WeatherRequest};
pub use server::{MessageRecord, NewRecord, RecordKind};
pub use types::*;

/// Display name used for every record produced by the AI assistant.
pub const ASSISTANT_SENDER: &str = "AI Assistant";

/// Display name used for server-generated notices (departures).
pub const SYSTEM_SENDER: &str = "System";

/// Language used by translation when the caller does not name one.
pub const DEFAULT_TARGET_LANGUAGE: &str = "English";

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
