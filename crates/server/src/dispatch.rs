//! Envelope dispatch
//!
//! Turns one inbound envelope into exactly one stored record and fans it out.
//! Assistant failures become ordinary `error` records. Nothing in here
//! returns an error to the receive loop.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use chatrelay_connectors::Assistant;
use chatrelay_protocol::{
    ChatRole, ClientEnvelope, ContextMessage, EnvelopeKind, MessageRecord, NewRecord,
};

use crate::broadcast::Broadcaster;
use crate::persistence::{chrono_now, MessageStore};

/// Records of history handed to the assistant with each `ai_chat` request
pub const DEFAULT_CONTEXT_WINDOW: usize = 10;

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn MessageStore>,
    assistant: Arc<dyn Assistant>,
    broadcaster: Broadcaster,
    context_window: usize,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn MessageStore>,
        assistant: Arc<dyn Assistant>,
        broadcaster: Broadcaster,
        context_window: usize,
    ) -> Self {
        Self {
            store,
            assistant,
            broadcaster,
            context_window,
        }
    }

    /// Handle one raw text frame from `identity`'s connection.
    ///
    /// Frames that do not parse are dropped without telling anyone.
    pub async fn handle_frame(&self, identity: &str, raw: &str) -> Option<MessageRecord> {
        let envelope: ClientEnvelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(
                    component = "dispatch",
                    event = "dispatch.frame.parse_failed",
                    nickname = %identity,
                    error = %e,
                    payload_bytes = raw.len(),
                    payload_preview = %truncate_for_log(raw, 240),
                    "Discarding malformed frame"
                );
                return None;
            }
        };

        self.dispatch(identity, envelope, chrono_now()).await
    }

    /// Route a parsed envelope stamped with `timestamp`, persist the result
    /// and broadcast it.
    pub async fn dispatch(
        &self,
        identity: &str,
        envelope: ClientEnvelope,
        timestamp: String,
    ) -> Option<MessageRecord> {
        debug!(
            component = "dispatch",
            event = "dispatch.envelope.received",
            nickname = %identity,
            kind = ?envelope.kind,
            "Dispatching envelope"
        );

        let record = match envelope.kind {
            EnvelopeKind::Text => {
                let sender = envelope
                    .claimed_nickname()
                    .unwrap_or(identity)
                    .to_string();
                NewRecord::text(&sender, envelope.message, timestamp)
            }
            EnvelopeKind::AiChat => self.ai_chat(identity, &envelope.message, timestamp).await,
            EnvelopeKind::FunctionCall => self.function_call(identity, &envelope, timestamp).await,
            EnvelopeKind::ImageGeneration => {
                self.image_generation(identity, &envelope.message, timestamp)
                    .await
            }
            EnvelopeKind::Unknown => {
                debug!(
                    component = "dispatch",
                    event = "dispatch.envelope.unknown_kind",
                    nickname = %identity,
                    "Ignoring envelope of unknown kind"
                );
                return None;
            }
        };

        self.publish(record).await
    }

    /// Persist `bob left`-style notice and tell everyone still connected.
    pub async fn announce_departure(&self, identity: &str) -> Option<MessageRecord> {
        self.publish(NewRecord::departure(identity, chrono_now()))
            .await
    }

    /// The most recent records, oldest first, as assistant context.
    ///
    /// A failed read degrades to no context rather than failing the reply.
    pub async fn build_context(&self) -> Vec<ContextMessage> {
        match self.store.recent(self.context_window).await {
            Ok(records) => records
                .into_iter()
                .rev()
                .map(|record| ContextMessage {
                    role: ChatRole::for_record(record.kind),
                    content: record.body,
                })
                .collect(),
            Err(e) => {
                warn!(
                    component = "dispatch",
                    event = "dispatch.context.load_failed",
                    error = %e,
                    "Failed to load conversation context"
                );
                Vec::new()
            }
        }
    }

    async fn ai_chat(&self, identity: &str, message: &str, timestamp: String) -> NewRecord {
        let context = self.build_context().await;
        info!(
            component = "dispatch",
            event = "dispatch.ai_chat.requested",
            nickname = %identity,
            context_len = context.len(),
            "AI chat requested"
        );

        match self.assistant.converse(message, &context).await {
            Ok(reply) => NewRecord::assistant_reply(reply, timestamp),
            Err(e) => {
                warn!(
                    component = "dispatch",
                    event = "dispatch.ai_chat.failed",
                    nickname = %identity,
                    error = %e,
                    "AI chat failed"
                );
                NewRecord::failure("AI reply failed", e.to_string(), timestamp)
            }
        }
    }

    async fn function_call(
        &self,
        identity: &str,
        envelope: &ClientEnvelope,
        timestamp: String,
    ) -> NewRecord {
        let outcome = self
            .assistant
            .route_and_execute(&envelope.message, envelope.target_language.as_deref())
            .await;

        let result = outcome.and_then(|outcome| Ok(serde_json::to_string(&outcome)?));
        match result {
            Ok(body) => NewRecord::function_result(body, timestamp),
            Err(e) => {
                warn!(
                    component = "dispatch",
                    event = "dispatch.function_call.failed",
                    nickname = %identity,
                    error = %e,
                    "Function call failed"
                );
                NewRecord::failure("Function call failed", e.to_string(), timestamp)
            }
        }
    }

    async fn image_generation(&self, identity: &str, prompt: &str, timestamp: String) -> NewRecord {
        match self.assistant.generate_image(prompt).await {
            Ok(image) => NewRecord::image(prompt, image.to_base64(), timestamp),
            Err(e) => {
                warn!(
                    component = "dispatch",
                    event = "dispatch.image.failed",
                    nickname = %identity,
                    error = %e,
                    "Image generation failed"
                );
                NewRecord::failure("Image generation failed", e.to_string(), timestamp)
            }
        }
    }

    /// Persist, then broadcast the stored record. Nothing unpersisted is
    /// ever broadcast.
    async fn publish(&self, record: NewRecord) -> Option<MessageRecord> {
        let kind = record.kind;
        match self.store.append(record).await {
            Ok(stored) => {
                let report = self.broadcaster.broadcast(&stored).await;
                if report.failed > 0 {
                    debug!(
                        component = "dispatch",
                        event = "dispatch.broadcast.partial",
                        record_id = %stored.id,
                        delivered = report.delivered,
                        failed = report.failed,
                        "Some recipients were dropped"
                    );
                }
                Some(stored)
            }
            Err(e) => {
                error!(
                    component = "dispatch",
                    event = "dispatch.persist_failed",
                    kind = kind.as_str(),
                    error = %e,
                    "Failed to persist record, not broadcasting"
                );
                None
            }
        }
    }
}

fn truncate_for_log(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
