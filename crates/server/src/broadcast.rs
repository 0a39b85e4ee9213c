//! Fan-out of stored records to every live connection.
//!
//! Fire-and-forget: one non-blocking attempt per recipient, no
//! acknowledgement. A recipient whose queue is full or closed is reaped from
//! the registry before `broadcast` returns; it never holds up the others.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use chatrelay_protocol::MessageRecord;

use crate::registry::{ConnectionRegistry, OutboundMessage};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub async fn broadcast(&self, record: &MessageRecord) -> BroadcastReport {
        let recipients = self.registry.snapshot();
        if recipients.is_empty() {
            debug!(
                component = "broadcast",
                event = "broadcast.no_recipients",
                record_id = %record.id,
                "No active connections, nothing to deliver"
            );
            return BroadcastReport::default();
        }

        let payload = Arc::new(record.clone());
        let mut report = BroadcastReport::default();
        let mut dead = Vec::new();

        for recipient in recipients {
            let msg = OutboundMessage::Record(Arc::clone(&payload));
            let reason = match recipient.tx.try_send(msg) {
                Ok(()) => {
                    report.delivered += 1;
                    continue;
                }
                Err(TrySendError::Full(_)) => "queue_full",
                Err(TrySendError::Closed(_)) => "closed",
            };
            warn!(
                component = "broadcast",
                event = "broadcast.send_failed",
                record_id = %record.id,
                nickname = %recipient.identity,
                connection_id = recipient.connection_id,
                reason = reason,
                "Send failed, dropping connection"
            );
            dead.push(recipient);
        }

        for recipient in &dead {
            self.registry
                .unregister_connection(&recipient.identity, recipient.connection_id);
        }
        report.failed = dead.len();

        debug!(
            component = "broadcast",
            event = "broadcast.sent",
            record_id = %record.id,
            kind = record.kind.as_str(),
            delivered = report.delivered,
            failed = report.failed,
            "Record broadcast"
        );
        report
    }
}
