//! Connection registry
//!
//! Maps a display name to the outbound channel of its live connection.
//! One instance per server process, shared by every connection task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use chatrelay_protocol::MessageRecord;

/// Frames queued for one client's socket writer
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// Broadcast record, serialized by the writer
    Record(Arc<MessageRecord>),
    /// Raw pong response
    Pong(Bytes),
}

pub type OutboundSender = mpsc::Sender<OutboundMessage>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("identity must not be empty")]
    EmptyIdentity,
}

struct ConnectionEntry {
    connection_id: u64,
    tx: OutboundSender,
}

/// A live connection as seen at snapshot time
#[derive(Clone)]
pub struct Recipient {
    pub identity: String,
    pub connection_id: u64,
    pub tx: OutboundSender,
}

pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, ConnectionEntry>>,
    next_connection_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Allocate an id for a new connection. Ids are never reused.
    pub fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ConnectionEntry>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace the entry for `identity`.
    ///
    /// A previous connection under the same name is evicted silently; its
    /// channel is not closed and it simply stops receiving broadcasts.
    pub fn register(
        &self,
        identity: &str,
        connection_id: u64,
        tx: OutboundSender,
    ) -> Result<(), RegistryError> {
        if identity.trim().is_empty() {
            return Err(RegistryError::EmptyIdentity);
        }

        let (evicted, total) = {
            let mut connections = self.lock();
            let evicted = connections
                .insert(identity.to_string(), ConnectionEntry { connection_id, tx })
                .map(|entry| entry.connection_id);
            (evicted, connections.len())
        };

        info!(
            component = "registry",
            event = "registry.registered",
            nickname = %identity,
            connection_id = connection_id,
            evicted_connection_id = ?evicted,
            total = total,
            "Connection registered"
        );
        Ok(())
    }

    /// Remove the entry for `identity` if present, whichever connection owns it.
    ///
    /// Connection teardown goes through [`unregister_connection`] so a stale
    /// connection cannot drop its replacement; this is for callers that own
    /// the name outright.
    ///
    /// [`unregister_connection`]: ConnectionRegistry::unregister_connection
    #[allow(dead_code)]
    pub fn unregister(&self, identity: &str) {
        let (removed, total) = {
            let mut connections = self.lock();
            let removed = connections.remove(identity).is_some();
            (removed, connections.len())
        };

        if removed {
            info!(
                component = "registry",
                event = "registry.unregistered",
                nickname = %identity,
                total = total,
                "Connection unregistered"
            );
        }
    }

    /// Remove `identity` only while it is still bound to `connection_id`.
    ///
    /// A connection that was evicted by a newer one under the same name must
    /// not tear down its replacement on the way out.
    pub fn unregister_connection(&self, identity: &str, connection_id: u64) -> bool {
        let (removed, total) = {
            let mut connections = self.lock();
            let owned = connections
                .get(identity)
                .is_some_and(|entry| entry.connection_id == connection_id);
            if owned {
                connections.remove(identity);
            }
            (owned, connections.len())
        };

        if removed {
            info!(
                component = "registry",
                event = "registry.unregistered",
                nickname = %identity,
                connection_id = connection_id,
                total = total,
                "Connection unregistered"
            );
        }
        removed
    }

    /// Point-in-time copy of the live connections.
    pub fn snapshot(&self) -> Vec<Recipient> {
        self.lock()
            .iter()
            .map(|(identity, entry)| Recipient {
                identity: identity.clone(),
                connection_id: entry.connection_id,
                tx: entry.tx.clone(),
            })
            .collect()
    }

    #[cfg(test)]
    pub fn contains(&self, identity: &str) -> bool {
        self.lock().contains_key(identity)
    }

    /// Connection id currently bound to `identity`
    #[cfg(test)]
    pub fn connection_id(&self, identity: &str) -> Option<u64> {
        self.lock().get(identity).map(|entry| entry.connection_id)
    }

    pub fn connection_count(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (OutboundSender, mpsc::Receiver<OutboundMessage>) {
        mpsc::channel(8)
    }

    #[test]
    fn register_and_unregister() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        registry.register("alice", 1, tx).unwrap();
        assert!(registry.contains("alice"));
        assert_eq!(registry.connection_count(), 1);

        registry.unregister("alice");
        assert!(registry.is_empty());

        // Idempotent
        registry.unregister("alice");
        registry.unregister("nobody");
        assert!(registry.is_empty());
    }

    #[test]
    fn empty_identity_is_rejected() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        assert_eq!(
            registry.register("  ", 1, tx),
            Err(RegistryError::EmptyIdentity)
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn last_registration_wins() {
        let registry = ConnectionRegistry::new();
        let (first_tx, _first_rx) = channel();
        let (second_tx, _second_rx) = channel();
        registry.register("bob", 1, first_tx).unwrap();
        registry.register("bob", 2, second_tx.clone()).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].connection_id, 2);
        assert!(snapshot[0].tx.same_channel(&second_tx));
    }

    #[test]
    fn evicted_connection_cannot_remove_its_replacement() {
        let registry = ConnectionRegistry::new();
        let (first_tx, _first_rx) = channel();
        let (second_tx, _second_rx) = channel();
        registry.register("bob", 1, first_tx).unwrap();
        registry.register("bob", 2, second_tx).unwrap();

        assert!(!registry.unregister_connection("bob", 1));
        assert_eq!(registry.connection_id("bob"), Some(2));

        assert!(registry.unregister_connection("bob", 2));
        assert!(!registry.contains("bob"));
    }

    #[test]
    fn connection_ids_are_unique() {
        let registry = ConnectionRegistry::new();
        let a = registry.next_connection_id();
        let b = registry.next_connection_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn concurrent_mutation_keeps_registry_consistent() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut tasks = Vec::new();
        for i in 0..32u64 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let (tx, _rx) = mpsc::channel(1);
                let name = format!("user-{}", i % 8);
                registry.register(&name, i, tx).unwrap();
                let _ = registry.snapshot();
                if i % 2 == 0 {
                    registry.unregister_connection(&name, i);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let snapshot = registry.snapshot();
        assert!(snapshot.len() <= 8);
        for recipient in snapshot {
            assert_eq!(
                registry.connection_id(&recipient.identity),
                Some(recipient.connection_id)
            );
        }
    }
}
