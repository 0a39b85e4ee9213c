//! Application state

use std::sync::Arc;

use chatrelay_connectors::Assistant;

use crate::broadcast::Broadcaster;
use crate::dispatch::Dispatcher;
use crate::persistence::MessageStore;
use crate::registry::ConnectionRegistry;

/// Shared application state, one per server process
pub struct AppState {
    /// Live connections by nickname
    pub registry: Arc<ConnectionRegistry>,

    /// The chat log
    pub store: Arc<dyn MessageStore>,

    /// AI collaborator, also used directly by the HTTP endpoints
    pub assistant: Arc<dyn Assistant>,

    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(
        store: Arc<dyn MessageStore>,
        assistant: Arc<dyn Assistant>,
        context_window: usize,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&assistant),
            Broadcaster::new(Arc::clone(&registry)),
            context_window,
        );
        Self {
            registry,
            store,
            assistant,
            dispatcher,
        }
    }
}
