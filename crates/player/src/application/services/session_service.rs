//! Session service - composition root for one client.
//!
//! Owns the dispatcher, the connection manager and the session store, and
//! wires the store onto the dispatcher before any connection exists.

use std::sync::Arc;

use crate::application::credentials::CredentialResolver;
use crate::application::services::session_store::SessionStore;
use crate::config::ClientConfig;
use crate::infrastructure::messaging::EventDispatcher;
use crate::infrastructure::websocket::{ConnectionError, ConnectionManager};
use crate::ports::outbound::StorageProvider;

pub struct SessionService {
    connection: ConnectionManager,
    store: SessionStore,
}

impl SessionService {
    pub fn new(config: ClientConfig, storage: Arc<dyn StorageProvider>) -> Self {
        let dispatcher = EventDispatcher::new();
        let credentials = CredentialResolver::new(storage).with_configured_token(config.token);
        let connection = ConnectionManager::new(config.connection, credentials, dispatcher.clone());

        let mut store = SessionStore::new(Arc::new(connection.clone()), config.message_capacity);
        if let Some(name) = config.display_name {
            store = store.with_author(name);
        }
        store.attach(&dispatcher);

        Self { connection, store }
    }

    /// Join `session_id`, clearing local state when it differs from the
    /// current session
    pub async fn open(&self, session_id: &str) -> Result<(), ConnectionError> {
        let current = self.connection.session_id();
        if current.as_deref() != Some(session_id.trim()) {
            self.store.reset();
        }
        self.connection.connect(session_id).await
    }

    pub async fn close(&self) {
        self.connection.disconnect().await;
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        self.connection.dispatcher()
    }
}
