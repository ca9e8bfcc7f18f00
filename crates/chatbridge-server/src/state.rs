//! Shared application state.

use crate::config::Config;
use chatbridge_core::{ChatClient, ChatTransport, HttpTransport, MessageStore};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub client: ChatClient,
    pub store: Arc<MessageStore>,
    pub config: Config,
}

impl AppState {
    /// Build state around the production HTTP transport.
    pub fn new(config: Config) -> chatbridge_core::Result<Self> {
        let transport = Arc::new(
            HttpTransport::new(config.upstream.clone())?
                .with_request_timeout(config.request_timeout()),
        );
        let store = Arc::new(MessageStore::open(&config.db_path)?);
        Ok(Self::with_parts(config, transport, store))
    }

    /// Build state from an arbitrary transport and store.
    pub fn with_parts(
        config: Config,
        transport: Arc<dyn ChatTransport>,
        store: Arc<MessageStore>,
    ) -> Self {
        let client = ChatClient::new(config.credentials(), transport, config.client_config());
        Self {
            client,
            store,
            config,
        }
    }
}
