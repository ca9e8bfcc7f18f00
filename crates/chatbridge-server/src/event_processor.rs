//! Background consumer of the chat event bus.
//!
//! Persists every message and logs every event, independent of whether any
//! WebSocket client is connected.

use crate::state::AppState;
use chatbridge_core::MessageStore;
use chatbridge_types::ChatEvent;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct EventProcessor {
    store: Arc<MessageStore>,
}

impl EventProcessor {
    pub fn new(store: Arc<MessageStore>) -> Self {
        Self { store }
    }

    /// Log one event and persist it if it is a message.
    pub fn process_event(&self, event: &ChatEvent) {
        match event {
            ChatEvent::Message {
                sender,
                body,
                target,
                is_private,
                room_id,
                ..
            } => {
                let target = target.as_deref().unwrap_or("*");
                let scope = if *is_private { "private" } else { "public" };
                info!(
                    target: "chatbridge::events",
                    "[{}] {} -> {} ({}): {}",
                    room_id, sender, target, scope, body
                );
            }
            ChatEvent::UserJoined { username, room_id, .. } => {
                debug!(target: "chatbridge::events", "[{}] {} joined", room_id, username);
            }
            ChatEvent::UserLeft { username, room_id, .. } => {
                debug!(target: "chatbridge::events", "[{}] {} left", room_id, username);
            }
            ChatEvent::UserStateChanged {
                username,
                state,
                room_id,
                ..
            } => {
                debug!(
                    target: "chatbridge::events",
                    "[{}] {} changed state to {}",
                    room_id, username, state
                );
            }
        }

        if let Err(e) = self.store.save_message(event) {
            error!(
                target: "chatbridge::events",
                "Failed to persist {} from room {}: {}",
                event.kind(),
                event.room_id(),
                e
            );
        }
    }
}

/// Subscribe to the client's events and process them until the bus closes.
pub fn spawn_event_processor(state: Arc<AppState>) -> JoinHandle<()> {
    let processor = EventProcessor::new(state.store.clone());
    let mut rx = state.client.subscribe();

    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => processor.process_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        target: "chatbridge::events",
                        "Event processor lagged, {} events not persisted", skipped
                    );
                }
                Err(RecvError::Closed) => {
                    debug!(target: "chatbridge::events", "Event bus closed");
                    break;
                }
            }
        }
    })
}
