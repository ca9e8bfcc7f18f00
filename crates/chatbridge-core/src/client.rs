//! Multi-room chat client.
//!
//! Owns the session and one [`Channel`] per room, merges every channel's
//! events into a single broadcast stream and turns a channel giving up into a
//! full relogin.

use crate::channel::{Channel, ChannelConfig, ChannelFailure, FailureCause};
use crate::parser::ParserOptions;
use crate::session::Session;
use crate::transport::{ChatTransport, Credentials, OutgoingMessage};
use crate::{ChatError, Result};
use chatbridge_types::{ChatEvent, RoomId, RoomStatus, UserProfile};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info, warn};

/// Merged event stream of all rooms.
pub type EventStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

/// Client-wide settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub channel: ChannelConfig,
    pub parser: ParserOptions,
    /// Capacity of the merged event bus. Slow subscribers past this lag.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            parser: ParserOptions::default(),
            event_capacity: 1024,
        }
    }
}

/// Handle to the chat client. Cheap to clone.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    session: Arc<Session>,
    config: ClientConfig,
    channels: DashMap<RoomId, Channel>,
    events: broadcast::Sender<ChatEvent>,
    failures: mpsc::UnboundedSender<ChannelFailure>,
    relogin_lock: Mutex<()>,
}

impl ChatClient {
    /// Create a client. Must be called from within a Tokio runtime: the
    /// channel failure watcher is spawned here.
    pub fn new(
        credentials: Credentials,
        transport: Arc<dyn ChatTransport>,
        config: ClientConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (failures, failures_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ClientInner {
            session: Arc::new(Session::new(credentials, transport)),
            config,
            channels: DashMap::new(),
            events,
            failures,
            relogin_lock: Mutex::new(()),
        });

        tokio::spawn(watch_failures(Arc::downgrade(&inner), failures_rx));

        Self { inner }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    pub async fn profile(&self) -> Option<UserProfile> {
        self.inner.session.profile().await
    }

    /// Log in and join every room concurrently. Only a failed login is an
    /// error; rooms that fail to join are logged and retried with backoff.
    pub async fn init<I>(&self, rooms: I) -> Result<()>
    where
        I: IntoIterator<Item = RoomId>,
    {
        self.inner.session.login().await?;

        let channels: Vec<Channel> = rooms
            .into_iter()
            .map(|room| self.ensure_channel(room))
            .collect();
        self.join_channels(&channels).await;
        Ok(())
    }

    /// Subscribe to the merged event bus.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.events.subscribe()
    }

    /// Merged events as a stream. Events missed by a lagging subscriber are
    /// skipped.
    pub fn event_stream(&self) -> EventStream {
        Box::pin(
            BroadcastStream::new(self.subscribe())
                .filter_map(|event| futures::future::ready(event.ok())),
        )
    }

    /// Post a message into a room. Unknown rooms are ignored.
    pub async fn send(&self, room: &RoomId, text: &str, target: Option<&str>, private: bool) {
        let Some(channel) = self.channel(room) else {
            debug!(target: "chatbridge::client", "Ignoring message to unknown room {}", room);
            return;
        };

        let message = match target {
            Some(target) => OutgoingMessage::to(text, target, private),
            None => OutgoingMessage::public(text),
        };
        channel.send(message).await;
    }

    /// Known rooms, sorted.
    pub fn list_rooms(&self) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self.inner.channels.iter().map(|e| e.key().clone()).collect();
        rooms.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        rooms
    }

    pub fn room_status(&self, room: &RoomId) -> Option<RoomStatus> {
        self.channel(room).map(|c| c.status())
    }

    /// Status of every room, sorted by room id.
    pub fn statuses(&self) -> Vec<RoomStatus> {
        self.list_rooms()
            .iter()
            .filter_map(|room| self.room_status(room))
            .collect()
    }

    /// Join one room, adding it if it is new. Rejoins if already joined.
    /// A failed join is returned and also retried with backoff.
    pub async fn join(&self, room: RoomId) -> Result<()> {
        if !self.inner.session.is_authenticated().await {
            return Err(ChatError::join(&room, ChatError::NotAuthenticated));
        }
        self.ensure_channel(room).join_with_retry().await
    }

    /// Leave one room and forget it.
    pub async fn leave(&self, room: &RoomId) -> Result<()> {
        let (_, channel) = self
            .inner
            .channels
            .remove(room)
            .ok_or_else(|| ChatError::RoomNotFound(room.clone()))?;
        channel.leave().await;
        Ok(())
    }

    /// Leave every room. The rooms stay known so a relogin rejoins them.
    pub async fn leave_all(&self) {
        let channels = self.snapshot();
        join_all(channels.iter().map(|c| c.leave())).await;
        info!(target: "chatbridge::client", "Left {} rooms", channels.len());
    }

    /// Fresh login, then rejoin every known room.
    pub async fn relogin(&self) -> Result<()> {
        let _guard = self.inner.relogin_lock.lock().await;
        info!(target: "chatbridge::client", "Relogging in");

        if let Err(e) = self.inner.session.relogin().await {
            error!(target: "chatbridge::client", "Relogin failed: {}", e);
            return Err(e);
        }

        let channels = self.snapshot();
        self.join_channels(&channels).await;
        Ok(())
    }

    /// Leave all rooms, then log out.
    pub async fn shutdown(&self) {
        self.leave_all().await;
        self.inner.session.logout().await;
        info!(target: "chatbridge::client", "Chat client shut down");
    }

    fn channel(&self, room: &RoomId) -> Option<Channel> {
        self.inner.channels.get(room).map(|c| c.value().clone())
    }

    fn snapshot(&self) -> Vec<Channel> {
        self.inner.channels.iter().map(|e| e.value().clone()).collect()
    }

    async fn join_channels(&self, channels: &[Channel]) {
        let results = join_all(channels.iter().map(|c| c.join_with_retry())).await;
        for (channel, result) in channels.iter().zip(results) {
            if let Err(e) = result {
                warn!(
                    target: "chatbridge::client",
                    "Could not join room {}, retrying: {}", channel.room_id(), e
                );
            }
        }
    }

    /// Existing channel for `room`, or a new one wired into the event bus.
    fn ensure_channel(&self, room: RoomId) -> Channel {
        match self.inner.channels.entry(room) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let (channel, mut events_rx) = Channel::new(
                    entry.key().clone(),
                    self.inner.session.clone(),
                    self.inner.config.channel.clone(),
                    self.inner.config.parser,
                    self.inner.failures.clone(),
                );

                // Ends once the channel and its tasks are gone.
                let bus = self.inner.events.clone();
                tokio::spawn(async move {
                    while let Some(event) = events_rx.recv().await {
                        let _ = bus.send(event);
                    }
                });

                entry.insert(channel.clone());
                channel
            }
        }
    }
}

/// Relogin whenever an established stream is lost for good. Failures queued
/// while a relogin is running are folded into it. A room that cannot be
/// joined even after its retries is left closed; relogging in again would
/// only repeat the same failure.
async fn watch_failures(inner: Weak<ClientInner>, mut failures: mpsc::UnboundedReceiver<ChannelFailure>) {
    while let Some(first) = failures.recv().await {
        let mut batch = vec![first];
        while let Ok(failure) = failures.try_recv() {
            batch.push(failure);
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };

        let mut relogin = false;
        for failure in &batch {
            match failure.cause {
                FailureCause::StreamLost => {
                    warn!(
                        target: "chatbridge::client",
                        "Room {} failed after {} attempts, relogging in",
                        failure.room_id, failure.attempts
                    );
                    relogin = true;
                }
                FailureCause::JoinFailed => {
                    error!(
                        target: "chatbridge::client",
                        "Room {} could not be joined after {} attempts, leaving it closed",
                        failure.room_id, failure.attempts
                    );
                }
            }
        }

        if relogin {
            let client = ChatClient { inner };
            if client.relogin().await.is_ok() {
                while failures.try_recv().is_ok() {}
            }
        }
    }
}
