//! Per-room channel: join handshake, stream read loop, keepalive, heartbeat
//! and bounded reconnect.

use crate::decoder::FragmentDecoder;
use crate::parser::{FragmentParser, ParserOptions};
use crate::session::Session;
use crate::transport::{FragmentStream, OutgoingMessage, StreamEndpoints};
use crate::{ChatError, Result};
use chatbridge_types::{ChannelState, ChatEvent, RoomId, RoomStatus};
use futures::StreamExt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Timings of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Period of the empty keepalive message.
    pub keepalive_interval: Duration,
    /// Silence after which the stream is considered dead.
    pub heartbeat_timeout: Duration,
    /// Delay unit between reconnect attempts (attempt n waits base * n).
    pub reconnect_base_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(15),
            reconnect_base_delay: Duration::from_secs(5),
            max_reconnect_attempts: 5,
        }
    }
}

/// What the channel was recovering from when it gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// An established stream died and could not be reopened.
    StreamLost,
    /// The join itself failed and the retries after it did too.
    JoinFailed,
}

/// Raised once when a channel gives up reconnecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFailure {
    pub room_id: RoomId,
    pub attempts: u32,
    pub cause: FailureCause,
}

/// Handle to one room channel. Cheap to clone.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    room_id: RoomId,
    session: Arc<Session>,
    config: ChannelConfig,
    parser: FragmentParser,
    events: mpsc::UnboundedSender<ChatEvent>,
    failures: mpsc::UnboundedSender<ChannelFailure>,
    state: watch::Sender<ChannelState>,
    endpoints: RwLock<Option<StreamEndpoints>>,
    /// The live connection; held for the whole of join and leave.
    connection: Mutex<Option<Connection>>,
    stats: ChannelStats,
}

#[derive(Default)]
struct ChannelStats {
    fragments_received: AtomicU64,
    events_emitted: AtomicU64,
    fragments_discarded: AtomicU64,
    reconnects: AtomicU64,
    reconnect_attempt: AtomicU32,
}

/// Tasks of one connection. Cancelling the token stops the read loop,
/// the heartbeat and the keepalive together.
struct Connection {
    cancel: CancellationToken,
    supervisor: JoinHandle<()>,
    keepalive: JoinHandle<()>,
}

impl Connection {
    /// Start the keepalive next to `supervisor`.
    fn start<F>(inner: &Arc<ChannelInner>, supervisor: F, cancel: CancellationToken) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self {
            keepalive: tokio::spawn(inner.clone().keepalive(cancel.clone())),
            supervisor: tokio::spawn(supervisor),
            cancel,
        }
    }

    /// Cancel both tasks and wait until they are gone, so no send is still
    /// in flight when this returns.
    async fn shutdown(self) {
        self.cancel.cancel();
        for task in [self.supervisor, self.keepalive] {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(target: "chatbridge::channel", "Channel task panicked: {}", e);
                }
            }
        }
    }
}

enum ReadOutcome {
    Cancelled,
    Stalled,
    Closed,
    Failed(ChatError),
}

impl Channel {
    /// Create an unjoined channel. Returns the handle and the receiving end
    /// of its event queue.
    pub fn new(
        room_id: RoomId,
        session: Arc<Session>,
        config: ChannelConfig,
        parser_options: ParserOptions,
        failures: mpsc::UnboundedSender<ChannelFailure>,
    ) -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ChannelState::Unjoined);
        let parser = FragmentParser::with_options(room_id.clone(), parser_options);

        let inner = ChannelInner {
            room_id,
            session,
            config,
            parser,
            events,
            failures,
            state,
            endpoints: RwLock::new(None),
            connection: Mutex::new(None),
            stats: ChannelStats::default(),
        };

        (
            Self {
                inner: Arc::new(inner),
            },
            events_rx,
        )
    }

    pub fn room_id(&self) -> &RoomId {
        &self.inner.room_id
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state.borrow()
    }

    pub fn status(&self) -> RoomStatus {
        let stats = &self.inner.stats;
        RoomStatus {
            room_id: self.inner.room_id.clone(),
            state: self.state(),
            reconnect_attempt: stats.reconnect_attempt.load(Ordering::Relaxed),
            fragments_received: stats.fragments_received.load(Ordering::Relaxed),
            events_emitted: stats.events_emitted.load(Ordering::Relaxed),
            fragments_discarded: stats.fragments_discarded.load(Ordering::Relaxed),
            reconnects: stats.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Join the room and start streaming. An active connection is torn down
    /// first.
    pub async fn join(&self) -> Result<()> {
        let mut connection = self.inner.connection.lock().await;
        if let Some(old) = connection.take() {
            debug!(target: "chatbridge::channel", "Tearing down previous connection to room {}", self.inner.room_id);
            old.shutdown().await;
        }

        self.inner.set_state(ChannelState::Joining);
        let stream = match self.inner.handshake().await {
            Ok(stream) => stream,
            Err(e) => {
                *self.inner.endpoints.write().await = None;
                self.inner.set_state(ChannelState::Unjoined);
                warn!(target: "chatbridge::channel", "{}", e);
                return Err(e);
            }
        };

        self.inner.stats.reconnect_attempt.store(0, Ordering::Relaxed);
        self.inner.set_state(ChannelState::Streaming);

        let cancel = CancellationToken::new();
        let supervisor = self.inner.clone().supervise(stream, cancel.clone());
        *connection = Some(Connection::start(&self.inner, supervisor, cancel));

        info!(target: "chatbridge::channel", "Joined room {}", self.inner.room_id);
        Ok(())
    }

    /// Join like [`join`](Self::join), but a failed handshake falls into the
    /// bounded reconnect path instead of leaving the channel unjoined. The
    /// failed handshake counts as the first attempt. The join error is still
    /// returned.
    pub async fn join_with_retry(&self) -> Result<()> {
        let e = match self.join().await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        let mut connection = self.inner.connection.lock().await;
        if connection.is_some() || self.state() != ChannelState::Unjoined {
            // A concurrent join or leave got here first.
            return Err(e);
        }

        self.inner.stats.reconnect_attempt.store(1, Ordering::Relaxed);
        self.inner.set_state(ChannelState::Reconnecting);

        let cancel = CancellationToken::new();
        let supervisor = self.inner.clone().recover(cancel.clone());
        *connection = Some(Connection::start(&self.inner, supervisor, cancel));
        Err(e)
    }

    /// Leave the room: best-effort exit message, then teardown. Calling it
    /// again is a no-op.
    pub async fn leave(&self) {
        let mut connection = self.inner.connection.lock().await;
        let state = self.state();

        if state == ChannelState::Closed {
            if let Some(old) = connection.take() {
                old.shutdown().await;
            }
            return;
        }

        if state.can_send() {
            self.inner
                .post(&OutgoingMessage::exit(&self.inner.room_id))
                .await;
        }

        if let Some(old) = connection.take() {
            old.shutdown().await;
        }

        *self.inner.endpoints.write().await = None;
        self.inner.stats.reconnect_attempt.store(0, Ordering::Relaxed);
        self.inner.set_state(ChannelState::Closed);
        info!(target: "chatbridge::channel", "Left room {}", self.inner.room_id);
    }

    /// Post a message into the room. Best-effort: failures are logged.
    pub async fn send(&self, message: OutgoingMessage) {
        let state = self.state();
        if !state.can_send() {
            debug!(
                target: "chatbridge::channel",
                "Dropping message to room {} in state {}", self.inner.room_id, state
            );
            return;
        }
        if !self.inner.session.is_authenticated().await {
            debug!(
                target: "chatbridge::channel",
                "Dropping message to room {}: session not authenticated", self.inner.room_id
            );
            return;
        }
        self.inner.post(&message).await;
    }
}

impl ChannelInner {
    fn set_state(&self, next: ChannelState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(
                target: "chatbridge::channel",
                "Room {} state {} -> {}", self.room_id, previous, next
            );
        }
    }

    fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Token fetch, token exchange and stream open.
    async fn handshake(&self) -> Result<FragmentStream> {
        let room = &self.room_id;
        let profile = self
            .session
            .profile()
            .await
            .ok_or_else(|| ChatError::join(room, ChatError::NotAuthenticated))?;
        let transport = self.session.transport();

        let token = transport
            .fetch_join_token(room)
            .await
            .map_err(|e| ChatError::join(room, e))?;
        trace!(target: "chatbridge::channel", "Got join token for room {}", room);

        let endpoints = transport
            .exchange_token(room, &profile, &token)
            .await
            .map_err(|e| ChatError::join(room, e))?;

        let stream = transport
            .open_stream(&endpoints.stream_url)
            .await
            .map_err(|e| ChatError::join(room, e))?;

        *self.endpoints.write().await = Some(endpoints);
        Ok(stream)
    }

    /// Retry a failed join, then stream as usual.
    async fn recover(self: Arc<Self>, cancel: CancellationToken) {
        if let Some(stream) = self.reconnect(&cancel, 2, FailureCause::JoinFailed).await {
            self.set_state(ChannelState::Streaming);
            self.supervise(stream, cancel).await;
        }
    }

    /// Owns the connection: reads until the stream dies, then reconnects.
    async fn supervise(self: Arc<Self>, mut stream: FragmentStream, cancel: CancellationToken) {
        loop {
            match self.read_stream(stream, &cancel).await {
                ReadOutcome::Cancelled => return,
                ReadOutcome::Stalled => {
                    warn!(
                        target: "chatbridge::channel::heartbeat",
                        "No data from room {} for {:?}, reconnecting",
                        self.room_id, self.config.heartbeat_timeout
                    );
                }
                ReadOutcome::Closed => {
                    info!(target: "chatbridge::channel", "Stream for room {} closed by remote", self.room_id);
                }
                ReadOutcome::Failed(e) => {
                    warn!(target: "chatbridge::channel", "Stream for room {} failed: {}", self.room_id, e);
                }
            }

            self.set_state(ChannelState::Reconnecting);
            match self.reconnect(&cancel, 1, FailureCause::StreamLost).await {
                Some(next) => {
                    stream = next;
                    self.set_state(ChannelState::Streaming);
                }
                None => return,
            }
        }
    }

    async fn read_stream(&self, mut stream: FragmentStream, cancel: &CancellationToken) -> ReadOutcome {
        let timeout = self.config.heartbeat_timeout;
        let mut decoder = FragmentDecoder::new();
        let heartbeat = tokio::time::sleep(timeout);
        tokio::pin!(heartbeat);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return ReadOutcome::Cancelled,
                _ = &mut heartbeat => return ReadOutcome::Stalled,
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        heartbeat.as_mut().reset(Instant::now() + timeout);
                        trace!(target: "chatbridge::channel::heartbeat", "Heartbeat from room {}", self.room_id);
                        for fragment in decoder.push(&bytes) {
                            self.handle_fragment(&fragment);
                        }
                    }
                    Some(Err(e)) => return ReadOutcome::Failed(e),
                    None => return ReadOutcome::Closed,
                },
            }
        }
    }

    fn handle_fragment(&self, fragment: &str) {
        self.stats.fragments_received.fetch_add(1, Ordering::Relaxed);

        match self.parser.parse(fragment) {
            Some(event) => {
                self.stats.events_emitted.fetch_add(1, Ordering::Relaxed);
                if self.events.send(event).is_err() {
                    trace!(target: "chatbridge::channel", "No listener for room {} events", self.room_id);
                }
            }
            None => {
                self.stats.fragments_discarded.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Bounded rejoin starting at `first_attempt`. `None` means cancelled or
    /// gave up; giving up closes the channel and raises exactly one failure.
    ///
    /// `reconnect_attempt` reports the attempt made last, so it keeps its
    /// value through the backoff that follows a failure.
    async fn reconnect(
        &self,
        cancel: &CancellationToken,
        first_attempt: u32,
        cause: FailureCause,
    ) -> Option<FragmentStream> {
        let max = self.config.max_reconnect_attempts;

        for attempt in first_attempt..=max {
            if attempt > 1 {
                let delay = self.config.reconnect_base_delay * (attempt - 1);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            self.stats.reconnect_attempt.store(attempt, Ordering::Relaxed);

            info!(
                target: "chatbridge::channel",
                "Reconnecting to room {} (attempt {}/{})", self.room_id, attempt, max
            );

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                result = self.handshake() => result,
            };

            match result {
                Ok(stream) => {
                    self.stats.reconnect_attempt.store(0, Ordering::Relaxed);
                    self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                    info!(target: "chatbridge::channel", "Reconnected to room {}", self.room_id);
                    return Some(stream);
                }
                Err(e) => {
                    warn!(
                        target: "chatbridge::channel",
                        "Reconnect attempt {} for room {} failed: {}", attempt, self.room_id, e
                    );
                }
            }
        }

        self.stats.reconnect_attempt.store(0, Ordering::Relaxed);
        self.set_state(ChannelState::Closed);
        error!(
            target: "chatbridge::channel",
            "Giving up on room {} after {} reconnect attempts", self.room_id, max
        );
        let _ = self.failures.send(ChannelFailure {
            room_id: self.room_id.clone(),
            attempts: max,
            cause,
        });
        None
    }

    async fn keepalive(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.keepalive_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            if self.state() == ChannelState::Streaming {
                trace!(target: "chatbridge::channel", "Keepalive to room {}", self.room_id);
                self.post(&OutgoingMessage::keepalive()).await;
            }
        }
    }

    /// Send through the current send endpoint, logging failures.
    async fn post(&self, message: &OutgoingMessage) -> bool {
        let Some(send_url) = self
            .endpoints
            .read()
            .await
            .as_ref()
            .map(|e| e.send_url.clone())
        else {
            debug!(target: "chatbridge::channel", "No send endpoint for room {}", self.room_id);
            return false;
        };

        match self.session.transport().send_to_room(&send_url, message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(target: "chatbridge::channel", "Send to room {} failed: {}", self.room_id, e);
                false
            }
        }
    }
}
