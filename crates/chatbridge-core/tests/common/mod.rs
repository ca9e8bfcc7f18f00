//! Common test utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chatbridge_core::{
    ChatError, ChatTransport, Credentials, FragmentStream, OutgoingMessage, Result,
    StreamEndpoints,
};
use chatbridge_types::{RoomId, UserProfile};
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Load an HTML fragment fixture.
pub fn load_fragment(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("fragments")
        .join(format!("{}.html", name));

    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read fixture {}: {}", path.display(), e))
}

pub fn credentials() -> Credentials {
    Credentials::new("tester", "secret")
}

/// How a scripted stream behaves after its chunks run out.
#[derive(Debug, Clone, Copy)]
pub enum StreamEnd {
    /// Stay open without sending anything.
    Hang,
    /// Remote close.
    Close,
}

#[derive(Debug, Clone)]
pub struct ScriptedStream {
    pub chunks: Vec<String>,
    /// Delay before each chunk.
    pub interval: Option<Duration>,
    pub end: StreamEnd,
}

impl ScriptedStream {
    pub fn hang(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            interval: None,
            end: StreamEnd::Hang,
        }
    }

    pub fn close(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            interval: None,
            end: StreamEnd::Close,
        }
    }

    /// Chunks spaced `interval` apart, then silence.
    pub fn every(interval: Duration, chunks: &[&str]) -> Self {
        Self {
            interval: Some(interval),
            ..Self::hang(chunks)
        }
    }
}

/// In-memory transport with scripted streams and call counters.
///
/// Streams are handed out in the order they were scripted; once the script
/// runs out every new stream hangs silently.
pub struct MockTransport {
    pub authenticate_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub token_calls: AtomicUsize,
    pub exchange_calls: AtomicUsize,
    pub open_calls: AtomicUsize,
    pub reject_auth: AtomicBool,
    /// Token fetches beyond this count fail.
    pub fail_tokens_after: AtomicUsize,
    /// How long each keepalive takes to go out.
    keepalive_delay: Mutex<Option<Duration>>,
    sent: Mutex<Vec<(String, OutgoingMessage)>>,
    streams: Mutex<VecDeque<ScriptedStream>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            authenticate_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            token_calls: AtomicUsize::new(0),
            exchange_calls: AtomicUsize::new(0),
            open_calls: AtomicUsize::new(0),
            reject_auth: AtomicBool::new(false),
            fail_tokens_after: AtomicUsize::new(usize::MAX),
            keepalive_delay: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            streams: Mutex::new(VecDeque::new()),
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_streams(streams: Vec<ScriptedStream>) -> Self {
        let transport = Self::default();
        transport.streams.lock().unwrap().extend(streams);
        transport
    }

    pub fn script(&self, stream: ScriptedStream) {
        self.streams.lock().unwrap().push_back(stream);
    }

    pub fn fail_tokens_after(&self, successful: usize) {
        self.fail_tokens_after.store(successful, Ordering::SeqCst);
    }

    pub fn slow_keepalives(&self, delay: Duration) {
        *self.keepalive_delay.lock().unwrap() = Some(delay);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Every message posted so far, with the URL it went to.
    pub fn sent(&self) -> Vec<(String, OutgoingMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, m)| m.text).collect()
    }

    pub fn exit_messages(&self) -> usize {
        self.sent_texts()
            .iter()
            .filter(|t| t.starts_with("/poistu "))
            .count()
    }

    pub fn keepalives(&self) -> usize {
        self.sent().iter().filter(|(_, m)| m.is_keepalive()).count()
    }
}

#[async_trait]
impl ChatTransport for MockTransport {
    async fn authenticate(&self, credentials: &Credentials) -> Result<UserProfile> {
        self.authenticate_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_auth.load(Ordering::SeqCst) {
            return Err(ChatError::Auth("credentials rejected".to_string()));
        }
        Ok(UserProfile {
            username: credentials.username.clone(),
            nickname: format!("{}_nick", credentials.username),
            uid: Some(42),
        })
    }

    async fn logout(&self) -> Result<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_join_token(&self, room: &RoomId) -> Result<String> {
        let call = self.token_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call > self.fail_tokens_after.load(Ordering::SeqCst) {
            return Err(ChatError::Protocol("join token not found".to_string()));
        }
        Ok(format!("token-{}-{}", room, call))
    }

    async fn exchange_token(
        &self,
        room: &RoomId,
        _profile: &UserProfile,
        _token: &str,
    ) -> Result<StreamEndpoints> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        Ok(StreamEndpoints {
            stream_url: format!("http://mock/body/{}", room),
            send_url: format!("http://mock/tell{}?cs=1", room),
        })
    }

    async fn open_stream(&self, _stream_url: &str) -> Result<FragmentStream> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedStream::hang(&[]));

        let interval = script.interval;
        let chunks = stream::iter(script.chunks).then(move |c| async move {
            if let Some(delay) = interval {
                tokio::time::sleep(delay).await;
            }
            Ok::<Bytes, ChatError>(Bytes::from(c))
        });
        Ok(match script.end {
            StreamEnd::Hang => chunks.chain(stream::pending()).boxed(),
            StreamEnd::Close => chunks.boxed(),
        })
    }

    async fn send_to_room(&self, send_url: &str, message: &OutgoingMessage) -> Result<()> {
        let delay = *self.keepalive_delay.lock().unwrap();
        if let (true, Some(delay)) = (message.is_keepalive(), delay) {
            tokio::time::sleep(delay).await;
        }
        self.sent
            .lock()
            .unwrap()
            .push((send_url.to_string(), message.clone()));
        Ok(())
    }
}
