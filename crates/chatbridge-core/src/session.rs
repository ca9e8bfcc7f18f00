//! Authenticated session shared by every room channel.

use crate::error::ChatError;
use crate::transport::{ChatTransport, Credentials};
use crate::Result;
use chatbridge_types::UserProfile;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Owns the credentials and the authenticated context.
///
/// Channels only read the profile; login, logout and relogin are serialized
/// through an internal lock so a relogin is atomic from the caller's side.
pub struct Session {
    credentials: Credentials,
    transport: Arc<dyn ChatTransport>,
    profile: RwLock<Option<UserProfile>>,
    auth_lock: Mutex<()>,
}

impl Session {
    pub fn new(credentials: Credentials, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            credentials,
            transport,
            profile: RwLock::new(None),
            auth_lock: Mutex::new(()),
        }
    }

    /// Exchange credentials for an authenticated context, replacing any
    /// existing one.
    pub async fn login(&self) -> Result<UserProfile> {
        let _guard = self.auth_lock.lock().await;
        self.login_locked().await
    }

    /// Invalidate the context. Failures are logged, never returned.
    pub async fn logout(&self) {
        let _guard = self.auth_lock.lock().await;
        self.logout_locked().await;
    }

    /// Logout followed by login as one unit. On failure the session stays
    /// unauthenticated.
    pub async fn relogin(&self) -> Result<UserProfile> {
        let _guard = self.auth_lock.lock().await;
        self.logout_locked().await;
        self.login_locked().await
    }

    async fn login_locked(&self) -> Result<UserProfile> {
        match self.transport.authenticate(&self.credentials).await {
            Ok(profile) => {
                info!(
                    target: "chatbridge::session",
                    username = %profile.username,
                    nickname = %profile.nickname,
                    "Logged in"
                );
                *self.profile.write().await = Some(profile.clone());
                Ok(profile)
            }
            Err(e) => {
                *self.profile.write().await = None;
                warn!(
                    target: "chatbridge::session",
                    username = %self.credentials.username,
                    error = %e,
                    "Login failed"
                );
                Err(match e {
                    ChatError::Auth(_) => e,
                    other => ChatError::Auth(other.to_string()),
                })
            }
        }
    }

    async fn logout_locked(&self) {
        let was_authenticated = self.profile.write().await.take().is_some();
        if let Err(e) = self.transport.logout().await {
            warn!(target: "chatbridge::session", error = %e, "Logout failed");
        } else if was_authenticated {
            info!(target: "chatbridge::session", "Logged out");
        }
    }

    /// Current profile, if logged in.
    pub async fn profile(&self) -> Option<UserProfile> {
        self.profile.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.profile.read().await.is_some()
    }

    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    pub(crate) fn transport(&self) -> &Arc<dyn ChatTransport> {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{FragmentStream, OutgoingMessage, StreamEndpoints};
    use async_trait::async_trait;
    use chatbridge_types::RoomId;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct AuthOnly {
        reject: AtomicBool,
        logouts: AtomicUsize,
    }

    #[async_trait]
    impl ChatTransport for AuthOnly {
        async fn authenticate(&self, credentials: &Credentials) -> Result<UserProfile> {
            if self.reject.load(Ordering::SeqCst) {
                return Err(ChatError::Transport("connection refused".to_string()));
            }
            Ok(UserProfile {
                username: credentials.username.clone(),
                nickname: format!("{}_nick", credentials.username),
                uid: Some(1),
            })
        }

        async fn logout(&self) -> Result<()> {
            self.logouts.fetch_add(1, Ordering::SeqCst);
            Err(ChatError::Transport("logout endpoint down".to_string()))
        }

        async fn fetch_join_token(&self, _room: &RoomId) -> Result<String> {
            unreachable!()
        }

        async fn exchange_token(
            &self,
            _room: &RoomId,
            _profile: &UserProfile,
            _token: &str,
        ) -> Result<StreamEndpoints> {
            unreachable!()
        }

        async fn open_stream(&self, _stream_url: &str) -> Result<FragmentStream> {
            unreachable!()
        }

        async fn send_to_room(&self, _send_url: &str, _message: &OutgoingMessage) -> Result<()> {
            unreachable!()
        }
    }

    fn session(transport: Arc<AuthOnly>) -> Session {
        Session::new(Credentials::new("bob", "secret"), transport)
    }

    #[tokio::test]
    async fn test_login_stores_profile() {
        let session = session(Arc::new(AuthOnly::default()));
        assert!(!session.is_authenticated().await);

        let profile = session.login().await.unwrap();
        assert_eq!(profile.nickname, "bob_nick");
        assert_eq!(session.profile().await, Some(profile));
    }

    #[tokio::test]
    async fn test_login_failure_is_auth_error() {
        let transport = Arc::new(AuthOnly::default());
        transport.reject.store(true, Ordering::SeqCst);
        let session = session(transport);

        let err = session.login().await.unwrap_err();
        assert!(matches!(err, ChatError::Auth(_)));
        assert!(!session.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_logout_failure_is_swallowed() {
        let transport = Arc::new(AuthOnly::default());
        let session = session(transport.clone());
        session.login().await.unwrap();

        session.logout().await;
        assert!(!session.is_authenticated().await);
        assert_eq!(transport.logouts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_relogin_leaves_session_unauthenticated() {
        let transport = Arc::new(AuthOnly::default());
        let session = session(transport.clone());
        session.login().await.unwrap();

        transport.reject.store(true, Ordering::SeqCst);
        assert!(session.relogin().await.is_err());
        assert!(!session.is_authenticated().await);

        transport.reject.store(false, Ordering::SeqCst);
        assert!(session.relogin().await.is_ok());
        assert!(session.is_authenticated().await);
        assert_eq!(transport.logouts.load(Ordering::SeqCst), 2);
    }
}
