//! Production [`ChatTransport`] over plain HTTP with a cookie jar.
//!
//! The upstream chat has no API; everything is scraped out of the HTML it
//! serves. The helpers that pull tokens and URLs out of responses are plain
//! functions so they can be tested without a server.

use crate::error::ChatError;
use crate::markup;
use crate::transport::{ChatTransport, Credentials, FragmentStream, OutgoingMessage, StreamEndpoints};
use crate::Result;
use async_trait::async_trait;
use chatbridge_types::{RoomId, UserProfile};
use futures::TryStreamExt;
use reqwest::cookie::Jar;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Upstream URLs and constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpEndpoints {
    #[serde(default = "default_authenticate_url")]
    pub authenticate_url: String,
    /// Optional session logout URL. The cookie jar is discarded either way.
    #[serde(default)]
    pub logout_url: Option<String>,
    /// Page holding the login form with the room join token.
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// Endpoint that trades a join token for the room URLs.
    #[serde(default = "default_chat_login_url")]
    pub chat_login_url: String,
    /// Addressee meaning "everyone in the room".
    #[serde(default = "default_broadcast_target")]
    pub broadcast_target: String,
}

fn default_authenticate_url() -> String {
    "https://oma.suomi24.fi/authenticate".to_string()
}

fn default_token_url() -> String {
    "http://chat.suomi24.fi/login.cgi".to_string()
}

fn default_chat_login_url() -> String {
    "http://chat2.suomi24.fi:8080/login".to_string()
}

fn default_broadcast_target() -> String {
    "kaikille".to_string()
}

impl Default for HttpEndpoints {
    fn default() -> Self {
        Self {
            authenticate_url: default_authenticate_url(),
            logout_url: None,
            token_url: default_token_url(),
            chat_login_url: default_chat_login_url(),
            broadcast_target: default_broadcast_target(),
        }
    }
}

#[derive(Serialize)]
struct AuthenticateRequest<'a> {
    username: &'a str,
    password: &'a str,
    remember_me: bool,
}

/// HTTP transport holding the authenticated cookie context.
pub struct HttpTransport {
    endpoints: HttpEndpoints,
    request_timeout: Duration,
    client: RwLock<reqwest::Client>,
}

impl HttpTransport {
    const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(endpoints: HttpEndpoints) -> Result<Self> {
        Ok(Self {
            endpoints,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            client: RwLock::new(build_client()?),
        })
    }

    /// Override the timeout of non-streaming requests.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    async fn client(&self) -> reqwest::Client {
        self.client.read().await.clone()
    }

    async fn get_text(&self, url: &str, query: &[(&str, &str)]) -> Result<String> {
        let response = self
            .client()
            .await
            .get(url)
            .query(query)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Protocol(format!("{} returned {}", url, status)));
        }
        Ok(response.text().await?)
    }
}

/// Fresh client with an empty cookie jar.
fn build_client() -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .cookie_provider(Arc::new(Jar::default()))
        .connect_timeout(HttpTransport::CONNECT_TIMEOUT)
        .build()?;
    Ok(client)
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn authenticate(&self, credentials: &Credentials) -> Result<UserProfile> {
        let client = build_client()?;
        let response = client
            .post(&self.endpoints.authenticate_url)
            .json(&AuthenticateRequest {
                username: &credentials.username,
                password: &credentials.password,
                remember_me: false,
            })
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| ChatError::Auth(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ChatError::Auth("credentials rejected".to_string()));
            }
            status if !status.is_success() => {
                return Err(ChatError::Auth(format!("authenticate returned {}", status)));
            }
            _ => {}
        }

        let profile: UserProfile = response
            .json()
            .await
            .map_err(|e| ChatError::Auth(format!("unreadable profile: {}", e)))?;

        *self.client.write().await = client;
        info!(
            target: "chatbridge::http",
            username = %profile.username,
            "Authenticated"
        );
        Ok(profile)
    }

    async fn logout(&self) -> Result<()> {
        let result = match &self.endpoints.logout_url {
            Some(url) => self.get_text(url, &[]).await.map(|_| ()),
            None => Ok(()),
        };
        *self.client.write().await = build_client()?;
        debug!(target: "chatbridge::http", "Cookie jar discarded");
        result
    }

    async fn fetch_join_token(&self, room: &RoomId) -> Result<String> {
        let html = self
            .get_text(&self.endpoints.token_url, &[("cid", room.as_str())])
            .await?;
        extract_join_token(&html)
            .ok_or_else(|| ChatError::Protocol("join token not found in login form".to_string()))
    }

    async fn exchange_token(
        &self,
        room: &RoomId,
        profile: &UserProfile,
        token: &str,
    ) -> Result<StreamEndpoints> {
        let body = self
            .get_text(
                &self.endpoints.chat_login_url,
                &[
                    ("cid", room.as_str()),
                    ("nick", profile.nickname.as_str()),
                    ("name", profile.username.as_str()),
                    ("who", token),
                ],
            )
            .await?;
        endpoints_from_redirect(&body)
    }

    async fn open_stream(&self, stream_url: &str) -> Result<FragmentStream> {
        // No total timeout: the stream is meant to stay open.
        let response = self.client().await.get(stream_url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Transport(format!("stream returned {}", status)));
        }

        Ok(Box::pin(response.bytes_stream().map_err(ChatError::from)))
    }

    async fn send_to_room(&self, send_url: &str, message: &OutgoingMessage) -> Result<()> {
        let target = message
            .target
            .as_deref()
            .unwrap_or(&self.endpoints.broadcast_target);
        let url = build_send_url(send_url, target, &message.text, message.private);

        let response = self
            .client()
            .await
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| ChatError::Send(e.to_string()))?;

        if !response.status().is_success() {
            warn!(
                target: "chatbridge::http",
                status = %response.status(),
                "Send endpoint rejected message"
            );
            return Err(ChatError::Send(format!("send returned {}", response.status())));
        }
        Ok(())
    }
}

/// Pull the join token out of the room login page: the value of the hidden
/// `who` input, preferring the one inside the `loginfrm` form.
pub fn extract_join_token(html: &str) -> Option<String> {
    let mut in_login_form = false;
    let mut fallback = None;

    for token in markup::tokenize(html) {
        if token.is_open("form") {
            in_login_form = token.attr("id") == Some("loginfrm")
                || token.attr("name") == Some("loginfrm");
            continue;
        }
        if token.is_close("form") {
            in_login_form = false;
            continue;
        }
        if !token.is_open("input") || token.attr("name") != Some("who") {
            continue;
        }

        let value = token.attr("value").map(str::trim).filter(|v| !v.is_empty());
        match value {
            Some(v) if in_login_form => return Some(v.to_string()),
            Some(v) if fallback.is_none() => fallback = Some(v.to_string()),
            _ => {}
        }
    }

    fallback
}

/// Derive the stream and send URLs from the exchange response, which
/// redirects via a quoted URL (`location='http://.../chat/...'`).
pub fn endpoints_from_redirect(body: &str) -> Result<StreamEndpoints> {
    let (first, last) = match (body.find('\''), body.rfind('\'')) {
        (Some(first), Some(last)) if last > first => (first, last),
        _ => {
            return Err(ChatError::Protocol(
                "no redirect URL in exchange response".to_string(),
            ));
        }
    };

    let url = body[first + 1..last].trim();
    if !url.contains("/chat/") {
        return Err(ChatError::Protocol(format!(
            "unexpected redirect URL: {}",
            url
        )));
    }

    Ok(StreamEndpoints {
        stream_url: url.replacen("/chat/", "/body/", 1),
        send_url: url.replacen("/chat/", "/tell", 1),
    })
}

/// Percent-encode like the legacy browser `escape()` the upstream expects:
/// `%XX` for code units below 256 and `%uXXXX` above.
pub fn legacy_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for unit in s.encode_utf16() {
        match u8::try_from(unit) {
            Ok(b) if b.is_ascii_alphanumeric() || b"@*_+-./".contains(&b) => out.push(b as char),
            Ok(b) => out.push_str(&format!("%{:02X}", b)),
            Err(_) => out.push_str(&format!("%u{:04X}", unit)),
        }
    }
    out
}

/// Full send request URL for one message.
pub fn build_send_url(send_url: &str, target: &str, text: &str, private: bool) -> String {
    let escaped = legacy_escape(text);
    format!(
        "{}&ac=tell&who={}&how=0&priv={}&baseTarget=empty&tl={}&tell={}",
        send_url,
        legacy_escape(target),
        private,
        escaped,
        escaped
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_join_token_prefers_login_form() {
        let html = r#"
            <form id="other"><input type="hidden" name="who" value="wrong"></form>
            <form id="loginfrm" method="post">
              <input type="hidden" name="cid" value="101">
              <input type="hidden" name="who" value="abc123">
            </form>"#;
        assert_eq!(extract_join_token(html).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_extract_join_token_fallback_and_missing() {
        let html = r#"<input name="who" value="tok">"#;
        assert_eq!(extract_join_token(html).as_deref(), Some("tok"));
        assert_eq!(extract_join_token("<html><body>maintenance</body></html>"), None);
        assert_eq!(extract_join_token(r#"<input name="who" value="">"#), None);
    }

    #[test]
    fn test_endpoints_from_redirect() {
        let body = "<script>top.location='http://chat2.example:8080/chat/101?cs=xyz';</script>";
        let endpoints = endpoints_from_redirect(body).unwrap();
        assert_eq!(endpoints.stream_url, "http://chat2.example:8080/body/101?cs=xyz");
        assert_eq!(endpoints.send_url, "http://chat2.example:8080/tell101?cs=xyz");
    }

    #[test]
    fn test_endpoints_from_redirect_rejects_garbage() {
        assert!(endpoints_from_redirect("no quotes").is_err());
        assert!(endpoints_from_redirect("'only one").is_err());
        assert!(endpoints_from_redirect("location='http://x/other/1'").is_err());
    }

    #[test]
    fn test_legacy_escape() {
        assert_eq!(legacy_escape("abc-1.2_3*@+/"), "abc-1.2_3*@+/");
        assert_eq!(legacy_escape("moi kaikki!"), "moi%20kaikki%21");
        assert_eq!(legacy_escape("hyvää"), "hyv%E4%E4");
        assert_eq!(legacy_escape("€"), "%u20AC");
        assert_eq!(legacy_escape("/poistu 101"), "/poistu%20101");
    }

    #[test]
    fn test_build_send_url() {
        let url = build_send_url("http://h/tell101?cs=1", "kaikille", "hei", false);
        assert_eq!(
            url,
            "http://h/tell101?cs=1&ac=tell&who=kaikille&how=0&priv=false&baseTarget=empty&tl=hei&tell=hei"
        );
    }

    #[test]
    fn test_default_endpoints() {
        let endpoints = HttpEndpoints::default();
        assert_eq!(endpoints.broadcast_target, "kaikille");
        assert!(endpoints.logout_url.is_none());
    }
}
