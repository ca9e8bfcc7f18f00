//! Authenticated user profile.

use serde::{Deserialize, Serialize};

/// Profile returned by the upstream authentication endpoint.
///
/// The upstream response carries many more fields; only the ones needed to
/// join rooms are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Account name used for login and as the `name` join parameter.
    pub username: String,
    /// Display name shown in rooms.
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u64>,
}
