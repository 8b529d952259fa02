// ABOUTME: Defines User, the cached profile and presence of an account seen by the client.
// ABOUTME: The store keeps one entry per user id; the own user follows the metadata profile fields.

use serde::{Deserialize, Serialize};

/// A user's last known profile and presence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    /// Presence as reported by the server (`online`, `offline`, `unavailable`).
    pub presence: Option<String>,
    /// Milliseconds since the user was last active, when known.
    pub last_active_ago: Option<u64>,
}

impl User {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Display name, falling back to the user id.
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.user_id)
    }
}
