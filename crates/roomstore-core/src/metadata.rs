// ABOUTME: Defines the session Credentials and the versioned Metadata record owning a store.
// ABOUTME: Metadata must match the caller's credentials and format version before cached data is trusted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity of the account a store instance belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user_id: String,
    pub access_token: String,
    pub home_server: Option<String>,
}

impl Credentials {
    pub fn new(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
            home_server: None,
        }
    }
}

/// Reasons persisted metadata is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataMismatch {
    #[error("format version {found} does not match expected {expected}")]
    Version { expected: u32, found: u32 },

    #[error("metadata belongs to {found}, not {expected}")]
    User { expected: String, found: String },

    #[error("access token changed")]
    AccessToken,
}

/// Session record: who owns the store, which format it was written with,
/// the sync cursor, and the user's own profile fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub user_id: String,
    pub access_token: String,
    pub version: u32,
    pub event_stream_token: Option<String>,
    pub user_display_name: Option<String>,
    pub user_avatar_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Metadata {
    /// Fresh metadata for `credentials` at format `version`.
    pub fn new(credentials: &Credentials, version: u32) -> Self {
        Self {
            user_id: credentials.user_id.clone(),
            access_token: credentials.access_token.clone(),
            version,
            event_stream_token: None,
            user_display_name: None,
            user_avatar_url: None,
            updated_at: Utc::now(),
        }
    }

    /// Check that this record can be trusted for `credentials` at `version`.
    pub fn verify(&self, credentials: &Credentials, version: u32) -> Result<(), MetadataMismatch> {
        if self.version != version {
            return Err(MetadataMismatch::Version {
                expected: version,
                found: self.version,
            });
        }
        if self.user_id != credentials.user_id {
            return Err(MetadataMismatch::User {
                expected: credentials.user_id.clone(),
                found: self.user_id.clone(),
            });
        }
        if self.access_token != credentials.access_token {
            return Err(MetadataMismatch::AccessToken);
        }
        Ok(())
    }

    /// Strip stray whitespace picked up from older writers.
    pub fn normalize(&mut self) {
        if let Some(name) = self.user_display_name.as_mut() {
            let trimmed = name.trim();
            if trimmed.len() != name.len() {
                *name = trimmed.to_string();
            }
        }
    }

    /// Set the display name, trimmed. Returns whether the value changed.
    pub fn set_display_name(&mut self, display_name: Option<String>) -> bool {
        let display_name = display_name.map(|n| n.trim().to_string());
        if self.user_display_name == display_name {
            return false;
        }
        self.user_display_name = display_name;
        self.updated_at = Utc::now();
        true
    }

    /// Set the avatar URL. Returns whether the value changed.
    pub fn set_avatar_url(&mut self, avatar_url: Option<String>) -> bool {
        if self.user_avatar_url == avatar_url {
            return false;
        }
        self.user_avatar_url = avatar_url;
        self.updated_at = Utc::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_metadata_verifies_against_own_credentials() {
        let creds = Credentials::new("@alice:hs", "secret");
        let meta = Metadata::new(&creds, 3);
        assert!(meta.verify(&creds, 3).is_ok());
    }

    #[test]
    fn verify_rejects_version_user_and_token_changes() {
        let creds = Credentials::new("@alice:hs", "secret");
        let meta = Metadata::new(&creds, 3);

        assert_eq!(
            meta.verify(&creds, 4),
            Err(MetadataMismatch::Version {
                expected: 4,
                found: 3
            })
        );
        assert!(matches!(
            meta.verify(&Credentials::new("@bob:hs", "secret"), 3),
            Err(MetadataMismatch::User { .. })
        ));
        assert_eq!(
            meta.verify(&Credentials::new("@alice:hs", "rotated"), 3),
            Err(MetadataMismatch::AccessToken)
        );
    }

    #[test]
    fn display_name_is_trimmed_and_change_tracked() {
        let mut meta = Metadata::new(&Credentials::new("@a:hs", "t"), 1);
        assert!(meta.set_display_name(Some("  Alice \n".to_string())));
        assert_eq!(meta.user_display_name.as_deref(), Some("Alice"));
        assert!(!meta.set_display_name(Some("Alice".to_string())));
    }

    #[test]
    fn normalize_trims_loaded_display_name() {
        let mut meta = Metadata {
            user_display_name: Some("Alice\n".to_string()),
            ..Metadata::default()
        };
        meta.normalize();
        assert_eq!(meta.user_display_name.as_deref(), Some("Alice"));
    }
}
