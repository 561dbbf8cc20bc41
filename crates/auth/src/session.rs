use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Identity;

/// Provider-issued proof of authentication.
///
/// The client treats the tokens as opaque; the presence of a session is what
/// makes the user authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// The identity this session was issued for.
    pub user: Identity,
}

impl Session {
    pub fn new(access_token: impl Into<String>, user: Identity) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
            user,
        }
    }

    /// Synthetic session wrapping a demo identity. Never sent to a provider.
    pub fn demo(user: Identity) -> Self {
        Self::new("demo", user)
    }

    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }
}
