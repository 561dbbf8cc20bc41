//! Request/response payloads for provider-side account operations.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{Identity, Role, Session};

/// New account registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

impl SignUpRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            full_name: full_name.into(),
        }
    }

    /// User metadata attached to the new account.
    ///
    /// Every account starts as a plain user; coach/admin flags are granted
    /// server-side later.
    pub fn metadata(&self) -> Value {
        json!({
            "full_name": self.full_name,
            "role": Role::user(),
            "is_coach": false,
        })
    }
}

/// Changes to the signed-in user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl UserUpdate {
    pub fn password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
            data: None,
        }
    }

    pub fn data(data: Value) -> Self {
        Self {
            password: None,
            data: Some(data),
        }
    }
}

/// What the provider hands back from sign-in/sign-up.
///
/// Either part may be missing: sign-up with email confirmation yields a user
/// without a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: Option<Identity>,
    pub session: Option<Session>,
}

impl AuthResponse {
    pub fn from_session(session: Session) -> Self {
        Self {
            user: Some(session.user.clone()),
            session: Some(session),
        }
    }
}
