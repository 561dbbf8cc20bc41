use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nutritrack_auth::{Session, UserId};

use crate::AuthEventKind;

/// One auth state change as delivered by the provider.
///
/// `session` is the provider's view *after* the change: `None` after a
/// sign-out, `Some` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthChange {
    kind: AuthEventKind,
    session: Option<Session>,
    received_at: DateTime<Utc>,
}

impl AuthChange {
    pub fn new(kind: AuthEventKind, session: Option<Session>) -> Self {
        Self {
            kind,
            session,
            received_at: Utc::now(),
        }
    }

    pub fn signed_in(session: Session) -> Self {
        Self::new(AuthEventKind::SignedIn, Some(session))
    }

    pub fn signed_out() -> Self {
        Self::new(AuthEventKind::SignedOut, None)
    }

    pub fn kind(&self) -> AuthEventKind {
        self.kind
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn into_session(self) -> Option<Session> {
        self.session
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Id of the user the session belongs to, if any.
    pub fn user_id(&self) -> Option<&UserId> {
        self.session.as_ref().map(|s| &s.user.id)
    }

    pub fn signature(&self) -> EventSignature {
        EventSignature {
            kind: self.kind,
            user_id: self.user_id().cloned(),
        }
    }
}

/// Dedup key for auth changes: event kind plus the affected user.
///
/// Token values and timestamps are deliberately not part of it; two
/// `SIGNED_IN` deliveries for the same user collapse into one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventSignature {
    pub kind: AuthEventKind,
    pub user_id: Option<UserId>,
}

impl core::fmt::Display for EventSignature {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.user_id {
            Some(id) => write!(f, "{}:{}", self.kind, id),
            None => write!(f, "{}:-", self.kind),
        }
    }
}
