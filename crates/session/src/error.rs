//! Errors surfaced by the explicit session actions.
//!
//! Everything recoverable (lookups, timeouts, initialization) degrades to a
//! safe default inside the subsystem and never reaches this type.

use thiserror::Error;

use nutritrack_auth::ProviderError;

/// Result type of the mutating session actions.
pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The identity provider refused or failed the request.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The action needs a mounted session but none is active.
    #[error("session manager is not mounted")]
    NotMounted,
}
