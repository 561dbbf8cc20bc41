use thiserror::Error;

/// Failure reported by an external identity or authorization service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider answered and refused the request (bad credentials,
    /// unknown email, weak password, ...).
    #[error("provider rejected request: {0}")]
    Rejected(String),

    /// The request never got a usable answer.
    #[error("network error: {0}")]
    Network(String),

    /// The provider is not reachable or not configured.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}
