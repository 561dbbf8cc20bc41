//! External collaborators the session layer talks to.
//!
//! Only the interface is specified here; wire protocols, token storage and
//! the RPCs behind the authorization checks belong to the implementations.

use async_trait::async_trait;

use nutritrack_auth::{AuthResponse, Identity, ProviderError, Role, Session, SignUpRequest, UserUpdate};
use nutritrack_events::Subscription;

/// Hosted identity provider (sessions, sign-in flows, auth change stream).
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Currently stored session, if any.
    async fn get_session(&self) -> Result<Option<Session>, ProviderError>;

    /// User the stored session belongs to, if any.
    async fn get_current_user(&self) -> Result<Option<Identity>, ProviderError>;

    /// Start receiving auth state changes.
    ///
    /// Every change published after this returns is queued on the
    /// subscription in order.
    fn on_auth_state_change(&self) -> Result<Subscription, ProviderError>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthResponse, ProviderError>;

    /// `redirect_to` is where the confirmation email sends the user.
    async fn sign_up(&self, request: &SignUpRequest, redirect_to: &str) -> Result<AuthResponse, ProviderError>;

    async fn sign_out(&self) -> Result<(), ProviderError>;

    /// Passwordless sign-in: emails a magic link.
    async fn sign_in_with_otp(&self, email: &str, redirect_to: &str) -> Result<(), ProviderError>;

    async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> Result<(), ProviderError>;

    async fn update_user(&self, update: &UserUpdate) -> Result<Identity, ProviderError>;
}

/// Server-side authorization lookups for the signed-in user.
#[async_trait]
pub trait AuthorizationService: Send + Sync {
    async fn user_role(&self) -> Result<Role, ProviderError>;

    async fn is_coach(&self) -> Result<bool, ProviderError>;

    async fn is_admin(&self) -> Result<bool, ProviderError>;
}
