//! `nutritrack-auth`: identity model shared by the client session layer.
//!
//! Pure data: no IO, no async. The identity provider and the authorization
//! service live behind traits in `nutritrack-session`.

pub mod error;
pub mod identity;
pub mod profile;
pub mod requests;
pub mod roles;
pub mod session;

pub use error::ProviderError;
pub use identity::{Identity, UserId};
pub use profile::AuthorizationProfile;
pub use requests::{AuthResponse, SignUpRequest, UserUpdate};
pub use roles::Role;
pub use session::Session;
