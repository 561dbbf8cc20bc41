use serde::{Deserialize, Serialize};

use crate::Role;

/// Permission flags derived for a signed-in user.
///
/// Resolved asynchronously after sign-in; until then consumers see the
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationProfile {
    pub role: Role,
    pub is_coach: bool,
    pub is_admin: bool,
}

impl AuthorizationProfile {
    pub fn new(role: Role, is_coach: bool, is_admin: bool) -> Self {
        Self {
            role,
            is_coach,
            is_admin,
        }
    }
}

impl Default for AuthorizationProfile {
    fn default() -> Self {
        Self {
            role: Role::user(),
            is_coach: false,
            is_admin: false,
        }
    }
}
