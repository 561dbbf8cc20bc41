//! Demo mode: a local bypass of the identity provider.
//!
//! When enabled the session layer never talks to the provider. A synthetic
//! identity is picked from a stored role preference and written straight
//! into the store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;

use nutritrack_auth::{AuthorizationProfile, Identity, Role};

use crate::config::SessionConfig;

pub const DEMO_MODE_KEY: &str = "nutri-track-demo-mode";
pub const DEMO_ROLE_KEY: &str = "nutri-track-demo-role";

/// Small persistent key/value store for client preferences.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&self, key: &str, value: &str);

    fn remove(&self, key: &str);
}

/// Process-local preferences (tests, headless runs).
#[derive(Debug, Default)]
pub struct InMemoryPreferences {
    values: Mutex<HashMap<String, String>>,
}

impl InMemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for InMemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// Which synthetic user to impersonate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DemoRole {
    #[default]
    User,
    Coach,
    Admin,
}

impl DemoRole {
    /// Parse the stored preference; anything unknown means a plain user.
    pub fn from_preference(value: Option<&str>) -> Self {
        match value {
            Some("admin") => DemoRole::Admin,
            Some("coach") => DemoRole::Coach,
            _ => DemoRole::User,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DemoRole::User => "user",
            DemoRole::Coach => "coach",
            DemoRole::Admin => "admin",
        }
    }
}

/// Synthetic identity plus the authorization it comes with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoIdentity {
    pub identity: Identity,
    pub profile: AuthorizationProfile,
}

impl DemoIdentity {
    pub fn for_role(role: DemoRole) -> Self {
        let now = Utc::now();
        let (id, email, name, profile) = match role {
            DemoRole::User => (
                "demo-user-123",
                "demo@example.com",
                "Demo User",
                AuthorizationProfile::new(Role::user(), false, false),
            ),
            // Coaches are plain users with the coach flag set.
            DemoRole::Coach => (
                "demo-coach-123",
                "coach@example.com",
                "Demo Coach",
                AuthorizationProfile::new(Role::user(), true, false),
            ),
            DemoRole::Admin => (
                "demo-admin-123",
                "admin@example.com",
                "Demo Admin",
                AuthorizationProfile::new(Role::admin(), true, true),
            ),
        };

        Self {
            identity: Identity::new(id, email, name).stamped(now),
            profile,
        }
    }
}

/// Demo mode switch backed by a preference store and the environment.
#[derive(Clone)]
pub struct DemoMode {
    prefs: Arc<dyn PreferenceStore>,
    production: bool,
    forced: bool,
}

impl DemoMode {
    pub fn new(prefs: Arc<dyn PreferenceStore>, config: &SessionConfig) -> Self {
        Self {
            prefs,
            production: config.is_production(),
            forced: config.demo_mode_env,
        }
    }

    /// Production builds only allow demo mode when the environment asks for
    /// it explicitly; the stored toggle is ignored there.
    pub fn is_enabled(&self) -> bool {
        if self.production && !self.forced {
            return false;
        }
        self.forced || self.prefs.get(DEMO_MODE_KEY).as_deref() == Some("true")
    }

    pub fn enable(&self) {
        self.prefs.set(DEMO_MODE_KEY, "true");
        tracing::info!("demo mode enabled");
    }

    pub fn disable(&self) {
        self.prefs.remove(DEMO_MODE_KEY);
        tracing::info!("demo mode disabled");
    }

    pub fn toggle(&self) {
        if self.is_enabled() {
            self.disable();
        } else {
            self.enable();
        }
    }

    pub fn role(&self) -> DemoRole {
        DemoRole::from_preference(self.prefs.get(DEMO_ROLE_KEY).as_deref())
    }

    pub fn set_role(&self, role: DemoRole) {
        self.prefs.set(DEMO_ROLE_KEY, role.as_str());
    }

    pub fn identity(&self) -> DemoIdentity {
        DemoIdentity::for_role(self.role())
    }
}

impl core::fmt::Debug for DemoMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DemoMode")
            .field("production", &self.production)
            .field("forced", &self.forced)
            .finish_non_exhaustive()
    }
}
