//! Session subsystem configuration.

use std::time::Duration;

/// Upper bound for resolving role/coach/admin after sign-in.
pub const DEFAULT_ROLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for the initial `loading` phase of a mount.
pub const DEFAULT_LOADING_FALLBACK: Duration = Duration::from_secs(10);

pub const DEFAULT_REDIRECT_BASE: &str = "http://localhost:5173";

const PRODUCTION: &str = "production";

/// Session manager configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Deadline shared by the three authorization lookups.
    pub role_timeout: Duration,
    /// After this long `loading` is forced false no matter what.
    pub loading_fallback: Duration,
    /// Origin used to build email redirect links.
    pub redirect_base: String,
    /// Deployment environment name (`development`, `production`, ...).
    pub app_env: String,
    /// Demo mode forced on by the environment.
    pub demo_mode_env: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role_timeout: DEFAULT_ROLE_TIMEOUT,
            loading_fallback: DEFAULT_LOADING_FALLBACK,
            redirect_base: DEFAULT_REDIRECT_BASE.to_string(),
            app_env: "development".to_string(),
            demo_mode_env: false,
        }
    }
}

impl SessionConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup`; unset keys keep their defaults and
    /// unparsable values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(ms) = parse_millis(&lookup, "NUTRITRACK_ROLE_TIMEOUT_MS") {
            config.role_timeout = ms;
        }
        if let Some(ms) = parse_millis(&lookup, "NUTRITRACK_LOADING_TIMEOUT_MS") {
            config.loading_fallback = ms;
        }
        if let Some(base) = lookup("NUTRITRACK_REDIRECT_BASE") {
            config.redirect_base = base.trim_end_matches('/').to_string();
        }
        if let Some(env) = lookup("NUTRITRACK_APP_ENV") {
            config.app_env = env;
        }
        config.demo_mode_env = lookup("NUTRITRACK_DEMO_MODE").as_deref() == Some("true");

        config
    }

    pub fn with_role_timeout(mut self, timeout: Duration) -> Self {
        self.role_timeout = timeout;
        self
    }

    pub fn with_loading_fallback(mut self, fallback: Duration) -> Self {
        self.loading_fallback = fallback;
        self
    }

    pub fn with_redirect_base(mut self, base: impl Into<String>) -> Self {
        self.redirect_base = base.into();
        self
    }

    pub fn with_app_env(mut self, env: impl Into<String>) -> Self {
        self.app_env = env.into();
        self
    }

    pub fn with_demo_mode_env(mut self, enabled: bool) -> Self {
        self.demo_mode_env = enabled;
        self
    }

    pub fn is_production(&self) -> bool {
        self.app_env == PRODUCTION
    }

    /// Absolute URL for an app route, used in emailed links.
    pub fn redirect_url(&self, path: &str) -> String {
        format!("{}{}", self.redirect_base, path)
    }
}

fn parse_millis(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(err) => {
            tracing::warn!(key, value = %raw, error = %err, "ignoring invalid duration override");
            None
        }
    }
}
