//! Public surface of the session layer.
//!
//! A `SessionManager` owns one [`SessionStore`] and mounts/unmounts the
//! machinery that keeps it in sync with the identity provider. Account
//! actions pass straight through to the provider; their effect on the store
//! arrives through the auth change stream like any other change.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Value, json};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use nutritrack_auth::{AuthResponse, Identity, ProviderError, Session, SignUpRequest, UserUpdate};

use crate::audit::{ActorAccessor, AuditLog, AuditSink, NullAuditSink};
use crate::config::SessionConfig;
use crate::demo::{DemoMode, InMemoryPreferences, PreferenceStore};
use crate::error::{SessionError, SessionResult};
use crate::initializer;
use crate::mount::MountContext;
use crate::provider::{AuthorizationService, IdentityProvider};
use crate::reconciler::{self, Listener};
use crate::resolver::AuthorizationResolver;
use crate::store::{AuthSnapshot, MountId, SessionStore};

const COMPONENT: &str = "Auth";

pub const AUTH_CALLBACK_PATH: &str = "/auth/callback";
pub const RESET_PASSWORD_PATH: &str = "/auth/reset-password";

/// Everything owned by the current mount.
struct Mounted {
    ctx: Arc<MountContext>,
    shutdown: Arc<Notify>,
    listener: Option<Listener>,
    fallback: Option<JoinHandle<()>>,
}

pub struct SessionManager {
    provider: Arc<dyn IdentityProvider>,
    resolver: AuthorizationResolver,
    config: SessionConfig,
    store: Arc<SessionStore>,
    sink: Arc<dyn AuditSink>,
    demo: DemoMode,
    audit: AuditLog,
    mounted: Mutex<Option<Mounted>>,
}

impl SessionManager {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        authorization: Arc<dyn AuthorizationService>,
        config: SessionConfig,
    ) -> Self {
        let store = Arc::new(SessionStore::new());
        let sink: Arc<dyn AuditSink> = Arc::new(NullAuditSink);
        let demo = DemoMode::new(Arc::new(InMemoryPreferences::new()), &config);
        let audit = AuditLog::new(Arc::clone(&sink), current_actor(&store), demo.clone());

        Self {
            provider,
            resolver: AuthorizationResolver::new(authorization, config.role_timeout),
            config,
            store,
            sink,
            demo,
            audit,
            mounted: Mutex::new(None),
        }
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = sink;
        self.rebuild_audit();
        self
    }

    /// Where the demo toggle and demo role are persisted.
    pub fn with_preferences(mut self, prefs: Arc<dyn PreferenceStore>) -> Self {
        self.demo = DemoMode::new(prefs, &self.config);
        self.rebuild_audit();
        self
    }

    fn rebuild_audit(&mut self) {
        self.audit = AuditLog::new(Arc::clone(&self.sink), current_actor(&self.store), self.demo.clone());
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.store.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn demo(&self) -> &DemoMode {
        &self.demo
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn mount_id(&self) -> Option<MountId> {
        self.mounted().as_ref().map(|m| m.ctx.id)
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted().is_some()
    }

    /// Start tracking the session. Idempotent while mounted.
    ///
    /// In demo mode the synthetic identity is in the store when this
    /// returns. Otherwise startup and the event listener run in the
    /// background; call from within a Tokio runtime.
    pub fn mount(&self) -> MountId {
        let mut mounted = self.mounted();
        if let Some(current) = mounted.as_ref() {
            return current.ctx.id;
        }

        let ctx = Arc::new(MountContext::new(
            Arc::clone(&self.store),
            Arc::clone(&self.provider),
            self.resolver.clone(),
            self.audit.clone(),
        ));
        let id = ctx.id;
        self.store.attach(id);
        let shutdown = Arc::new(Notify::new());

        if self.demo.is_enabled() {
            tracing::info!(mount = %id, role = self.demo.role().as_str(), "mounting in demo mode");
            initializer::run_demo(&ctx, &self.demo.identity());
            *mounted = Some(Mounted {
                ctx,
                shutdown,
                listener: None,
                fallback: None,
            });
            return id;
        }

        tracing::info!(mount = %id, "mounting session");
        // Claims the initializing phase before the listener can admit
        // anything.
        let _startup = initializer::start(&ctx);

        let listener = match reconciler::install(&ctx, Arc::clone(&shutdown)) {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!(mount = %id, error = %err, "failed to subscribe to auth changes");
                None
            }
        };

        let fallback = {
            let ctx = Arc::clone(&ctx);
            let after = self.config.loading_fallback;
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                ctx.force_ready();
            })
        };

        *mounted = Some(Mounted {
            ctx,
            shutdown,
            listener,
            fallback: Some(fallback),
        });
        id
    }

    /// Stop tracking the session. Returns `false` if nothing was mounted.
    ///
    /// Provider calls already in flight keep running; whatever they
    /// produce is rejected by the store.
    pub fn unmount(&self) -> bool {
        let Some(mounted) = self.mounted().take() else {
            return false;
        };
        let Mounted {
            ctx,
            shutdown,
            listener,
            fallback,
        } = mounted;

        shutdown.notify_one();
        if let Some(fallback) = fallback {
            fallback.abort();
        }
        if let Some(listener) = listener {
            listener.task.abort();
            listener.subscription.unsubscribe();
        }

        let mut guard = ctx.guard();
        self.store.detach(ctx.id);
        guard.reset();
        tracing::info!(mount = %ctx.id, "session unmounted");
        true
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> SessionResult<AuthResponse> {
        if self.demo.is_enabled() {
            return self.demo_sign_in(email);
        }

        let result = self.provider.sign_in_with_password(email, password).await;
        self.audited(
            result,
            "SIGN_IN_SUCCESS",
            "SIGN_IN_ERROR",
            json!({ "method": "email_password" }),
        )
    }

    pub async fn sign_up(&self, email: &str, password: &str, full_name: &str) -> SessionResult<AuthResponse> {
        let request = SignUpRequest::new(email, password, full_name);
        let redirect_to = self.config.redirect_url(AUTH_CALLBACK_PATH);

        let result = self.provider.sign_up(&request, &redirect_to).await;
        self.audited(result, "SIGN_UP_SUCCESS", "SIGN_UP_ERROR", json!({ "email": email }))
    }

    /// Ask the provider to sign out.
    ///
    /// The store is cleared when the resulting `SIGNED_OUT` change is
    /// reconciled, whether or not this call reports an error. In demo mode
    /// the store is cleared before this returns.
    pub async fn sign_out(&self) -> SessionResult<()> {
        if self.demo.is_enabled() {
            return self.demo_sign_out();
        }

        let result = self.provider.sign_out().await;
        self.audited(result, "SIGN_OUT_SUCCESS", "SIGN_OUT_ERROR", json!({}))
    }

    pub async fn sign_in_with_magic_link(&self, email: &str) -> SessionResult<()> {
        let redirect_to = self.config.redirect_url(AUTH_CALLBACK_PATH);
        let result = self.provider.sign_in_with_otp(email, &redirect_to).await;
        self.audited(result, "MAGIC_LINK_SENT", "MAGIC_LINK_ERROR", json!({ "email": email }))
    }

    pub async fn reset_password(&self, email: &str) -> SessionResult<()> {
        let redirect_to = self.config.redirect_url(RESET_PASSWORD_PATH);
        let result = self.provider.reset_password_for_email(email, &redirect_to).await;
        self.audited(
            result,
            "PASSWORD_RESET_REQUESTED",
            "PASSWORD_RESET_ERROR",
            json!({ "email": email }),
        )
    }

    pub async fn update_password(&self, new_password: &str) -> SessionResult<()> {
        let result = self.provider.update_user(&UserUpdate::password(new_password)).await;
        self.audited(result.map(drop), "PASSWORD_UPDATED", "PASSWORD_UPDATE_ERROR", json!({}))
    }

    /// Update user metadata (`full_name`, ...).
    pub async fn update_profile(&self, data: Value) -> SessionResult<Identity> {
        let details = json!({ "updates": data });
        let result = self.provider.update_user(&UserUpdate::data(data)).await;
        self.audited(result, "PROFILE_UPDATED", "PROFILE_UPDATE_ERROR", details)
    }

    fn demo_sign_in(&self, email: &str) -> SessionResult<AuthResponse> {
        let ctx = self.current()?;
        let demo = self.demo.identity();

        initializer::write_demo_identity(&ctx, &demo);
        ctx.finish_loading();

        self.audit.info(
            COMPONENT,
            "DEMO_SIGN_IN_SUCCESS",
            json!({ "email": email }),
        );
        Ok(AuthResponse::from_session(Session::demo(demo.identity)))
    }

    fn demo_sign_out(&self) -> SessionResult<()> {
        let ctx = self.current()?;

        let mut guard = ctx.guard();
        ctx.write(|snap| {
            let mut changed = snap.apply_session(None, None);
            changed |= snap.clear_profile();
            changed | crate::store::assign(&mut snap.loading, false)
        });
        guard.reset_roles();
        drop(guard);

        self.audit.info(COMPONENT, "DEMO_SIGN_OUT_SUCCESS", json!({}));
        Ok(())
    }

    /// Audit the outcome of a provider action and hand it back.
    ///
    /// `details` go with the success record only; failures record just the
    /// error message.
    fn audited<T>(
        &self,
        result: Result<T, ProviderError>,
        success: &str,
        failure: &str,
        details: Value,
    ) -> SessionResult<T> {
        match result {
            Ok(value) => {
                self.audit.info(COMPONENT, success, details);
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(action = failure, error = %err, "auth action failed");
                self.audit.error(COMPONENT, failure, json!({ "error": err.to_string() }));
                Err(err.into())
            }
        }
    }

    fn current(&self) -> SessionResult<Arc<MountContext>> {
        self.mounted()
            .as_ref()
            .map(|m| Arc::clone(&m.ctx))
            .ok_or(SessionError::NotMounted)
    }

    fn mounted(&self) -> MutexGuard<'_, Option<Mounted>> {
        self.mounted.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl core::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("mount", &self.mount_id())
            .field("demo", &self.demo)
            .finish_non_exhaustive()
    }
}

/// The signed-in user's email, read from this manager's store.
fn current_actor(store: &Arc<SessionStore>) -> ActorAccessor {
    let store = Arc::clone(store);
    Arc::new(move || store.user().map(|user| user.email))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::memory::{InMemoryIdentityProvider, MemoryAuditSink, ScriptedAuthorizationService};

    fn manager(provider: Arc<InMemoryIdentityProvider>) -> SessionManager {
        SessionManager::new(
            provider,
            Arc::new(ScriptedAuthorizationService::new()),
            SessionConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn mount_is_idempotent() {
        let provider = Arc::new(InMemoryIdentityProvider::new());
        let manager = manager(provider.clone());

        let first = manager.mount();
        let second = manager.mount();
        assert_eq!(first, second);
        assert_eq!(provider.subscriber_count(), 1);

        assert!(manager.unmount());
        assert!(!manager.unmount());
        assert_eq!(provider.subscriber_count(), 0);
        assert_eq!(manager.store().attached_mount(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn remount_gets_a_fresh_generation() {
        let provider = Arc::new(InMemoryIdentityProvider::new());
        let manager = manager(provider);

        let first = manager.mount();
        manager.unmount();
        let second = manager.mount();
        assert_ne!(first, second);
        assert_eq!(manager.store().attached_mount(), Some(second));
        assert!(manager.snapshot().loading);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_action_is_audited_and_returned() {
        let provider = Arc::new(InMemoryIdentityProvider::new());
        let sink = Arc::new(MemoryAuditSink::new());
        let manager = manager(provider.clone()).with_audit_sink(sink.clone());
        provider.set_session(Some(Session::new("t", Identity::new("u1", "a@example.com", "A"))));
        manager.mount();
        tokio::time::sleep(Duration::from_millis(10)).await;

        provider.fail("sign_in_with_otp", ProviderError::rejected("rate limited"));
        let err = manager.sign_in_with_magic_link("a@example.com").await.unwrap_err();
        assert!(matches!(err, SessionError::Provider(ProviderError::Rejected(_))));

        tokio::time::sleep(Duration::from_millis(10)).await;
        let record = sink
            .records()
            .into_iter()
            .find(|r| r.action == "MAGIC_LINK_ERROR")
            .unwrap();
        assert_eq!(record.user_email, "a@example.com");
        let details: Value = serde_json::from_str(&record.details).unwrap();
        assert_eq!(details, json!({ "error": "provider rejected request: rate limited" }));
    }

    #[tokio::test(start_paused = true)]
    async fn sign_in_audits_the_method_not_the_credentials() {
        let provider = Arc::new(InMemoryIdentityProvider::new());
        let sink = Arc::new(MemoryAuditSink::new());
        let manager = manager(provider.clone()).with_audit_sink(sink.clone());
        let alice = Identity::new("u1", "a@example.com", "A");
        provider.register(alice.clone(), "pw");
        provider.set_session(Some(Session::new("t", alice)));
        manager.mount();
        tokio::time::sleep(Duration::from_millis(10)).await;

        manager.sign_in("a@example.com", "pw").await.unwrap();
        provider.fail("sign_in_with_password", ProviderError::rejected("invalid login credentials"));
        manager.sign_in("a@example.com", "wrong").await.unwrap_err();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let details = |action: &str| -> Value {
            let record = sink.records().into_iter().find(|r| r.action == action).unwrap();
            serde_json::from_str(&record.details).unwrap()
        };
        assert_eq!(details("SIGN_IN_SUCCESS"), json!({ "method": "email_password" }));
        assert_eq!(
            details("SIGN_IN_ERROR"),
            json!({ "error": "provider rejected request: invalid login credentials" })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn demo_actions_need_a_mount() {
        let manager = manager(Arc::new(InMemoryIdentityProvider::new()));
        manager.demo().enable();

        assert!(matches!(manager.sign_out().await, Err(SessionError::NotMounted)));
        assert!(matches!(
            manager.sign_in("demo@example.com", "x").await,
            Err(SessionError::NotMounted)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn redirects_use_the_configured_base() {
        let provider = Arc::new(InMemoryIdentityProvider::new());
        let manager = SessionManager::new(
            provider.clone(),
            Arc::new(ScriptedAuthorizationService::new()),
            SessionConfig::default().with_redirect_base("https://app.example.com"),
        );

        manager.reset_password("a@example.com").await.unwrap();
        manager.sign_in_with_magic_link("a@example.com").await.unwrap();

        let links = provider.sent_links();
        assert_eq!(links[0].redirect_to, "https://app.example.com/auth/reset-password");
        assert_eq!(links[1].redirect_to, "https://app.example.com/auth/callback");
    }
}
