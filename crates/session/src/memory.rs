//! In-memory collaborators for tests and offline development.
//!
//! - No IO
//! - Provider state lives in a mutex; auth changes go out on an
//!   [`InMemoryAuthBus`] exactly like a hosted provider would push them
//! - Failures and latency are scripted per operation

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Semaphore;

use nutritrack_auth::{AuthResponse, Identity, ProviderError, Role, Session, SignUpRequest, UserUpdate};
use nutritrack_events::{AuthChange, AuthEventKind, InMemoryAuthBus, Subscription};

use crate::audit::{AuditRecord, AuditSink};
use crate::provider::{AuthorizationService, IdentityProvider};

#[derive(Debug, Clone)]
struct Account {
    password: String,
    identity: Identity,
    metadata: Value,
}

#[derive(Debug, Default)]
struct ProviderState {
    session: Option<Session>,
    accounts: HashMap<String, Account>,
    failures: HashMap<&'static str, ProviderError>,
    calls: Vec<&'static str>,
    sent_links: Vec<SentLink>,
    issued: u64,
}

/// An email the provider would have sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentLink {
    pub kind: &'static str,
    pub email: String,
    pub redirect_to: String,
}

/// Identity provider backed by process memory.
#[derive(Debug)]
pub struct InMemoryIdentityProvider {
    bus: Arc<InMemoryAuthBus>,
    state: Mutex<ProviderState>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl InMemoryIdentityProvider {
    pub fn new() -> Self {
        Self {
            bus: InMemoryAuthBus::new(),
            state: Mutex::new(ProviderState::default()),
            gate: Mutex::new(None),
        }
    }

    /// Start with `session` already stored.
    pub fn with_session(self, session: Session) -> Self {
        self.set_session(Some(session));
        self
    }

    /// Create an account that can sign in with `password`.
    pub fn register(&self, identity: Identity, password: &str) {
        let account = Account {
            password: password.to_string(),
            identity: identity.clone(),
            metadata: json!({}),
        };
        self.state().accounts.insert(identity.email, account);
    }

    /// Replace the stored session without notifying anyone.
    pub fn set_session(&self, session: Option<Session>) {
        self.state().session = session;
    }

    pub fn session(&self) -> Option<Session> {
        self.state().session.clone()
    }

    /// Push an auth change to every listener. Returns how many got it.
    pub fn emit(&self, kind: AuthEventKind, session: Option<Session>) -> usize {
        self.bus.publish(AuthChange::new(kind, session))
    }

    /// Make every later call of `operation` fail with `err`.
    pub fn fail(&self, operation: &'static str, err: ProviderError) {
        self.state().failures.insert(operation, err);
    }

    /// Make the startup session fetch fail.
    pub fn fail_fetch(&self, err: ProviderError) {
        self.fail("get_session", err);
    }

    /// `sign_out` still signs out and notifies, then reports `err`.
    pub fn fail_sign_out(&self, err: ProviderError) {
        self.fail("sign_out", err);
    }

    pub fn fail_subscribe(&self, err: ProviderError) {
        self.fail("on_auth_state_change", err);
    }

    /// Hold `get_session` until the returned gate is released.
    pub fn hold_fetches(&self) -> FetchGate {
        let semaphore = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&semaphore));
        FetchGate { semaphore }
    }

    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }

    /// Operations called so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    /// User metadata stored with the account registered under `email`.
    pub fn account_metadata(&self, email: &str) -> Option<Value> {
        self.state().accounts.get(email).map(|account| account.metadata.clone())
    }

    pub fn sent_links(&self) -> Vec<SentLink> {
        self.state().sent_links.clone()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the call and return its scripted failure, if any.
    fn enter(&self, operation: &'static str) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.calls.push(operation);
        match state.failures.get(operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn send_link(&self, kind: &'static str, email: &str, redirect_to: &str) {
        self.state().sent_links.push(SentLink {
            kind,
            email: email.to_string(),
            redirect_to: redirect_to.to_string(),
        });
    }

    async fn wait_for_gate(&self) {
        let gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(semaphore) = gate {
            // A closed semaphore means the gate was released.
            let _ = semaphore.acquire().await;
        }
    }
}

impl Default for InMemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn get_session(&self) -> Result<Option<Session>, ProviderError> {
        self.wait_for_gate().await;
        self.enter("get_session")?;
        Ok(self.session())
    }

    async fn get_current_user(&self) -> Result<Option<Identity>, ProviderError> {
        self.enter("get_current_user")?;
        Ok(self.session().map(|s| s.user))
    }

    fn on_auth_state_change(&self) -> Result<Subscription, ProviderError> {
        self.enter("on_auth_state_change")?;
        Ok(self.bus.subscribe())
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<AuthResponse, ProviderError> {
        self.enter("sign_in_with_password")?;

        let session = {
            let mut state = self.state();
            let identity = match state.accounts.get(email) {
                Some(account) if account.password == password => account.identity.clone(),
                _ => return Err(ProviderError::rejected("invalid login credentials")),
            };
            state.issued += 1;
            let session = Session::new(format!("access-{}", state.issued), identity)
                .with_refresh_token(format!("refresh-{}", state.issued));
            state.session = Some(session.clone());
            session
        };

        self.bus.publish(AuthChange::signed_in(session.clone()));
        Ok(AuthResponse::from_session(session))
    }

    async fn sign_up(&self, request: &SignUpRequest, redirect_to: &str) -> Result<AuthResponse, ProviderError> {
        self.enter("sign_up")?;

        let identity = {
            let mut state = self.state();
            if state.accounts.contains_key(&request.email) {
                return Err(ProviderError::rejected("user already registered"));
            }
            let metadata = request.metadata();
            let display_name = metadata
                .get("full_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let id = format!("user-{}", state.accounts.len() + 1);
            let identity = Identity::new(id, request.email.clone(), display_name);
            state.accounts.insert(
                request.email.clone(),
                Account {
                    password: request.password.clone(),
                    identity: identity.clone(),
                    metadata,
                },
            );
            identity
        };

        // Email confirmation pending: no session yet.
        self.send_link("confirm_signup", &request.email, redirect_to);
        Ok(AuthResponse {
            user: Some(identity),
            session: None,
        })
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        let outcome = self.enter("sign_out");

        self.set_session(None);
        self.bus.publish(AuthChange::signed_out());
        outcome
    }

    async fn sign_in_with_otp(&self, email: &str, redirect_to: &str) -> Result<(), ProviderError> {
        self.enter("sign_in_with_otp")?;
        self.send_link("magic_link", email, redirect_to);
        Ok(())
    }

    async fn reset_password_for_email(&self, email: &str, redirect_to: &str) -> Result<(), ProviderError> {
        self.enter("reset_password_for_email")?;
        self.send_link("recovery", email, redirect_to);
        Ok(())
    }

    async fn update_user(&self, update: &UserUpdate) -> Result<Identity, ProviderError> {
        self.enter("update_user")?;

        let session = {
            let mut state = self.state();
            let Some(mut session) = state.session.clone() else {
                return Err(ProviderError::rejected("not signed in"));
            };
            let full_name = update
                .data
                .as_ref()
                .and_then(|data| data.get("full_name"))
                .and_then(|name| name.as_str());
            if let Some(name) = full_name {
                session.user.display_name = name.to_string();
            }
            if let Some(password) = &update.password {
                if let Some(account) = state.accounts.get_mut(&session.user.email) {
                    account.password = password.clone();
                }
            }
            state.session = Some(session.clone());
            session
        };

        let identity = session.user.clone();
        self.bus.publish(AuthChange::new(AuthEventKind::UserUpdated, Some(session)));
        Ok(identity)
    }
}

/// Releases calls held by [`InMemoryIdentityProvider::hold_fetches`].
#[derive(Debug)]
pub struct FetchGate {
    semaphore: Arc<Semaphore>,
}

impl FetchGate {
    pub fn release(&self) {
        self.semaphore.close();
    }
}

/// One scripted answer of an authorization lookup.
#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ready(T),
    Fail(String),
    Delayed(Duration, T),
    /// Never answers.
    Pending,
}

impl<T: Clone> Reply<T> {
    async fn play(&self) -> Result<T, ProviderError> {
        match self {
            Reply::Ready(value) => Ok(value.clone()),
            Reply::Fail(msg) => Err(ProviderError::network(msg.clone())),
            Reply::Delayed(delay, value) => {
                tokio::time::sleep(*delay).await;
                Ok(value.clone())
            }
            Reply::Pending => std::future::pending().await,
        }
    }
}

/// Authorization service answering from a script.
///
/// Unscripted lookups answer like a plain user.
#[derive(Debug)]
pub struct ScriptedAuthorizationService {
    role: Reply<Role>,
    coach: Reply<bool>,
    admin: Reply<bool>,
    calls: AtomicUsize,
}

impl ScriptedAuthorizationService {
    pub fn new() -> Self {
        Self {
            role: Reply::Ready(Role::user()),
            coach: Reply::Ready(false),
            admin: Reply::Ready(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_role(mut self, reply: Reply<Role>) -> Self {
        self.role = reply;
        self
    }

    pub fn with_coach(mut self, reply: Reply<bool>) -> Self {
        self.coach = reply;
        self
    }

    pub fn with_admin(mut self, reply: Reply<bool>) -> Self {
        self.admin = reply;
        self
    }

    /// How many role lookups were made (one per resolution).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedAuthorizationService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthorizationService for ScriptedAuthorizationService {
    async fn user_role(&self) -> Result<Role, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.role.play().await
    }

    async fn is_coach(&self) -> Result<bool, ProviderError> {
        self.coach.play().await
    }

    async fn is_admin(&self) -> Result<bool, ProviderError> {
        self.admin.play().await
    }
}

/// Audit sink that keeps every record.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Action names in write order.
    pub fn actions(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.action).collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write(&self, record: AuditRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }
}

/// A mount context attached to a fresh store, outside any manager.
#[cfg(test)]
pub(crate) fn test_context(
    provider: Arc<dyn IdentityProvider>,
    service: Arc<dyn AuthorizationService>,
    role_timeout: Duration,
) -> Arc<crate::mount::MountContext> {
    use crate::audit::{AuditLog, NullAuditSink};
    use crate::config::SessionConfig;
    use crate::demo::{DemoMode, InMemoryPreferences};
    use crate::resolver::AuthorizationResolver;
    use crate::store::SessionStore;

    let store = Arc::new(SessionStore::new());
    let demo = DemoMode::new(Arc::new(InMemoryPreferences::new()), &SessionConfig::default());
    let audit = AuditLog::new(Arc::new(NullAuditSink), Arc::new(|| None), demo);
    let ctx = Arc::new(crate::mount::MountContext::new(
        Arc::clone(&store),
        provider,
        AuthorizationResolver::new(service, role_timeout),
        audit,
    ));
    store.attach(ctx.id);
    ctx
}
