//! State shared by everything running on behalf of one mount.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::json;
use tracing::Instrument;

use nutritrack_auth::{AuthorizationProfile, Identity};
use nutritrack_events::AuthEventKind;

use crate::audit::AuditLog;
use crate::lifecycle::{LifecycleGuard, RoleTicket};
use crate::provider::IdentityProvider;
use crate::resolver::AuthorizationResolver;
use crate::store::{AuthSnapshot, MountId, SessionStore};

/// Per-mount context handed to the Initializer, the EventReconciler and the
/// timers.
///
/// Lock order: `guard` before the store. Store writes that depend on a
/// guard decision are made while the guard is still held.
pub(crate) struct MountContext {
    pub(crate) id: MountId,
    guard: Mutex<LifecycleGuard>,
    pub(crate) store: Arc<SessionStore>,
    pub(crate) provider: Arc<dyn IdentityProvider>,
    pub(crate) resolver: AuthorizationResolver,
    pub(crate) audit: AuditLog,
}

impl MountContext {
    pub(crate) fn new(
        store: Arc<SessionStore>,
        provider: Arc<dyn IdentityProvider>,
        resolver: AuthorizationResolver,
        audit: AuditLog,
    ) -> Self {
        Self {
            id: MountId::new(),
            guard: Mutex::new(LifecycleGuard::new()),
            store,
            provider,
            resolver,
            audit,
        }
    }

    pub(crate) fn guard(&self) -> MutexGuard<'_, LifecycleGuard> {
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write to the store as this mount.
    pub(crate) fn write(&self, write: impl FnOnce(&mut AuthSnapshot) -> bool) -> bool {
        self.store.update(self.id, write)
    }

    /// Whether the store still accepts writes from this mount.
    pub(crate) fn is_attached(&self) -> bool {
        self.store.attached_mount() == Some(self.id)
    }

    pub(crate) fn finish_loading(&self) -> bool {
        self.store.finish_loading(self.id)
    }

    /// Fallback timer fired: end loading and stop gating events on startup.
    pub(crate) fn force_ready(&self) {
        let mut guard = self.guard();
        let opened = guard.force_ready();
        let ended = self.finish_loading();
        drop(guard);

        if opened || ended {
            tracing::warn!(mount = %self.id, "loading fallback reached; forcing ready");
        }
    }

    /// Resolve the profile for `identity` in the background and apply it if
    /// `ticket` is still current when it settles.
    pub(crate) fn spawn_role_resolution(
        self: &Arc<Self>,
        identity: Identity,
        ticket: RoleTicket,
        trigger: RoleTrigger,
    ) {
        let ctx = Arc::clone(self);
        let span = tracing::info_span!("role_resolution", mount = %self.id, user_id = %identity.id);

        tokio::spawn(
            async move {
                let profile = ctx.resolver.resolve(&identity).await;
                if ctx.apply_profile(ticket, &profile) {
                    ctx.audit_profile(&identity, &profile, trigger);
                } else {
                    tracing::debug!("discarding authorization profile for a superseded sign-in");
                }
            }
            .instrument(span),
        );
    }

    fn apply_profile(&self, ticket: RoleTicket, profile: &AuthorizationProfile) -> bool {
        let mut guard = self.guard();
        if !guard.settle_role_fetch(ticket) {
            return false;
        }
        self.write(|snap| snap.apply_profile(profile));
        true
    }

    fn audit_profile(&self, identity: &Identity, profile: &AuthorizationProfile, trigger: RoleTrigger) {
        let mut details = json!({
            "userId": identity.id,
            "role": profile.role,
            "isCoach": profile.is_coach,
            "isAdmin": profile.is_admin,
        });
        let action = match trigger {
            RoleTrigger::Restored => "SESSION_RESTORED",
            RoleTrigger::Event(kind) => {
                details["event"] = json!(kind);
                "AUTH_STATE_CHANGED"
            }
        };
        self.audit.info("Auth", action, details);
    }
}

/// What caused a profile resolution; decides the audit action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RoleTrigger {
    /// Startup found an existing session.
    Restored,
    /// A pushed auth change.
    Event(AuthEventKind),
}
