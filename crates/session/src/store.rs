//! The session read model.
//!
//! One `AuthSnapshot` is published through a `watch` channel. Writes are
//! compare-before-write: subscribers are only woken, and `revision` only
//! bumps, when a field actually changed.
//!
//! Each mount attaches its own [`MountId`]. Writes carry the id of the mount
//! that produced them and are dropped unless it is the attached one, so a
//! late result from an unmounted instance can never land in a newer mount.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use nutritrack_auth::{AuthorizationProfile, Identity, Role, Session};

/// Generation token of one mount.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MountId(Uuid);

impl MountId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MountId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for MountId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Everything the rest of the app may read about the current user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthSnapshot {
    pub user: Option<Identity>,
    pub session: Option<Session>,
    /// `true` until the first consistent state of the mount is known.
    pub loading: bool,
    pub is_authenticated: bool,
    /// `None` until resolved, and again after sign-out.
    pub user_role: Option<Role>,
    pub is_coach: bool,
    pub is_admin: bool,
}

impl Default for AuthSnapshot {
    fn default() -> Self {
        Self {
            user: None,
            session: None,
            loading: true,
            is_authenticated: false,
            user_role: None,
            is_coach: false,
            is_admin: false,
        }
    }
}

impl AuthSnapshot {
    /// Apply a resolved profile. Returns whether anything changed.
    pub(crate) fn apply_profile(&mut self, profile: &AuthorizationProfile) -> bool {
        let mut changed = assign(&mut self.user_role, Some(profile.role.clone()));
        changed |= assign(&mut self.is_coach, profile.is_coach);
        changed |= assign(&mut self.is_admin, profile.is_admin);
        changed
    }

    /// Forget the profile (signed out). Returns whether anything changed.
    pub(crate) fn clear_profile(&mut self) -> bool {
        let mut changed = assign(&mut self.user_role, None);
        changed |= assign(&mut self.is_coach, false);
        changed |= assign(&mut self.is_admin, false);
        changed
    }

    /// Replace session/user/authenticated from a session. Returns whether
    /// anything changed.
    pub(crate) fn apply_session(&mut self, session: Option<Session>, user: Option<Identity>) -> bool {
        let authenticated = session.is_some();
        let mut changed = assign(&mut self.session, session);
        changed |= assign(&mut self.user, user);
        changed |= assign(&mut self.is_authenticated, authenticated);
        changed
    }
}

/// Write `value` into `slot` only if it differs.
pub(crate) fn assign<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

/// Shared, observable session state.
#[derive(Debug)]
pub struct SessionStore {
    tx: watch::Sender<AuthSnapshot>,
    attached: Mutex<Option<MountId>>,
    revision: AtomicU64,
}

impl SessionStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AuthSnapshot::default());
        Self {
            tx,
            attached: Mutex::new(None),
            revision: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.tx.borrow().clone()
    }

    /// Receive every effective change from now on.
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.tx.subscribe()
    }

    /// Number of effective writes so far (attach included).
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub fn attached_mount(&self) -> Option<MountId> {
        *self.attached.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn user(&self) -> Option<Identity> {
        self.tx.borrow().user.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.tx.borrow().loading
    }

    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().is_authenticated
    }

    /// Start a new mount: reset to the initial snapshot and accept writes
    /// from `mount` only.
    pub(crate) fn attach(&self, mount: MountId) {
        let mut attached = self.attached.lock().unwrap_or_else(PoisonError::into_inner);
        *attached = Some(mount);
        self.tx.send_replace(AuthSnapshot::default());
        self.revision.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(%mount, "session store attached");
    }

    /// End `mount`; its later writes are rejected.
    pub(crate) fn detach(&self, mount: MountId) {
        let mut attached = self.attached.lock().unwrap_or_else(PoisonError::into_inner);
        if *attached == Some(mount) {
            *attached = None;
            tracing::debug!(%mount, "session store detached");
        }
    }

    /// Run `write` against the snapshot on behalf of `mount`.
    ///
    /// `write` must return whether it changed anything. Returns `true` only
    /// for an accepted, effective write.
    pub(crate) fn update(&self, mount: MountId, write: impl FnOnce(&mut AuthSnapshot) -> bool) -> bool {
        let attached = self.attached.lock().unwrap_or_else(PoisonError::into_inner);
        if *attached != Some(mount) {
            tracing::debug!(%mount, "dropping write from stale mount");
            return false;
        }

        let changed = self.tx.send_if_modified(write);
        if changed {
            let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
            let snap = self.tx.borrow();
            tracing::debug!(
                revision,
                loading = snap.loading,
                authenticated = snap.is_authenticated,
                user_role = ?snap.user_role,
                is_coach = snap.is_coach,
                is_admin = snap.is_admin,
                "session store updated"
            );
        }
        changed
    }

    /// End the loading phase. At most one effective call per mount.
    pub(crate) fn finish_loading(&self, mount: MountId) -> bool {
        self.update(mount, |snap| assign(&mut snap.loading, false))
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
