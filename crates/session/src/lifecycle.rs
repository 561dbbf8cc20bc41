//! Lifecycle guard for one mount of the session layer.
//!
//! Sequences the Initializer and the EventReconciler: which auth changes are
//! admitted, whether the listener is installed, whether the authorization
//! profile still needs fetching, and whether the startup result may still be
//! written. Pure state, no IO; callers hold it behind a lock and consult it
//! before touching the store.

use nutritrack_events::{AuthChange, AuthEventKind, EventSignature};

/// Initialization phase of a mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Uninit,
    Initializing,
    Ready,
}

/// Whether the auth change listener is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenerState {
    #[default]
    Uninstalled,
    Active,
}

/// Progress of the authorization profile fetch for the current sign-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoleFetch {
    #[default]
    Idle,
    InFlight,
    Fetched,
}

/// Proof that a role fetch was claimed; settles only within its epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleTicket {
    epoch: u64,
}

/// Why an auth change was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Startup is still running and the change is not a sign-in.
    Initializing,
    /// Replay of the stored session; startup already read it.
    InitialSession,
    /// Same kind and user as the previously applied change.
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Apply,
    Skip(SkipReason),
}

/// Remembers the signature of the last applied change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupCache {
    last: Option<EventSignature>,
}

impl DedupCache {
    /// Record `signature`; `false` if it repeats the previous one.
    pub fn observe(&mut self, signature: EventSignature) -> bool {
        if self.last.as_ref() == Some(&signature) {
            return false;
        }
        self.last = Some(signature);
        true
    }

    pub fn last(&self) -> Option<&EventSignature> {
        self.last.as_ref()
    }

    pub fn clear(&mut self) {
        self.last = None;
    }
}

#[derive(Debug, Clone, Default)]
pub struct LifecycleGuard {
    phase: Phase,
    listener: ListenerState,
    roles: RoleFetch,
    role_epoch: u64,
    dedup: DedupCache,
    superseded: bool,
    startup_settled: bool,
}

impl LifecycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn listener(&self) -> ListenerState {
        self.listener
    }

    pub fn role_fetch(&self) -> RoleFetch {
        self.roles
    }

    pub fn roles_fetched(&self) -> bool {
        self.roles == RoleFetch::Fetched
    }

    /// Anything before `Ready` counts as initializing.
    pub fn is_initializing(&self) -> bool {
        self.phase != Phase::Ready
    }

    pub fn last_signature(&self) -> Option<&EventSignature> {
        self.dedup.last()
    }

    /// `Uninit -> Initializing`. Returns `false` if startup already ran.
    pub fn begin_init(&mut self) -> bool {
        if self.phase != Phase::Uninit {
            return false;
        }
        self.phase = Phase::Initializing;
        true
    }

    /// Startup is over, whatever it produced.
    pub fn finish_init(&mut self) {
        self.phase = Phase::Ready;
        self.startup_settled = true;
    }

    /// Fallback path: stop waiting on startup. Returns `true` if this
    /// actually ended the initializing phase.
    ///
    /// Startup may still be running afterwards; it stays unsettled until it
    /// reports through [`LifecycleGuard::settle_startup`] or
    /// [`LifecycleGuard::finish_init`].
    pub fn force_ready(&mut self) -> bool {
        let was_initializing = self.is_initializing();
        self.phase = Phase::Ready;
        was_initializing
    }

    /// `Uninstalled -> Active`. Returns `false` if already installed.
    pub fn install_listener(&mut self) -> bool {
        if self.listener == ListenerState::Active {
            return false;
        }
        self.listener = ListenerState::Active;
        true
    }

    /// Decide whether `change` may touch the store.
    ///
    /// Order matters: the initialization gate and the `INITIAL_SESSION`
    /// filter come before dedup, so skipped changes never become the
    /// reference signature.
    pub fn admit(&mut self, change: &AuthChange) -> Admission {
        let kind = change.kind();
        if self.is_initializing() && kind != AuthEventKind::SignedIn {
            return Admission::Skip(SkipReason::Initializing);
        }
        if kind == AuthEventKind::InitialSession {
            return Admission::Skip(SkipReason::InitialSession);
        }
        if !self.dedup.observe(change.signature()) {
            return Admission::Skip(SkipReason::Duplicate);
        }
        if !self.startup_settled {
            // Applied before startup reported; newer than whatever startup
            // is about to write, including after a forced ready.
            self.superseded = true;
        }
        Admission::Apply
    }

    /// Whether an admitted change already wrote the store before startup
    /// reported.
    pub fn initial_write_superseded(&self) -> bool {
        self.superseded
    }

    /// Startup has its result. Returns whether that result may still be
    /// written; `false` once any change was applied before it.
    pub fn settle_startup(&mut self) -> bool {
        self.startup_settled = true;
        !self.superseded
    }

    /// `Idle -> InFlight`. `None` if a fetch is running or already done.
    pub fn claim_role_fetch(&mut self) -> Option<RoleTicket> {
        if self.roles != RoleFetch::Idle {
            return None;
        }
        self.roles = RoleFetch::InFlight;
        Some(RoleTicket { epoch: self.role_epoch })
    }

    /// `InFlight -> Fetched` for a ticket of the current epoch. A ticket
    /// from before the last sign-out is rejected.
    pub fn settle_role_fetch(&mut self, ticket: RoleTicket) -> bool {
        if ticket.epoch != self.role_epoch || self.roles != RoleFetch::InFlight {
            return false;
        }
        self.roles = RoleFetch::Fetched;
        true
    }

    /// Sign-out: forget the profile and invalidate outstanding tickets.
    pub fn reset_roles(&mut self) {
        self.roles = RoleFetch::Idle;
        self.role_epoch += 1;
    }

    /// Back to a fresh, unmounted state.
    pub fn reset(&mut self) {
        let epoch = self.role_epoch + 1;
        *self = Self {
            role_epoch: epoch,
            ..Self::default()
        };
    }
}
