//! Event reconciliation loop.
//!
//! Consumes the provider's auth-change queue for one mount and folds each
//! admitted change into the store. Admission (initialization gate,
//! `INITIAL_SESSION` filter, dedup) is decided by the lifecycle guard.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::Instrument;

use nutritrack_auth::ProviderError;
use nutritrack_events::{AuthChange, AuthEventKind, SubscriptionHandle};

use crate::lifecycle::{Admission, SkipReason};
use crate::mount::{MountContext, RoleTrigger};

/// Result of reconciling one change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Applied,
    Skipped(SkipReason),
}

/// A running reconciliation loop and the handle that detaches its queue.
#[derive(Debug)]
pub(crate) struct Listener {
    pub(crate) task: JoinHandle<()>,
    pub(crate) subscription: SubscriptionHandle,
}

/// Subscribe to the provider and start the loop.
///
/// `Ok(None)` if this mount already has a listener.
pub(crate) fn install(ctx: &Arc<MountContext>, shutdown: Arc<Notify>) -> Result<Option<Listener>, ProviderError> {
    let mut guard = ctx.guard();
    if guard.listener() == crate::lifecycle::ListenerState::Active {
        tracing::debug!(mount = %ctx.id, "auth listener already installed");
        return Ok(None);
    }

    let (rx, subscription) = ctx.provider.on_auth_state_change()?.into_parts();
    guard.install_listener();
    drop(guard);

    let span = tracing::info_span!("auth_listener", mount = %ctx.id);
    let task = tokio::spawn(run(Arc::clone(ctx), rx, shutdown).instrument(span));
    tracing::debug!(mount = %ctx.id, "auth listener installed");

    Ok(Some(Listener { task, subscription }))
}

async fn run(ctx: Arc<MountContext>, mut rx: mpsc::UnboundedReceiver<AuthChange>, shutdown: Arc<Notify>) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.notified() => {
                tracing::debug!("auth listener stopping");
                break;
            }
            change = rx.recv() => {
                let Some(change) = change else {
                    tracing::debug!("auth change stream closed");
                    break;
                };
                reconcile(&ctx, change);
            }
        }
    }
}

/// Fold one auth change into the store.
pub(crate) fn reconcile(ctx: &Arc<MountContext>, change: AuthChange) -> Reconciled {
    let kind = change.kind();
    let mut guard = ctx.guard();

    if let Admission::Skip(reason) = guard.admit(&change) {
        tracing::debug!(event = %kind, ?reason, "auth change skipped");
        return Reconciled::Skipped(reason);
    }
    tracing::debug!(event = %kind, user_id = ?change.user_id(), "auth change applied");

    let session = change.into_session();
    let user = session.as_ref().map(|s| s.user.clone());
    let signed_in = session.is_some();

    ctx.write(|snap| {
        let mut changed = snap.apply_session(session, user.clone());
        if signed_in {
            changed |= crate::store::assign(&mut snap.loading, false);
        } else {
            changed |= snap.clear_profile();
        }
        changed
    });

    if !signed_in {
        guard.reset_roles();
        drop(guard);
        ctx.audit.info("Auth", "AUTH_STATE_CHANGED", json!({ "event": AuthEventKind::SignedOut }));
        return Reconciled::Applied;
    }

    if kind == AuthEventKind::SignedIn {
        if let (Some(identity), Some(ticket)) = (user, guard.claim_role_fetch()) {
            drop(guard);
            ctx.spawn_role_resolution(identity, ticket, RoleTrigger::Event(kind));
        }
    }
    Reconciled::Applied
}
