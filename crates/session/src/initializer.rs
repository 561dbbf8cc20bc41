//! One-shot startup of a mount.
//!
//! Produces the first consistent session/identity state: either a synthetic
//! demo identity (synchronously, no network) or whatever the identity
//! provider currently holds. Authorization is resolved in the background and
//! never holds up `loading`.

use std::sync::Arc;

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::Instrument;

use nutritrack_auth::{Identity, ProviderError, Session};

use crate::demo::DemoIdentity;
use crate::mount::{MountContext, RoleTrigger};
use crate::store::assign;

/// Demo path: write `demo` as the signed-in user and finish startup.
///
/// Returns `false` if this mount already initialized.
pub(crate) fn run_demo(ctx: &MountContext, demo: &DemoIdentity) -> bool {
    let mut guard = ctx.guard();
    if !guard.begin_init() {
        tracing::debug!(mount = %ctx.id, "auth already initialized, skipping");
        return false;
    }

    write_demo_identity(ctx, demo);
    ctx.finish_loading();
    guard.finish_init();
    drop(guard);

    ctx.audit.info(
        "Auth",
        "DEMO_MODE_ENABLED",
        json!({
            "userId": demo.identity.id,
            "role": demo.profile.role,
            "isCoach": demo.profile.is_coach,
            "isAdmin": demo.profile.is_admin,
        }),
    );
    true
}

/// Write a demo identity and its profile in one store update.
pub(crate) fn write_demo_identity(ctx: &MountContext, demo: &DemoIdentity) -> bool {
    let session = Session::demo(demo.identity.clone());
    ctx.write(|snap| {
        let changed = snap.apply_session(Some(session), Some(demo.identity.clone()));
        snap.apply_profile(&demo.profile) | changed
    })
}

/// Real path: claim the initializing phase now and restore the provider's
/// session on a background task.
///
/// The phase is claimed synchronously so that a listener installed right
/// after this call already sees the mount as initializing.
pub(crate) fn start(ctx: &Arc<MountContext>) -> Option<JoinHandle<()>> {
    if !ctx.guard().begin_init() {
        tracing::debug!(mount = %ctx.id, "auth already initialized, skipping");
        return None;
    }

    let ctx = Arc::clone(ctx);
    let span = tracing::info_span!("auth_init", mount = %ctx.id);
    Some(tokio::spawn(run(ctx).instrument(span)))
}

async fn run(ctx: Arc<MountContext>) {
    tracing::debug!("auth initialization start");

    if let Err(err) = restore_session(&ctx).await {
        tracing::error!(error = %err, "error initializing auth");
        ctx.audit.error("Auth", "INIT_ERROR", json!({ "error": err.to_string() }));
        // Never leave the UI waiting on a failed startup.
        ctx.finish_loading();
    }

    ctx.guard().finish_init();
    tracing::debug!("auth initialization complete");
}

async fn restore_session(ctx: &Arc<MountContext>) -> Result<(), ProviderError> {
    let session = ctx.provider.get_session().await?;
    let user = ctx.provider.get_current_user().await?;
    tracing::debug!(session = session.is_some(), user = user.is_some(), "restored provider state");

    commit(ctx, session, user);
    Ok(())
}

/// Publish the startup result unless an applied change already overtook it,
/// then kick off authorization for the restored identity.
///
/// Changes applied after the loading fallback count too: the phase is
/// `Ready` by then but startup has not reported yet.
fn commit(ctx: &Arc<MountContext>, session: Option<Session>, user: Option<Identity>) {
    let mut guard = ctx.guard();

    if !ctx.is_attached() {
        tracing::debug!("mount ended during initialization; discarding result");
        return;
    }
    if !guard.settle_startup() {
        tracing::debug!("auth change applied before startup reported; keeping it");
        ctx.finish_loading();
        return;
    }

    ctx.write(|snap| {
        let changed = snap.apply_session(session, user.clone());
        changed | assign(&mut snap.loading, false)
    });

    let Some(identity) = user else {
        return;
    };
    let Some(ticket) = guard.claim_role_fetch() else {
        return;
    };
    drop(guard);

    ctx.spawn_role_resolution(identity, ticket, RoleTrigger::Restored);
}
