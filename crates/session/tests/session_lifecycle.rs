use std::sync::{Arc, Mutex};
use std::time::Duration;

use nutritrack_auth::{Identity, ProviderError, Role, Session};
use nutritrack_events::AuthEventKind;
use nutritrack_session::demo::{DEMO_MODE_KEY, DEMO_ROLE_KEY};
use nutritrack_session::memory::{InMemoryIdentityProvider, MemoryAuditSink, Reply, ScriptedAuthorizationService};
use nutritrack_session::{InMemoryPreferences, PreferenceStore, SessionConfig, SessionError, SessionManager};

struct Harness {
    provider: Arc<InMemoryIdentityProvider>,
    service: Arc<ScriptedAuthorizationService>,
    sink: Arc<MemoryAuditSink>,
    manager: SessionManager,
}

impl Harness {
    fn new(provider: InMemoryIdentityProvider, service: ScriptedAuthorizationService) -> Self {
        Self::with_preferences(provider, service, Arc::new(InMemoryPreferences::new()))
    }

    fn with_preferences(
        provider: InMemoryIdentityProvider,
        service: ScriptedAuthorizationService,
        prefs: Arc<InMemoryPreferences>,
    ) -> Self {
        nutritrack_observability::init_for_tests();

        let provider = Arc::new(provider);
        let service = Arc::new(service);
        let sink = Arc::new(MemoryAuditSink::new());
        let manager = SessionManager::new(provider.clone(), service.clone(), SessionConfig::default())
            .with_audit_sink(sink.clone())
            .with_preferences(prefs);

        Self {
            provider,
            service,
            sink,
            manager,
        }
    }
}

fn identity(id: &str) -> Identity {
    Identity::new(id, format!("{id}@example.com"), id)
}

fn session(id: &str, token: &str) -> Session {
    Session::new(token, identity(id))
}

/// Let every ready task run (time is paused, so this is instant).
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn no_session_ends_unauthenticated() {
    let h = Harness::new(InMemoryIdentityProvider::new(), ScriptedAuthorizationService::new());

    h.manager.mount();
    settle().await;

    let snap = h.manager.snapshot();
    assert!(!snap.is_authenticated);
    assert!(!snap.loading);
    assert_eq!(snap.user, None);
    assert_eq!(snap.user_role, None);
    assert_eq!(h.service.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn events_during_startup_only_let_sign_ins_through() {
    let h = Harness::new(InMemoryIdentityProvider::new(), ScriptedAuthorizationService::new());
    let gate = h.provider.hold_fetches();

    h.manager.mount();
    settle().await;
    let before = h.manager.store().revision();
    let snap_before = h.manager.snapshot();

    let u1 = Some(session("u1", "t1"));
    h.provider.emit(AuthEventKind::InitialSession, u1.clone());
    h.provider.emit(AuthEventKind::TokenRefreshed, u1.clone());
    h.provider.emit(AuthEventKind::UserUpdated, u1.clone());
    h.provider.emit(AuthEventKind::PasswordRecovery, u1);
    h.provider.emit(AuthEventKind::SignedOut, None);
    settle().await;

    assert_eq!(h.manager.store().revision(), before);
    assert_eq!(h.manager.snapshot(), snap_before);

    gate.release();
    settle().await;
    assert!(!h.manager.snapshot().loading);
}

#[tokio::test(start_paused = true)]
async fn sign_in_during_startup_beats_the_stale_startup_result() {
    let h = Harness::new(
        InMemoryIdentityProvider::new(),
        ScriptedAuthorizationService::new().with_coach(Reply::Ready(true)),
    );
    let gate = h.provider.hold_fetches();

    h.manager.mount();
    settle().await;

    h.provider.emit(AuthEventKind::SignedIn, Some(session("u-new", "t-new")));
    settle().await;

    // The startup fetch now sees some other user.
    h.provider.set_session(Some(session("u-stale", "t-stale")));
    gate.release();
    settle().await;

    let snap = h.manager.snapshot();
    assert_eq!(snap.user.map(|u| u.id.to_string()), Some("u-new".to_string()));
    assert!(snap.is_authenticated);
    assert!(!snap.loading);
    assert!(snap.is_coach);
    assert_eq!(h.service.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn loading_ends_once_and_never_reverts() {
    let h = Harness::new(
        InMemoryIdentityProvider::new().with_session(session("u1", "t1")),
        ScriptedAuthorizationService::new(),
    );
    h.manager.mount();

    let seen = Arc::new(Mutex::new(vec![h.manager.snapshot().loading]));
    let mut rx = h.manager.subscribe();
    let observer = tokio::spawn({
        let seen = Arc::clone(&seen);
        async move {
            while rx.changed().await.is_ok() {
                let loading = rx.borrow_and_update().loading;
                seen.lock().unwrap().push(loading);
            }
        }
    });

    settle().await;
    h.provider.emit(AuthEventKind::TokenRefreshed, Some(session("u1", "t2")));
    settle().await;
    h.provider.emit(AuthEventKind::SignedOut, None);
    settle().await;
    h.provider.emit(AuthEventKind::SignedIn, Some(session("u1", "t3")));
    settle().await;
    // Past the fallback deadline.
    tokio::time::sleep(Duration::from_secs(11)).await;
    observer.abort();

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.first(), Some(&true));
    let first_false = seen.iter().position(|loading| !loading).unwrap();
    assert!(seen[first_false..].iter().all(|loading| !loading));
}

#[tokio::test(start_paused = true)]
async fn repeated_event_updates_the_store_once() {
    let h = Harness::new(
        InMemoryIdentityProvider::new().with_session(session("u1", "t1")),
        ScriptedAuthorizationService::new(),
    );
    h.manager.mount();
    settle().await;
    let before = h.manager.store().revision();

    h.provider.emit(AuthEventKind::SignedIn, Some(session("u1", "t2")));
    h.provider.emit(AuthEventKind::SignedIn, Some(session("u1", "t3")));
    settle().await;

    assert_eq!(h.manager.store().revision(), before + 1);
    let snap = h.manager.snapshot();
    assert_eq!(snap.session.map(|s| s.access_token), Some("t2".to_string()));
}

#[tokio::test(start_paused = true)]
async fn hung_role_lookups_fall_back_to_defaults() {
    let h = Harness::new(
        InMemoryIdentityProvider::new().with_session(session("u1", "t1")),
        ScriptedAuthorizationService::new()
            .with_role(Reply::Pending)
            .with_coach(Reply::Pending)
            .with_admin(Reply::Delayed(Duration::from_secs(60), true)),
    );
    h.manager.mount();
    settle().await;

    let snap = h.manager.snapshot();
    assert!(!snap.loading);
    assert!(snap.is_authenticated);
    assert_eq!(snap.user_role, None);

    tokio::time::sleep(Duration::from_secs(5)).await;
    settle().await;

    let snap = h.manager.snapshot();
    assert_eq!(snap.user_role, Some(Role::user()));
    assert!(!snap.is_coach);
    assert!(!snap.is_admin);
}

#[tokio::test(start_paused = true)]
async fn one_failing_lookup_keeps_the_others() {
    let h = Harness::new(
        InMemoryIdentityProvider::new().with_session(session("u1", "t1")),
        ScriptedAuthorizationService::new()
            .with_role(Reply::Ready(Role::new("coach")))
            .with_coach(Reply::Ready(true))
            .with_admin(Reply::Fail("is_admin rpc failed".into())),
    );
    h.manager.mount();
    settle().await;

    let snap = h.manager.snapshot();
    assert_eq!(snap.user_role, Some(Role::new("coach")));
    assert!(snap.is_coach);
    assert!(!snap.is_admin);

    // Roles are fetched: another sign-in for the session does not refetch.
    h.provider.emit(AuthEventKind::SignedIn, Some(session("u1", "t2")));
    settle().await;
    assert_eq!(h.service.calls(), 1);
    assert!(h.sink.actions().contains(&"SESSION_RESTORED".to_string()));
}

#[tokio::test(start_paused = true)]
async fn sign_out_converges_even_when_the_call_fails() {
    let h = Harness::new(
        InMemoryIdentityProvider::new().with_session(session("u1", "t1")),
        ScriptedAuthorizationService::new()
            .with_role(Reply::Ready(Role::admin()))
            .with_coach(Reply::Ready(true))
            .with_admin(Reply::Ready(true)),
    );
    h.manager.mount();
    settle().await;
    assert!(h.manager.snapshot().is_admin);

    h.provider.fail_sign_out(ProviderError::network("socket closed"));
    let err = h.manager.sign_out().await.unwrap_err();
    assert!(matches!(err, SessionError::Provider(ProviderError::Network(_))));
    settle().await;

    let snap = h.manager.snapshot();
    assert!(!snap.is_authenticated);
    assert_eq!(snap.user, None);
    assert_eq!(snap.user_role, None);
    assert!(!snap.is_coach);
    assert!(!snap.is_admin);
    assert!(!snap.loading);
}

#[tokio::test(start_paused = true)]
async fn password_sign_in_flows_through_the_event_stream() {
    let provider = InMemoryIdentityProvider::new();
    provider.register(identity("u1"), "correct horse");
    let h = Harness::new(provider, ScriptedAuthorizationService::new().with_coach(Reply::Ready(true)));
    h.manager.mount();
    settle().await;

    let err = h.manager.sign_in("u1@example.com", "wrong").await.unwrap_err();
    assert!(matches!(err, SessionError::Provider(ProviderError::Rejected(_))));
    assert!(!h.manager.snapshot().is_authenticated);

    let response = h.manager.sign_in("u1@example.com", "correct horse").await.unwrap();
    assert!(response.session.is_some());
    settle().await;

    let snap = h.manager.snapshot();
    assert!(snap.is_authenticated);
    assert!(snap.is_coach);

    let changed = h
        .sink
        .records()
        .into_iter()
        .find(|r| r.action == "AUTH_STATE_CHANGED")
        .unwrap();
    assert_eq!(changed.user_email, "u1@example.com");
    assert!(changed.details.contains("SIGNED_IN"));
}

#[tokio::test(start_paused = true)]
async fn fallback_timer_ends_a_hung_startup() {
    let h = Harness::new(InMemoryIdentityProvider::new(), ScriptedAuthorizationService::new());
    let gate = h.provider.hold_fetches();

    h.manager.mount();
    tokio::time::sleep(Duration::from_secs(9)).await;
    assert!(h.manager.snapshot().loading);

    tokio::time::sleep(Duration::from_secs(1)).await;
    settle().await;
    assert!(!h.manager.snapshot().loading);

    // Startup no longer gates the stream.
    h.provider.emit(AuthEventKind::TokenRefreshed, Some(session("u1", "t1")));
    settle().await;
    assert!(h.manager.snapshot().is_authenticated);

    // The hung fetch finally answers with some other user.
    h.provider.set_session(Some(session("u-stale", "t-stale")));
    gate.release();
    settle().await;

    let snap = h.manager.snapshot();
    assert_eq!(snap.user.map(|u| u.id.to_string()), Some("u1".to_string()));
    assert_eq!(snap.session.map(|s| s.access_token), Some("t1".to_string()));
    assert!(!snap.loading);
}

#[tokio::test(start_paused = true)]
async fn failed_subscription_still_restores_the_session() {
    let provider = InMemoryIdentityProvider::new().with_session(session("u1", "t1"));
    provider.fail_subscribe(ProviderError::unavailable("realtime channel offline"));
    let h = Harness::new(provider, ScriptedAuthorizationService::new());

    h.manager.mount();
    settle().await;

    let snap = h.manager.snapshot();
    assert!(snap.is_authenticated);
    assert!(!snap.loading);
    assert_eq!(snap.user_role, Some(Role::user()));
    assert_eq!(h.provider.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn late_startup_cannot_undo_a_sign_out_after_the_fallback() {
    let h = Harness::new(InMemoryIdentityProvider::new(), ScriptedAuthorizationService::new());
    let gate = h.provider.hold_fetches();

    h.manager.mount();
    tokio::time::sleep(Duration::from_secs(11)).await;

    h.provider.emit(AuthEventKind::SignedIn, Some(session("u1", "t1")));
    settle().await;
    assert!(h.manager.snapshot().is_authenticated);
    h.provider.emit(AuthEventKind::SignedOut, None);
    settle().await;

    // Startup read the session from before the sign-out.
    h.provider.set_session(Some(session("u1", "t1")));
    gate.release();
    settle().await;

    let snap = h.manager.snapshot();
    assert!(!snap.is_authenticated);
    assert_eq!(snap.user, None);
    assert_eq!(snap.user_role, None);
    assert_eq!(h.service.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn unmount_during_startup_freezes_the_store() {
    let h = Harness::new(
        InMemoryIdentityProvider::new().with_session(session("u1", "t1")),
        ScriptedAuthorizationService::new(),
    );
    let gate = h.provider.hold_fetches();

    h.manager.mount();
    settle().await;
    assert_eq!(h.provider.subscriber_count(), 1);

    assert!(h.manager.unmount());
    let frozen = h.manager.store().revision();
    assert_eq!(h.provider.subscriber_count(), 0);

    gate.release();
    assert_eq!(h.provider.emit(AuthEventKind::SignedIn, Some(session("u2", "t2"))), 0);
    tokio::time::sleep(Duration::from_secs(20)).await;

    assert_eq!(h.manager.store().revision(), frozen);
    assert!(h.manager.snapshot().loading);
    assert_eq!(h.service.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn demo_coach_mounts_synchronously_without_network() {
    let prefs = Arc::new(InMemoryPreferences::new());
    prefs.set(DEMO_MODE_KEY, "true");
    prefs.set(DEMO_ROLE_KEY, "coach");
    let h = Harness::with_preferences(InMemoryIdentityProvider::new(), ScriptedAuthorizationService::new(), prefs);

    h.manager.mount();

    let snap = h.manager.snapshot();
    assert!(snap.is_coach);
    assert!(!snap.is_admin);
    assert!(snap.is_authenticated);
    assert!(!snap.loading);
    assert_eq!(snap.user.map(|u| u.id.to_string()), Some("demo-coach-123".to_string()));

    settle().await;
    assert!(h.provider.calls().is_empty());
    assert_eq!(h.provider.subscriber_count(), 0);
    assert_eq!(h.service.calls(), 0);
    assert!(h.sink.records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn demo_sign_out_and_back_in_are_local() {
    let prefs = Arc::new(InMemoryPreferences::new());
    prefs.set(DEMO_MODE_KEY, "true");
    prefs.set(DEMO_ROLE_KEY, "admin");
    let h = Harness::with_preferences(InMemoryIdentityProvider::new(), ScriptedAuthorizationService::new(), prefs);
    h.manager.mount();

    h.manager.sign_out().await.unwrap();
    let snap = h.manager.snapshot();
    assert!(!snap.is_authenticated);
    assert_eq!(snap.user_role, None);
    assert!(!snap.is_admin);

    h.manager.sign_in("admin@example.com", "anything").await.unwrap();
    let snap = h.manager.snapshot();
    assert!(snap.is_authenticated);
    assert!(snap.is_admin);
    assert_eq!(snap.user_role, Some(Role::admin()));
    assert!(h.provider.calls().is_empty());
}
