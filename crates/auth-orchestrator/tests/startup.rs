mod common;

use auth_engine::mock::{session_for, GetSessionMode, MockCall};
use auth_engine::{AuthChangeEvent, Role};
use auth_orchestrator::AuthState;
use common::{settle, Harness, START_SECS};
use session_storage::{KeyValueStore, StorageKeys};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn cache_hit_publishes_before_start_returns() {
    let h = Harness::new().with_cached_session("u1", Role::Teacher, START_SECS + 3600);

    h.orchestrator.start();

    let snapshot = h.orchestrator.snapshot();
    let user = snapshot.user.expect("cached user published");
    assert_eq!(user.id, "u1");
    assert_eq!(user.role, Role::Teacher);
    assert_eq!(snapshot.session.unwrap().access_token, "access-u1");
    assert!(!snapshot.loading);
    assert_eq!(snapshot.state, AuthState::Revalidating);
    assert!(h.orchestrator.is_initialized());
    assert!(h.daemon.is_running());
    assert!(h.provider.calls().is_empty());

    settle().await;
    assert_eq!(h.orchestrator.state(), AuthState::SignedIn);
    assert_eq!(h.provider.call_count(MockCall::GetSession), 1);
}

#[tokio::test(start_paused = true)]
async fn revalidation_republishes_a_changed_role() {
    let h = Harness::new().with_cached_session("u1", Role::Student, START_SECS + 3600);
    h.directory.set_role("u1", Role::Admin);
    let mut rx = h.orchestrator.subscribe();

    h.orchestrator.start();
    assert_eq!(h.orchestrator.current_user().unwrap().role, Role::Student);

    settle().await;
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().user.as_ref().unwrap().role, Role::Admin);
    assert_eq!(h.cache.get_session().unwrap().user.role, Role::Admin);
}

#[tokio::test(start_paused = true)]
async fn revalidation_without_provider_session_signs_out() {
    let h = Harness::new().with_cached_session("u1", Role::Student, START_SECS + 3600);
    h.provider.set_session(None);

    h.orchestrator.start();
    assert!(h.orchestrator.current_user().is_some());

    settle().await;
    let snapshot = h.orchestrator.snapshot();
    assert!(snapshot.user.is_none());
    assert!(snapshot.session.is_none());
    assert_eq!(snapshot.state, AuthState::SignedOut);
    assert!(!h.has_owned_keys());
    assert!(!h.daemon.is_running());
}

#[tokio::test(start_paused = true)]
async fn revalidation_error_keeps_optimistic_identity() {
    let h = Harness::new().with_cached_session("u1", Role::Teacher, START_SECS + 3600);
    h.provider.set_get_session_mode(GetSessionMode::Fail);

    h.orchestrator.start();
    settle().await;

    assert_eq!(h.orchestrator.current_user().unwrap().role, Role::Teacher);
    assert_eq!(h.orchestrator.state(), AuthState::SignedIn);
    assert!(h.daemon.is_running());
    assert!(h.has_owned_keys());
}

#[tokio::test(start_paused = true)]
async fn initial_session_after_initialization_is_ignored() {
    let h = Harness::new().with_cached_session("u1", Role::Student, START_SECS + 3600);

    h.orchestrator.start();
    settle().await;

    // Only the revalidation looked up the role.
    assert_eq!(h.directory.lookup_count(), 1);
    assert!(h.directory.created().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cache_miss_resolves_from_provider() {
    let h = Harness::new();
    h.provider.set_session(Some(Harness::healthy_session("u2")));
    h.directory.set_role("u2", Role::Admin);

    h.orchestrator.start();
    let snapshot = h.orchestrator.snapshot();
    assert!(snapshot.loading);
    assert!(snapshot.user.is_none());

    h.orchestrator.wait_until_initialized().await;
    settle().await;

    let user = h.orchestrator.current_user().expect("resolved user");
    assert_eq!(user.id, "u2");
    assert_eq!(user.role, Role::Admin);
    assert!(!h.orchestrator.is_loading());
    assert_eq!(h.orchestrator.state(), AuthState::SignedIn);
    assert!(h.store.has(StorageKeys::SESSION).unwrap());
    assert!(h.daemon.is_running());
}

#[tokio::test(start_paused = true)]
async fn cache_miss_without_session_signs_out_within_fallback_bound() {
    let h = Harness::new();
    h.store.set("lms_session", "{}").unwrap();

    h.orchestrator.start();
    sleep(Duration::from_millis(500)).await;

    let snapshot = h.orchestrator.snapshot();
    assert!(snapshot.user.is_none());
    assert!(!snapshot.loading);
    assert_eq!(snapshot.state, AuthState::SignedOut);
    assert!(h.orchestrator.is_initialized());
    assert!(h.store.keys().unwrap().is_empty());
    assert!(!h.daemon.is_running());
}

#[tokio::test(start_paused = true)]
async fn fallback_timer_releases_loading_when_provider_hangs() {
    let h = Harness::new();
    h.provider.set_get_session_mode(GetSessionMode::Hang);

    h.orchestrator.start();
    sleep(Duration::from_millis(999)).await;
    assert!(h.orchestrator.is_loading());

    sleep(Duration::from_millis(2)).await;
    let snapshot = h.orchestrator.snapshot();
    assert!(!snapshot.loading);
    assert!(snapshot.user.is_none());
    assert_eq!(snapshot.state, AuthState::Initializing);
    assert!(!h.orchestrator.is_initialized());
}

#[tokio::test(start_paused = true)]
async fn provider_error_on_cache_miss_publishes_signed_out_without_clearing() {
    let h = Harness::new();
    h.provider.set_get_session_mode(GetSessionMode::Fail);
    h.store.set("lms_session", "{}").unwrap();

    h.orchestrator.start();
    settle().await;

    assert!(h.orchestrator.current_user().is_none());
    assert!(!h.orchestrator.is_loading());
    assert!(h.orchestrator.is_initialized());
    assert!(h.store.has("lms_session").unwrap());
}

#[tokio::test(start_paused = true)]
async fn start_runs_once() {
    let h = Harness::new();

    h.orchestrator.start();
    h.orchestrator.start();
    settle().await;
    h.orchestrator.start();
    settle().await;

    assert_eq!(h.provider.call_count(MockCall::GetSession), 1);
    assert_eq!(h.provider.subscriber_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn pushed_sign_in_creates_missing_user_record() {
    let h = Harness::new();
    h.orchestrator.start();
    settle().await;
    assert!(h.orchestrator.current_user().is_none());

    let session = Harness::healthy_session("u3");
    h.provider.set_session(Some(session.clone()));
    h.provider.emit(AuthChangeEvent::SignedIn, Some(session));
    settle().await;

    let user = h.orchestrator.current_user().expect("signed in");
    assert_eq!(user.id, "u3");
    assert_eq!(user.role, Role::Student);
    assert_eq!(h.directory.created().len(), 1);
    assert!(h.daemon.is_running());
    assert!(h.store.has(StorageKeys::SESSION).unwrap());

    let entries = h.audit.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "login");
    assert_eq!(entries[0].user_id.as_deref(), Some("u3"));
}

#[tokio::test(start_paused = true)]
async fn pushed_event_without_session_signs_out() {
    let h = Harness::new().with_cached_session("u1", Role::Student, START_SECS + 3600);
    h.orchestrator.start();
    settle().await;

    h.provider.emit(AuthChangeEvent::SignedOut, None);
    settle().await;

    assert!(h.orchestrator.current_user().is_none());
    assert_eq!(h.orchestrator.state(), AuthState::SignedOut);
    assert!(!h.daemon.is_running());
    assert!(!h.has_owned_keys());
}

#[tokio::test(start_paused = true)]
async fn pushed_token_refresh_keeps_the_known_role() {
    let h = Harness::new().with_cached_session("u1", Role::Teacher, START_SECS + 3600);
    h.orchestrator.start();
    settle().await;

    let mut rotated = session_for("u1", START_SECS + 7200);
    rotated.access_token = "rotated".to_string();
    h.provider
        .emit(AuthChangeEvent::TokenRefreshed, Some(rotated.clone()));
    settle().await;

    assert_eq!(h.orchestrator.current_session(), Some(rotated.clone()));
    assert_eq!(h.orchestrator.current_user().unwrap().role, Role::Teacher);
    assert_eq!(h.cache.get_session().unwrap().session, rotated);
}

#[tokio::test(start_paused = true)]
async fn daemon_expiry_signs_out() {
    let h = Harness::new().with_cached_session("u1", Role::Student, START_SECS + 3600);
    h.orchestrator.start();
    settle().await;

    h.provider.set_session(None);
    sleep(Duration::from_secs(31)).await;

    assert!(h.orchestrator.current_user().is_none());
    assert_eq!(h.orchestrator.state(), AuthState::SignedOut);
    assert!(!h.daemon.is_running());
    assert!(!h.has_owned_keys());
}

#[tokio::test(start_paused = true)]
async fn daemon_refresh_replaces_the_published_session() {
    let h = Harness::new().with_cached_session("u1", Role::Teacher, START_SECS + 240);
    h.orchestrator.start();
    settle().await;

    sleep(Duration::from_secs(31)).await;

    let session = h.orchestrator.current_session().expect("session");
    assert_eq!(session.access_token, "access-u1-r1");
    assert_eq!(session.expires_at, START_SECS + 3600);
    assert_eq!(h.orchestrator.current_user().unwrap().role, Role::Teacher);
    assert_eq!(h.cache.get_session().unwrap().session, session);
}

#[tokio::test(start_paused = true)]
async fn unmount_detaches_from_provider_and_daemon() {
    let h = Harness::new().with_cached_session("u1", Role::Student, START_SECS + 3600);
    h.orchestrator.start();
    settle().await;
    assert_eq!(h.provider.subscriber_count(), 1);
    assert_eq!(h.daemon.listener_count(), 1);

    h.orchestrator.unmount();
    settle().await;

    assert_eq!(h.provider.subscriber_count(), 0);
    assert_eq!(h.daemon.listener_count(), 0);
    assert!(!h.daemon.is_running());
}
