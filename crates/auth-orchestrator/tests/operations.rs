mod common;

use auth_engine::mock::{GetSessionMode, MockCall, RefreshMode};
use auth_engine::{AuthError, Role};
use auth_orchestrator::AuthState;
use common::{settle, Harness, START_SECS};
use session_storage::{KeyValueStore, StorageKeys};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const CALLBACK_BASE: &str = "https://app.lms.dev/auth/callback";

#[tokio::test(start_paused = true)]
async fn sign_out_stops_daemon_before_provider_call() {
    let h = Harness::new().with_cached_session("u1", Role::Student, START_SECS + 3600);
    h.orchestrator.start();
    settle().await;
    assert!(h.daemon.is_running());

    let daemon_running_at_sign_out = Arc::new(AtomicBool::new(true));
    {
        let flag = daemon_running_at_sign_out.clone();
        let daemon = h.daemon.clone();
        h.provider
            .on_sign_out(move || flag.store(daemon.is_running(), Ordering::SeqCst));
    }

    h.orchestrator.sign_out().await;

    assert!(!daemon_running_at_sign_out.load(Ordering::SeqCst));
    assert_eq!(h.provider.call_count(MockCall::SignOut), 1);
    let snapshot = h.orchestrator.snapshot();
    assert!(snapshot.user.is_none());
    assert!(!snapshot.loading);
    assert_eq!(snapshot.state, AuthState::SignedOut);
}

#[tokio::test(start_paused = true)]
async fn sign_out_clears_storage_even_when_provider_fails() {
    let h = Harness::new().with_cached_session("u1", Role::Student, START_SECS + 3600);
    h.store.set("lms_user", "{}").unwrap();
    h.orchestrator.start();
    settle().await;

    h.provider.set_sign_out_fails(true);
    h.orchestrator.sign_out().await;
    settle().await;

    assert!(!h.has_owned_keys());
    assert!(!h.store.has("lms_user").unwrap());
    assert!(h.orchestrator.current_user().is_none());
    assert!(!h.daemon.is_running());

    let logout = h
        .audit
        .entries()
        .into_iter()
        .find(|entry| entry.action == "logout")
        .expect("logout audit entry");
    assert_eq!(logout.user_id.as_deref(), Some("u1"));
}

#[tokio::test(start_paused = true)]
async fn loading_stays_set_while_remote_sign_out_runs() {
    let h = Harness::new().with_cached_session("u1", Role::Student, START_SECS + 3600);
    h.orchestrator.start();
    settle().await;
    h.provider.set_sign_out_delay(Some(Duration::from_millis(200)));

    let orchestrator = h.orchestrator.clone();
    let signing_out = tokio::spawn(async move { orchestrator.sign_out().await });
    sleep(Duration::from_millis(100)).await;

    // The provider already pushed SignedOut; the request itself is still open.
    let snapshot = h.orchestrator.snapshot();
    assert!(snapshot.user.is_none());
    assert!(snapshot.loading);
    assert_eq!(snapshot.state, AuthState::SigningOut);

    signing_out.await.unwrap();
    settle().await;
    assert!(!h.orchestrator.is_loading());
    assert_eq!(h.orchestrator.state(), AuthState::SignedOut);
}

#[tokio::test(start_paused = true)]
async fn sign_out_wins_over_a_pending_startup_read() {
    let h = Harness::new();
    h.provider
        .set_get_session_mode(GetSessionMode::Delayed(Duration::from_millis(500)));

    h.orchestrator.start();
    // The startup read picks this up on its first poll; the push snapshot
    // taken inside start() stays empty.
    h.provider.set_session(Some(Harness::healthy_session("u1")));
    sleep(Duration::from_millis(100)).await;
    assert_eq!(h.provider.call_count(MockCall::GetSession), 1);

    h.orchestrator.sign_out().await;
    assert!(h.orchestrator.current_user().is_none());

    sleep(Duration::from_millis(900)).await;
    let snapshot = h.orchestrator.snapshot();
    assert!(snapshot.user.is_none());
    assert!(!snapshot.loading);
    assert_eq!(snapshot.state, AuthState::SignedOut);
    assert!(h.orchestrator.is_initialized());
    assert!(!h.daemon.is_running());
    assert!(!h.store.has(StorageKeys::SESSION).unwrap());
}

#[tokio::test(start_paused = true)]
async fn non_callback_url_is_rejected_without_provider_calls() {
    let h = Harness::new();

    let err = h
        .orchestrator
        .handle_oauth_callback("https://app.lms.dev/dashboard?tab=courses")
        .await
        .unwrap_err();

    assert!(err.is_not_applicable());
    assert!(h.provider.calls().is_empty());
    assert!(!h.orchestrator.is_oauth_processing());
}

#[tokio::test(start_paused = true)]
async fn oauth_callback_retries_until_the_session_appears() {
    let h = Harness::new();
    h.orchestrator.mark_oauth_flow_started();
    assert!(h.store.has(StorageKeys::OAUTH_FLOW).unwrap());

    h.provider.set_session(Some(Harness::healthy_session("u4")));
    h.provider.script_get_session([None, None]);
    h.directory.set_role("u4", Role::Teacher);

    let started = Instant::now();
    let user = h
        .orchestrator
        .handle_oauth_callback(&format!("{}?code=abc123", CALLBACK_BASE))
        .await
        .expect("oauth sign-in");

    assert_eq!(user.id, "u4");
    assert_eq!(user.role, Role::Teacher);
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(
        h.provider.calls(),
        vec![
            MockCall::AbsorbOAuthCallback,
            MockCall::GetSession,
            MockCall::GetSession,
            MockCall::GetSession,
        ]
    );
    assert_eq!(h.orchestrator.state(), AuthState::SignedIn);
    assert!(h.orchestrator.is_initialized());
    assert!(!h.orchestrator.is_oauth_processing());
    assert!(!h.orchestrator.is_loading());
    assert!(h.daemon.is_running());
    assert!(!h.store.has(StorageKeys::OAUTH_FLOW).unwrap());
    assert!(h.store.has(StorageKeys::SESSION).unwrap());
}

#[tokio::test(start_paused = true)]
async fn oauth_error_fails_after_the_first_retry() {
    let h = Harness::new();

    let started = Instant::now();
    let err = h
        .orchestrator
        .handle_oauth_callback(&format!(
            "{}?error=access_denied&error_description=User+denied+access",
            CALLBACK_BASE
        ))
        .await
        .unwrap_err();

    match err {
        AuthError::OAuth(message) => assert_eq!(message, "User denied access"),
        other => panic!("unexpected error {:?}", other),
    }
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(2));
    assert_eq!(h.provider.call_count(MockCall::GetSession), 2);
    assert_eq!(h.orchestrator.state(), AuthState::SignedOut);
    assert!(!h.orchestrator.is_oauth_processing());
    assert!(!h.orchestrator.is_loading());
}

#[tokio::test(start_paused = true)]
async fn fragment_tokens_count_as_a_callback() {
    let h = Harness::new();
    h.provider.set_session(Some(Harness::healthy_session("u5")));

    let user = h
        .orchestrator
        .handle_oauth_callback(&format!(
            "{}#access_token=tok&refresh_token=ref&expires_in=3600",
            CALLBACK_BASE
        ))
        .await
        .expect("implicit flow sign-in");

    assert_eq!(user.id, "u5");
    assert_eq!(user.role, Role::Student);
    assert_eq!(h.provider.call_count(MockCall::GetSession), 1);
}

#[tokio::test(start_paused = true)]
async fn flow_marker_without_session_fails_generically() {
    let h = Harness::new();
    h.orchestrator.mark_oauth_flow_started();

    let err = h
        .orchestrator
        .handle_oauth_callback("https://app.lms.dev/dashboard")
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::OAuth(_)));
    assert_eq!(h.provider.call_count(MockCall::GetSession), 3);
    assert!(h.orchestrator.current_user().is_none());
}

#[tokio::test(start_paused = true)]
async fn manual_refresh_publishes_new_session_with_known_role() {
    let h = Harness::new().with_cached_session("u1", Role::Admin, START_SECS + 3600);
    h.orchestrator.start();
    settle().await;

    let refreshed = h.orchestrator.refresh_session().await.expect("refreshed");
    assert_eq!(refreshed.access_token, "access-u1-r1");
    assert_eq!(h.orchestrator.current_session(), Some(refreshed.clone()));
    assert_eq!(h.orchestrator.current_user().unwrap().role, Role::Admin);
    assert_eq!(h.orchestrator.state(), AuthState::SignedIn);
    assert_eq!(h.cache.get_session().unwrap().session, refreshed);
    assert_eq!(h.daemon.status().retry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn failed_manual_refresh_signs_out_locally() {
    let h = Harness::new().with_cached_session("u1", Role::Student, START_SECS + 3600);
    h.orchestrator.start();
    settle().await;

    h.provider.set_refresh_mode(RefreshMode::Reject);
    assert!(h.orchestrator.refresh_session().await.is_none());

    assert!(h.orchestrator.current_user().is_none());
    assert_eq!(h.orchestrator.state(), AuthState::SignedOut);
    assert!(!h.has_owned_keys());
}

#[tokio::test(start_paused = true)]
async fn manual_refresh_without_session_skips_the_provider() {
    let h = Harness::new();

    assert!(h.orchestrator.refresh_session().await.is_none());
    assert_eq!(h.provider.call_count(MockCall::RefreshSession), 0);
    assert!(!h.orchestrator.is_loading());
}
