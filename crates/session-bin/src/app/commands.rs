//! One handler per CLI command.

use super::SessionCore;
use auth_orchestrator::AuthSnapshot;
use session_config_and_utils::Paths;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Upper bound on waiting for startup in one-shot commands.
const STARTUP_WAIT: Duration = Duration::from_secs(10);

/// Start the orchestrator and wait for it to settle.
async fn mount(core: &SessionCore) {
    core.orchestrator.start();
    if tokio::time::timeout(STARTUP_WAIT, core.orchestrator.wait_until_initialized())
        .await
        .is_err()
    {
        warn!(
            timeout_secs = STARTUP_WAIT.as_secs(),
            "Startup did not complete, continuing with current state"
        );
    }
}

fn describe(snapshot: &AuthSnapshot) -> String {
    match &snapshot.user {
        Some(user) => format!(
            "state={:?} user={} email={} role={} loading={}",
            snapshot.state,
            user.id,
            user.email.as_deref().unwrap_or("-"),
            user.role,
            snapshot.loading
        ),
        None => format!(
            "state={:?} user=- loading={}",
            snapshot.state, snapshot.loading
        ),
    }
}

pub async fn run(core: &SessionCore) -> CommandResult {
    info!("Mounting session core");
    let mut rx = core.orchestrator.subscribe();
    core.orchestrator.start();
    println!("{}", describe(&rx.borrow_and_update()));

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("{}", describe(&rx.borrow_and_update()));
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down");
                break;
            }
        }
    }

    core.orchestrator.unmount();
    Ok(())
}

pub async fn status(core: &SessionCore) -> CommandResult {
    mount(core).await;
    let report = core.inspector.report();
    println!("{}", serde_json::to_string_pretty(&report)?);
    core.orchestrator.unmount();
    Ok(())
}

pub async fn login(core: &SessionCore, email: &str, password: &str) -> CommandResult {
    let session = core.client.sign_in_with_password(email, password).await?;
    info!(user_id = %session.user.id, "Password sign-in accepted");

    mount(core).await;
    println!("{}", describe(&core.orchestrator.snapshot()));
    core.orchestrator.unmount();
    Ok(())
}

pub fn oauth_url(core: &SessionCore, provider: &str, redirect_to: &str) -> CommandResult {
    let url = core.client.oauth_authorize_url(provider, redirect_to)?;
    core.orchestrator.mark_oauth_flow_started();
    println!("{}", url);
    Ok(())
}

pub async fn oauth_callback(core: &SessionCore, url: &str) -> CommandResult {
    let user = core.orchestrator.handle_oauth_callback(url).await?;
    println!("Signed in as {} ({})", user.id, user.role);
    core.orchestrator.unmount();
    Ok(())
}

pub async fn refresh(core: &SessionCore) -> CommandResult {
    mount(core).await;
    match core.orchestrator.refresh_session().await {
        Some(session) => println!("Session refreshed, expires_at={}", session.expires_at),
        None => println!("Refresh failed, signed out"),
    }
    core.orchestrator.unmount();
    Ok(())
}

pub async fn sign_out(core: &SessionCore) -> CommandResult {
    mount(core).await;
    core.orchestrator.sign_out().await;
    println!("Signed out");
    core.orchestrator.unmount();
    Ok(())
}

pub fn clear(core: &SessionCore) {
    core.inspector.force_clear();
    println!("Cached session cleared");
}

pub async fn export(core: &SessionCore, paths: &Paths, path: Option<PathBuf>) -> CommandResult {
    mount(core).await;
    let path = path.unwrap_or_else(|| {
        paths.exports_dir().join(format!(
            "session-state-{}.json",
            chrono::Utc::now().format("%Y%m%d-%H%M%S")
        ))
    });
    core.inspector.export_state(&path)?;
    println!("{}", path.display());
    core.orchestrator.unmount();
    Ok(())
}

pub async fn ping(core: &SessionCore) -> CommandResult {
    let report = core.inspector.ping_provider().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
