use crate::cleanup;
use crate::events::{DaemonEvent, DaemonEventPayload, DaemonStatus, ExpireReason, ListenerId};
use auth_engine::{AuthError, IdentityProvider, Session};
use parking_lot::Mutex;
use session_config_and_utils::{Clock, SessionTimings};
use session_storage::{KeyValueStore, StorageKeys};
use std::collections::VecDeque;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

type Listener = Arc<dyn Fn(&DaemonEvent) + Send + Sync>;

#[derive(Default)]
struct RunState {
    running: bool,
    /// Bumped on every start and stop; work from an older run is discarded.
    generation: u64,
    last_check: Option<i64>,
    last_heartbeat: Option<i64>,
    retry_count: u32,
    retry_tx: Option<mpsc::UnboundedSender<()>>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    timings: SessionTimings,
    state: Mutex<RunState>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    history: Mutex<VecDeque<DaemonEvent>>,
    dispatch_tx: mpsc::UnboundedSender<DaemonEvent>,
}

/// Background monitor that keeps the provider session alive.
///
/// Three timers run while started: a session check (which may trigger a
/// proactive refresh), a status heartbeat, and a storage cleanup. Failures
/// back off linearly and stop the daemon once the retry budget is spent.
/// Listeners are invoked from a dedicated dispatcher task, so a panicking
/// listener never reaches the timers.
///
/// Must be constructed inside a tokio runtime.
#[derive(Clone)]
pub struct SessionDaemon {
    inner: Arc<Inner>,
}

impl SessionDaemon {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        timings: SessionTimings,
    ) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            provider,
            store,
            clock,
            timings,
            state: Mutex::new(RunState::default()),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            history: Mutex::new(VecDeque::new()),
            dispatch_tx,
        });
        tokio::spawn(run_dispatcher(Arc::downgrade(&inner), dispatch_rx));
        Self { inner }
    }

    /// Start the timers. A second call while running is a no-op.
    pub fn start(&self) {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if state.running {
            debug!("Session daemon already running");
            return;
        }

        state.running = true;
        state.generation += 1;
        state.retry_count = 0;
        let generation = state.generation;

        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        state.retry_tx = Some(retry_tx);
        state.tasks = vec![
            tokio::spawn(run_check_loop(
                Arc::downgrade(inner),
                generation,
                inner.timings.check_interval(),
                retry_rx,
            )),
            spawn_timer(inner, generation, inner.timings.heartbeat_interval(), |inner| async move {
                inner.heartbeat();
            }),
            spawn_timer(inner, generation, inner.timings.cleanup_interval(), |inner| async move {
                inner.cleanup();
            }),
        ];

        info!(
            check_interval_ms = inner.timings.check_interval_ms,
            refresh_threshold_ms = inner.timings.refresh_threshold_ms,
            "Session daemon started"
        );
    }

    /// Stop all timers. In-flight work finishes without side effects.
    pub fn stop(&self) {
        if self.inner.stop_run(None) {
            info!("Session daemon stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    pub fn status(&self) -> DaemonStatus {
        self.inner.status()
    }

    /// Recent events, oldest first.
    pub fn events(&self) -> Vec<DaemonEvent> {
        self.inner.history.lock().iter().cloned().collect()
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&DaemonEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Returns false if the id was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.running && state.generation == generation
    }

    /// Stop the current run, or only the given run when `generation` is set.
    fn stop_run(&self, generation: Option<u64>) -> bool {
        let tasks = {
            let mut state = self.state.lock();
            if !state.running || generation.is_some_and(|g| g != state.generation) {
                return false;
            }
            state.running = false;
            state.generation += 1;
            state.retry_tx = None;
            std::mem::take(&mut state.tasks)
        };
        for task in tasks {
            task.abort();
        }
        true
    }

    fn status(&self) -> DaemonStatus {
        let state = self.state.lock();
        DaemonStatus {
            is_running: state.running,
            last_check: state.last_check,
            last_heartbeat: state.last_heartbeat,
            retry_count: state.retry_count,
            check_interval_ms: self.timings.check_interval_ms,
            refresh_threshold_ms: self.timings.refresh_threshold_ms,
            max_retry_attempts: self.timings.max_retry_attempts,
        }
    }

    fn emit(&self, payload: DaemonEventPayload, error: Option<String>) {
        let event = DaemonEvent {
            timestamp: self.clock.now_millis(),
            payload,
            error,
        };
        {
            let mut history = self.history.lock();
            while history.len() >= self.timings.event_history_limit.max(1) {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        if self.dispatch_tx.send(event).is_err() {
            debug!("Daemon dispatcher gone, event kept in history only");
        }
    }

    async fn check_session(&self, generation: u64) {
        {
            let mut state = self.state.lock();
            if !state.running || state.generation != generation {
                return;
            }
            state.last_check = Some(self.clock.now_millis());
        }

        let result = self.provider.get_session().await;
        if !self.is_current(generation) {
            debug!("Discarding session check from a stopped run");
            return;
        }

        match result {
            Ok(None) => {
                info!("No session present, clearing storage");
                self.clear_storage();
                self.emit(
                    DaemonEventPayload::Expire {
                        reason: ExpireReason::NoSession,
                    },
                    None,
                );
            }
            Ok(Some(session)) => {
                let expires_in = session.expires_in(self.clock.now_secs());
                if expires_in.saturating_mul(1000) <= self.timings.refresh_threshold_ms as i64 {
                    debug!(expires_in, "Session close to expiry, refreshing");
                    self.refresh(generation, &session).await;
                } else {
                    self.state.lock().retry_count = 0;
                    self.emit(
                        DaemonEventPayload::Heartbeat {
                            healthy: Some(true),
                            expires_in: Some(expires_in),
                            status: None,
                        },
                        None,
                    );
                }
            }
            Err(err) => self.handle_failure(generation, err),
        }
    }

    async fn refresh(&self, generation: u64, session: &Session) {
        let result = self.provider.refresh_session(session).await;
        if !self.is_current(generation) {
            debug!("Discarding refresh result from a stopped run");
            return;
        }

        match result {
            Ok(refreshed) => {
                self.state.lock().retry_count = 0;
                self.write_through(&refreshed);
                info!(expires_at = refreshed.expires_at, "Session refreshed");
                self.emit(
                    DaemonEventPayload::Refresh {
                        success: true,
                        expires_at: Some(refreshed.expires_at),
                        session: Some(Box::new(refreshed)),
                    },
                    None,
                );
            }
            Err(err) if err.is_refresh_token_rejected() => {
                warn!(error = %err, "Refresh token rejected, session expired");
                self.clear_storage();
                self.emit(
                    DaemonEventPayload::Expire {
                        reason: ExpireReason::RefreshFailed,
                    },
                    Some(err.to_string()),
                );
            }
            Err(err) => self.handle_failure(generation, err),
        }
    }

    fn handle_failure(&self, generation: u64, err: AuthError) {
        let retry_count = {
            let mut state = self.state.lock();
            if !state.running || state.generation != generation {
                return;
            }
            state.retry_count += 1;
            state.retry_count
        };

        if retry_count > self.timings.max_retry_attempts {
            error!(retry_count, error = %err, "Session checks exhausted retries, stopping daemon");
            self.stop_run(Some(generation));
            self.emit(
                DaemonEventPayload::Error {
                    fatal: true,
                    retry_count,
                    retry_in_ms: None,
                },
                Some(err.to_string()),
            );
            return;
        }

        let delay = self.timings.retry_delay_for(retry_count);
        warn!(
            retry_count,
            retry_in_ms = delay.as_millis() as u64,
            error = %err,
            "Session check failed, scheduling retry"
        );
        self.emit(
            DaemonEventPayload::Error {
                fatal: false,
                retry_count,
                retry_in_ms: Some(delay.as_millis() as u64),
            },
            Some(err.to_string()),
        );
        self.schedule_retry(generation, delay);
    }

    fn schedule_retry(&self, generation: u64, delay: Duration) {
        let mut state = self.state.lock();
        if !state.running || state.generation != generation {
            return;
        }
        let Some(retry_tx) = state.retry_tx.clone() else {
            return;
        };
        state.tasks.retain(|task| !task.is_finished());
        state.tasks.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = retry_tx.send(());
        }));
    }

    fn heartbeat(&self) {
        self.state.lock().last_heartbeat = Some(self.clock.now_millis());
        let status = self.status();
        self.emit(
            DaemonEventPayload::Heartbeat {
                healthy: None,
                expires_in: None,
                status: Some(status),
            },
            None,
        );
    }

    fn cleanup(&self) {
        match cleanup::sweep(
            self.store.as_ref(),
            self.clock.now_millis(),
            self.timings.legacy_key_max_age_ms,
        ) {
            Ok(removed) => {
                if removed > 0 {
                    info!(removed, "Removed stale storage keys");
                }
                self.emit(DaemonEventPayload::Cleanup { removed }, None);
            }
            Err(err) => warn!(error = %err, "Storage cleanup failed"),
        }
    }

    /// Persist refreshed tokens straight to the owned keys.
    fn write_through(&self, session: &Session) {
        let encoded = match serde_json::to_string(session) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(error = %err, "Failed to encode refreshed session");
                return;
            }
        };
        let now = self.clock.now_millis().to_string();
        for (key, value) in [(StorageKeys::SESSION, encoded.as_str()), (StorageKeys::TIMESTAMP, now.as_str())] {
            if let Err(err) = self.store.set(key, value) {
                warn!(key, error = %err, "Failed to persist refreshed session");
            }
        }
    }

    fn clear_storage(&self) {
        for key in StorageKeys::OWNED.iter().chain(StorageKeys::LEGACY.iter()) {
            if let Err(err) = self.store.delete(key) {
                warn!(key, error = %err, "Failed to clear storage key");
            }
        }
    }

    fn dispatch(&self, event: &DaemonEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(event = event.kind(), "Daemon listener panicked");
            }
        }
    }
}

async fn run_dispatcher(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<DaemonEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.dispatch(&event);
    }
}

/// Session checks run serially here, woken by the interval or a retry.
async fn run_check_loop(
    inner: Weak<Inner>,
    generation: u64,
    period: Duration,
    mut retry_rx: mpsc::UnboundedReceiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            Some(()) = retry_rx.recv() => {}
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.is_current(generation) {
            break;
        }
        inner.check_session(generation).await;
    }
}

fn spawn_timer<F, Fut>(inner: &Arc<Inner>, generation: u64, period: Duration, tick: F) -> JoinHandle<()>
where
    F: Fn(Arc<Inner>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if !inner.is_current(generation) {
                break;
            }
            tick(inner).await;
        }
    })
}
