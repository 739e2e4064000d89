use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
use log::{debug, info, warn};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::ApiClient;
use crate::config::TelemetryConfig;
use crate::cursor::{
    CursorDwellTracker, CursorTargetConfig, CursorTargetDefinition, DEFAULT_SOURCE_KEY,
};

use super::{EventQueue, QueuedEvent};

struct SessionState {
    session_id: Option<String>,
    started_instant: Option<Instant>,
    current_path: Option<String>,
    queue: EventQueue,
    tracker: CursorDwellTracker,
}

struct Inner {
    api: ApiClient,
    state: Mutex<SessionState>,
    flush_interval: Duration,
    target_config: CursorTargetConfig,
    flush_loop: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

/// Owns one page session per route visit.
///
/// Start-on-enter, end-on-leave: route changes end the previous path's
/// session (forced flush, ordinary write) before starting the new one; tab
/// hide forces a flush; unload and detach end with the beacon path. Session
/// end is best-effort and never blocks navigation. All mutable state lives
/// here, injected at construction; `attach()`/`detach()` bound the periodic
/// flush loop.
#[derive(Clone)]
pub struct PageSessionManager {
    inner: Arc<Inner>,
}

impl PageSessionManager {
    pub fn new(
        api: ApiClient,
        config: &TelemetryConfig,
        target_config: CursorTargetConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                state: Mutex::new(SessionState {
                    session_id: None,
                    started_instant: None,
                    current_path: None,
                    queue: EventQueue::new(),
                    tracker: CursorDwellTracker::new(Duration::from_millis(
                        config.min_cursor_batch_ms,
                    )),
                }),
                flush_interval: Duration::from_millis(config.flush_interval_ms),
                target_config,
                flush_loop: Mutex::new(None),
            }),
        }
    }

    /// Spawn the periodic flush loop. Idempotent; a prior loop is cancelled.
    pub async fn attach(&self) {
        let mut guard = self.inner.flush_loop.lock().await;
        if let Some((token, handle)) = guard.take() {
            token.cancel();
            handle.abort();
        }

        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();
        let manager = self.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(manager.inner.flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.flush(false).await;
                    }
                    _ = token_clone.cancelled() => {
                        info!("Flush loop shutting down");
                        break;
                    }
                }
            }
        });

        *guard = Some((cancel_token, handle));
    }

    /// Stop the flush loop and end the open session (beacon, forced flush).
    pub async fn detach(&self) {
        let task = self.inner.flush_loop.lock().await.take();
        if let Some((token, handle)) = task {
            token.cancel();
            if let Err(err) = handle.await {
                warn!("Flush loop task failed to join: {err}");
            }
        }
        self.end_session(true, true).await;
    }

    /// Route change: end the previous path's session, swap in the new
    /// path's default cursor targets, then start the new session. End and
    /// start are explicitly sequenced; a new session is only attempted
    /// after the previous end has been dispatched.
    pub async fn handle_route_change(&self, path: &str) {
        let previous = {
            let state = self.inner.state.lock().await;
            state.current_path.clone()
        };

        if previous.as_deref() == Some(path) {
            return;
        }
        if previous.is_some() {
            self.end_session(false, true).await;
        }

        {
            let mut state = self.inner.state.lock().await;
            let targets = self.inner.target_config.targets_for_path(path);
            state.tracker.set_source(DEFAULT_SOURCE_KEY, targets);
        }

        self.start_session(path).await;

        let mut state = self.inner.state.lock().await;
        state.current_path = Some(path.to_string());
    }

    /// Issue the session-start write. On failure the session id stays
    /// unset and subsequent operations no-op until the next successful
    /// start.
    pub async fn start_session(&self, path: &str) {
        {
            let mut state = self.inner.state.lock().await;
            state.started_instant = Some(Instant::now());
        }

        match self.inner.api.start_page_session(path).await {
            Ok(session_id) => {
                debug!("Page session {session_id} started for {path}");
                let mut state = self.inner.state.lock().await;
                state.session_id = Some(session_id);
            }
            Err(err) => {
                warn!("Failed to start page session for {path}: {err}");
                let mut state = self.inner.state.lock().await;
                state.session_id = None;
            }
        }
    }

    /// End the open session: flush pending dwell/events first, then send
    /// the end-of-session write. Failures are swallowed; ending never
    /// blocks navigation.
    pub async fn end_session(&self, use_beacon: bool, force_flush: bool) {
        let session_id = {
            let state = self.inner.state.lock().await;
            state.session_id.clone()
        };
        let Some(session_id) = session_id else {
            return;
        };

        self.flush(force_flush).await;

        let (ended_at, duration_seconds) = {
            let state = self.inner.state.lock().await;
            let duration = state
                .started_instant
                .map(|started| started.elapsed().as_secs() as i64);
            (Utc::now(), duration)
        };

        if let Err(err) = self
            .inner
            .api
            .end_page_session(&session_id, ended_at, duration_seconds, use_beacon)
            .await
        {
            warn!("Failed to end page session {session_id}: {err}");
        }

        let mut state = self.inner.state.lock().await;
        state.session_id = None;
        state.started_instant = None;
    }

    /// Transmit queued events and due dwell updates in one pass. Failed
    /// batches are re-queued at the head for the next trigger.
    pub async fn flush(&self, force_cursor: bool) {
        let (session_id, events, updates) = {
            let mut state = self.inner.state.lock().await;
            let Some(session_id) = state.session_id.clone() else {
                return;
            };
            let events = state.queue.take_batch();
            let updates = state.tracker.flush(force_cursor);
            (session_id, events, updates)
        };

        if events.is_empty() && updates.is_empty() {
            return;
        }

        if !events.is_empty() {
            if let Err(err) = self.inner.api.post_events_batch(&session_id, &events).await {
                warn!("Event batch failed, re-queueing {} events: {err}", events.len());
                let mut state = self.inner.state.lock().await;
                state.queue.requeue_front(events);
            }
        }

        if !updates.is_empty() {
            if let Err(err) = self.inner.api.post_cursor_dwell(&session_id, &updates).await {
                warn!(
                    "Cursor dwell batch failed, re-queueing {} updates: {err}",
                    updates.len()
                );
                let mut state = self.inner.state.lock().await;
                state.tracker.requeue(updates);
            }
        }
    }

    /// Tab hide: push out what we have, closing open dwell intervals, but
    /// keep the session open.
    pub async fn handle_visibility_hidden(&self) {
        self.flush(true).await;
    }

    /// Unload: terminal, best-effort via the beacon path.
    pub async fn handle_unload(&self) {
        self.end_session(true, true).await;
    }

    /// Queue an interaction event. Dropped when no session is open, so
    /// events are never attributed to the wrong page visit.
    pub async fn enqueue_event(&self, event: QueuedEvent) {
        let mut state = self.inner.state.lock().await;
        if state.session_id.is_some() {
            state.queue.enqueue(event);
        } else {
            debug!("Dropping {} event with no open session", event.event_type);
        }
    }

    pub async fn observe_pointer(&self, x: f64, y: f64) {
        let mut state = self.inner.state.lock().await;
        state.tracker.observe_pointer(x, y);
    }

    pub async fn pointer_left(&self) {
        let mut state = self.inner.state.lock().await;
        state.tracker.pointer_left();
    }

    /// Register or replace an independent source's cursor targets.
    pub async fn set_cursor_targets(&self, source_id: &str, targets: Vec<CursorTargetDefinition>) {
        let mut state = self.inner.state.lock().await;
        state.tracker.set_source(source_id, targets);
    }

    pub async fn clear_cursor_targets(&self, source_id: &str) {
        let mut state = self.inner.state.lock().await;
        state.tracker.clear_source(source_id);
    }

    /// Opaque id for a new target source.
    pub fn new_cursor_source_id(&self) -> String {
        Uuid::new_v4().to_string()
    }

    pub async fn session_id(&self) -> Option<String> {
        self.inner.state.lock().await.session_id.clone()
    }
}
