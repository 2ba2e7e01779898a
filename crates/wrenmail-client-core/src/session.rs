//! Authoritative in-memory record of the last authentication probe, plus
//! the probe scheduling rules: breaker admission, concurrent-caller dedupe,
//! and the stale-resolution guard.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::breaker::CircuitBreaker;
use crate::error::AuthErrorKind;
use crate::markers::{MarkerStore, update_markers};

/// Minimal reference to the signed-in account, decoded from the probe
/// response payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub user_id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Session status as of the last resolved probe. `authenticated` is
/// meaningless until `checked` is true; `checked` stays false while the
/// initial load is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub checked: bool,
    pub authenticated: bool,
    pub loading: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<AuthErrorKind>,
}

impl SessionState {
    /// Process-start state, also restored by [`SessionStore::invalidate`].
    #[must_use]
    pub fn initial() -> Self {
        Self {
            checked: false,
            authenticated: false,
            loading: true,
            user: None,
            last_error: None,
        }
    }

    #[must_use]
    pub fn authenticated(user: UserRef) -> Self {
        Self {
            checked: true,
            authenticated: true,
            loading: false,
            user: Some(user),
            last_error: None,
        }
    }

    #[must_use]
    pub fn unauthenticated(kind: AuthErrorKind) -> Self {
        Self {
            checked: true,
            authenticated: false,
            loading: false,
            user: None,
            last_error: Some(kind),
        }
    }
}

/// Outcome of one authentication probe. Transport failures are data here,
/// not errors: the session layer folds them into state instead of letting
/// them propagate across the gate boundary.
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    Authenticated(UserRef),
    Unauthorized,
    TransportFailure(String),
}

/// The probe transport seam, implemented by the HTTP client. The probe is a
/// safe GET and carries no CSRF header.
#[async_trait]
pub trait AuthTransport: Send + Sync {
    async fn probe_auth(&self) -> ProbeOutcome;
}

struct SessionCell {
    state: SessionState,
    // Bumped by invalidate(); a probe resolution carrying an older
    // generation is discarded instead of overwriting newer state.
    generation: u64,
    inflight: Option<watch::Receiver<Option<SessionState>>>,
}

struct StoreInner {
    transport: Arc<dyn AuthTransport>,
    breaker: Arc<CircuitBreaker>,
    markers: Arc<dyn MarkerStore>,
    cell: Mutex<SessionCell>,
}

enum CheckPlan {
    Attach(watch::Receiver<Option<SessionState>>),
    Resolved(SessionState),
    Probe {
        tx: watch::Sender<Option<SessionState>>,
        rx: watch::Receiver<Option<SessionState>>,
        generation: u64,
    },
}

/// Shared session store; cheap to clone, all clones observe the same state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

impl SessionStore {
    #[must_use]
    pub fn new(
        transport: Arc<dyn AuthTransport>,
        breaker: Arc<CircuitBreaker>,
        markers: Arc<dyn MarkerStore>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                transport,
                breaker,
                markers,
                cell: Mutex::new(SessionCell {
                    state: SessionState::initial(),
                    generation: 0,
                    inflight: None,
                }),
            }),
        }
    }

    /// Synchronous read of the last resolved state. Never blocks on the
    /// network.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.lock_cell().state.clone()
    }

    /// Resolves the current authentication status.
    ///
    /// Concurrent callers are deduplicated into a single in-flight probe;
    /// every caller observes the same resolution. When the breaker denies
    /// admission this resolves immediately with `CircuitOpen` and no
    /// network call. A caller dropping its future does not cancel the probe
    /// for the others.
    pub async fn check_auth(&self) -> SessionState {
        let plan = {
            let mut cell = self.inner.lock_cell();
            if let Some(rx) = cell.inflight.clone() {
                CheckPlan::Attach(rx)
            } else if self.inner.breaker.allow_probe() {
                let (tx, rx) = watch::channel(None);
                cell.inflight = Some(rx.clone());
                CheckPlan::Probe {
                    tx,
                    rx,
                    generation: cell.generation,
                }
            } else {
                tracing::debug!("auth probe short-circuited, circuit open");
                let state = SessionState::unauthenticated(AuthErrorKind::CircuitOpen);
                cell.state = state.clone();
                CheckPlan::Resolved(state)
            }
        };

        match plan {
            CheckPlan::Resolved(state) => state,
            CheckPlan::Attach(rx) => self.await_resolution(rx).await,
            CheckPlan::Probe { tx, rx, generation } => {
                let inner = Arc::clone(&self.inner);
                // Detached so the probe survives caller cancellation; the
                // generation check keeps a stale resolution from landing.
                tokio::spawn(async move {
                    let outcome = inner.transport.probe_auth().await;
                    let resolved = inner.apply_probe_outcome(generation, outcome);
                    let _ = tx.send(Some(resolved));
                });
                self.await_resolution(rx).await
            }
        }
    }

    /// Resets to the initial unresolved state, closes the breaker, and
    /// drops any stored post-login return path. Used on explicit logout;
    /// any probe still in flight resolves into the void.
    pub fn invalidate(&self) {
        let mut cell = self.inner.lock_cell();
        cell.generation = cell.generation.wrapping_add(1);
        cell.state = SessionState::initial();
        cell.inflight = None;
        self.inner.breaker.reset();
        if let Err(err) = update_markers(self.inner.markers.as_ref(), |markers| {
            markers.redirect_after_login = None;
        }) {
            tracing::warn!(error = %err, "failed to clear stored return path");
        }
        tracing::info!("session invalidated");
    }

    async fn await_resolution(
        &self,
        mut rx: watch::Receiver<Option<SessionState>>,
    ) -> SessionState {
        loop {
            if let Some(state) = rx.borrow_and_update().clone() {
                return state;
            }
            if rx.changed().await.is_err() {
                // Resolver dropped without publishing (runtime shutdown);
                // the last known state is the best available answer.
                return self.state();
            }
        }
    }
}

impl StoreInner {
    fn lock_cell(&self) -> MutexGuard<'_, SessionCell> {
        self.cell
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn apply_probe_outcome(&self, generation: u64, outcome: ProbeOutcome) -> SessionState {
        let mut cell = self.lock_cell();
        if cell.generation != generation {
            tracing::debug!("stale auth probe resolution discarded");
            return cell.state.clone();
        }

        let state = match outcome {
            ProbeOutcome::Authenticated(user) => {
                self.breaker.record_success();
                SessionState::authenticated(user)
            }
            ProbeOutcome::Unauthorized => {
                self.breaker.record_failure();
                let now_unix_ms = Utc::now().timestamp_millis();
                if let Err(err) = update_markers(self.markers.as_ref(), |markers| {
                    markers.auth401_events.record(now_unix_ms);
                }) {
                    tracing::warn!(error = %err, "failed to record 401 event");
                }
                tracing::debug!("auth probe returned 401");
                SessionState::unauthenticated(AuthErrorKind::Unauthorized)
            }
            ProbeOutcome::TransportFailure(message) => {
                self.breaker.record_failure();
                tracing::warn!(error = %message, "auth probe failed in transport");
                SessionState::unauthenticated(AuthErrorKind::NetworkError)
            }
        };

        cell.state = state.clone();
        cell.inflight = None;
        state
    }
}
