//! Navigation guard: suppresses auth-driven redirects while the browser is
//! mid-transition.
//!
//! A login redirect fired during a back/forward transition flashes the login
//! page before the destination's own auth check resolves. The guard holds a
//! short cooldown after every observed transition; the gate reads it before
//! acting on "unauthenticated". The guard is conservative: router-internal
//! pushes reset the window too, suppressing more than strictly necessary
//! rather than risking the flicker.

use std::sync::{Arc, Mutex};

use chrono::Utc;

pub const DEFAULT_NAVIGATION_COOLDOWN_MS: i64 = 1_000;

/// Injectable transition tracker. Constructed once and shared; tests create
/// isolated instances instead of touching process-wide state.
#[derive(Debug)]
pub struct NavigationGuard {
    cooldown_ms: i64,
    last_transition_unix_ms: Mutex<Option<i64>>,
}

impl NavigationGuard {
    #[must_use]
    pub fn new(cooldown_ms: i64) -> Self {
        Self {
            cooldown_ms,
            last_transition_unix_ms: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn cooldown_ms(&self) -> i64 {
        self.cooldown_ms
    }

    /// Records an observed history transition: pop, unload, or a
    /// router-internal push/replace.
    pub fn mark_transition(&self) {
        self.mark_transition_at(Utc::now().timestamp_millis());
    }

    pub fn mark_transition_at(&self, now_unix_ms: i64) {
        let mut last = self
            .last_transition_unix_ms
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Some(now_unix_ms);
    }

    /// `true` while the cooldown window after the last transition is still
    /// running.
    #[must_use]
    pub fn should_suppress_redirect(&self) -> bool {
        self.should_suppress_redirect_at(Utc::now().timestamp_millis())
    }

    #[must_use]
    pub fn should_suppress_redirect_at(&self, now_unix_ms: i64) -> bool {
        let last = self
            .last_transition_unix_ms
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *last {
            Some(at) => now_unix_ms - at < self.cooldown_ms,
            None => false,
        }
    }
}

impl Default for NavigationGuard {
    fn default() -> Self {
        Self::new(DEFAULT_NAVIGATION_COOLDOWN_MS)
    }
}

/// Host-side history mutation. Implemented by the embedding shell; the
/// library never patches platform primitives to observe navigation.
pub trait NavigationSink: Send + Sync {
    fn push(&self, path: &str);
    fn replace(&self, path: &str);
}

/// The explicit navigate capability all internal routing goes through. Each
/// call records a transition on the shared guard before mutating history, so
/// the application's own navigation participates in the cooldown instead of
/// being misread as an external back-navigation.
pub struct Navigator {
    guard: Arc<NavigationGuard>,
    sink: Box<dyn NavigationSink>,
}

impl Navigator {
    pub fn new(guard: Arc<NavigationGuard>, sink: Box<dyn NavigationSink>) -> Self {
        Self { guard, sink }
    }

    pub fn push(&self, path: &str) {
        self.guard.mark_transition();
        self.sink.push(path);
    }

    pub fn replace(&self, path: &str) {
        self.guard.mark_transition();
        self.sink.replace(path);
    }

    /// Feed for transitions the shell observes rather than initiates:
    /// history pops (back/forward) and page unloads.
    pub fn record_external_transition(&self) {
        self.guard.mark_transition();
    }

    #[must_use]
    pub fn guard(&self) -> &Arc<NavigationGuard> {
        &self.guard
    }
}
