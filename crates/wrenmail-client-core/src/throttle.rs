//! Redirect throttle: at most one login redirect per cooldown window,
//! process-wide and durable across reloads.
//!
//! The stamp has to be durable because a full page reload lands right back
//! in the gate; without the persisted timestamp the reloaded page would
//! redirect again and loop.

use std::sync::Arc;

use chrono::Utc;

use crate::markers::{MarkerStore, update_markers};

pub const DEFAULT_REDIRECT_COOLDOWN_MS: i64 = 3_000;

/// Post-login landing path. Never recorded as a return path; bouncing a
/// user back to it after login is the documented loop-prone round-trip.
pub const DEFAULT_NO_STORE_RETURN_PATH: &str = "/inbox";

pub struct RedirectThrottle {
    cooldown_ms: i64,
    no_store_return_path: String,
    store: Arc<dyn MarkerStore>,
}

impl RedirectThrottle {
    #[must_use]
    pub fn new(store: Arc<dyn MarkerStore>, cooldown_ms: i64) -> Self {
        Self {
            cooldown_ms,
            no_store_return_path: DEFAULT_NO_STORE_RETURN_PATH.to_string(),
            store,
        }
    }

    #[must_use]
    pub fn with_no_store_return_path(mut self, path: impl Into<String>) -> Self {
        self.no_store_return_path = path.into();
        self
    }

    #[must_use]
    pub fn cooldown_ms(&self) -> i64 {
        self.cooldown_ms
    }

    /// `true` once the cooldown since the last issued redirect has elapsed
    /// (or no redirect was ever issued). An unreadable store counts as
    /// elapsed: the stamp is an anti-loop bound, not an authorization.
    #[must_use]
    pub fn window_elapsed(&self) -> bool {
        self.window_elapsed_at(Utc::now().timestamp_millis())
    }

    #[must_use]
    pub fn window_elapsed_at(&self, now_unix_ms: i64) -> bool {
        let markers = match self.store.load() {
            Ok(markers) => markers,
            Err(err) => {
                tracing::warn!(error = %err, "marker load failed, treating redirect window as elapsed");
                return true;
            }
        };
        match markers.last_private_redirect_unix_ms {
            Some(at) => now_unix_ms - at >= self.cooldown_ms,
            None => true,
        }
    }

    /// The return path to record for `current_path`, or `None` when it is
    /// the designated no-store landing path.
    #[must_use]
    pub fn storable_return_path(&self, current_path: &str) -> Option<String> {
        if current_path == self.no_store_return_path {
            None
        } else {
            Some(current_path.to_string())
        }
    }

    /// Stamps the redirect instant and records the intended return path.
    /// Called immediately before the redirect is actually issued. Store
    /// failures are logged, not propagated: the redirect must still fire.
    pub fn note_redirect(&self, return_path: Option<&str>) {
        self.note_redirect_at(Utc::now().timestamp_millis(), return_path);
    }

    pub fn note_redirect_at(&self, now_unix_ms: i64, return_path: Option<&str>) {
        let result = update_markers(self.store.as_ref(), |markers| {
            markers.last_private_redirect_unix_ms = Some(now_unix_ms);
            markers.redirect_after_login = return_path.map(|path| path.to_string());
        });
        if let Err(err) = result {
            tracing::warn!(error = %err, "failed to persist redirect stamp");
        }
        tracing::info!(return_path = return_path.unwrap_or("<none>"), "login redirect issued");
    }

    /// Pops the stored return path for the post-login navigation. One-shot:
    /// a second call returns `None`.
    pub fn take_redirect_after_login(&self) -> Option<String> {
        let mut taken = None;
        let result = update_markers(self.store.as_ref(), |markers| {
            taken = markers.redirect_after_login.take();
        });
        if let Err(err) = result {
            tracing::warn!(error = %err, "failed to consume stored return path");
            return None;
        }
        taken
    }

    /// Drops any stored return path. Used on explicit logout so the next
    /// login does not resume a stale destination.
    pub fn clear_return_path(&self) {
        let result = update_markers(self.store.as_ref(), |markers| {
            markers.redirect_after_login = None;
        });
        if let Err(err) = result {
            tracing::warn!(error = %err, "failed to clear stored return path");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::MemoryMarkerStore;

    fn throttle(cooldown_ms: i64) -> (Arc<MemoryMarkerStore>, RedirectThrottle) {
        let store = Arc::new(MemoryMarkerStore::new());
        let throttle = RedirectThrottle::new(Arc::clone(&store) as Arc<dyn MarkerStore>, cooldown_ms);
        (store, throttle)
    }

    #[test]
    fn window_elapsed_with_no_prior_redirect() {
        let (_store, throttle) = throttle(3_000);
        assert!(throttle.window_elapsed_at(0));
    }

    #[test]
    fn only_first_redirect_within_window_is_honored() {
        let (_store, throttle) = throttle(3_000);
        assert!(throttle.window_elapsed_at(10_000));
        throttle.note_redirect_at(10_000, Some("/inbox/7"));
        assert!(!throttle.window_elapsed_at(10_001));
        assert!(!throttle.window_elapsed_at(12_999));
        assert!(throttle.window_elapsed_at(13_000));
    }

    #[test]
    fn stamp_survives_a_new_throttle_over_the_same_store() {
        let (store, throttle) = throttle(3_000);
        throttle.note_redirect_at(10_000, None);
        // Fresh instance over the same durable store, as after a reload.
        let reloaded = RedirectThrottle::new(store as Arc<dyn MarkerStore>, 3_000);
        assert!(!reloaded.window_elapsed_at(11_000));
    }

    #[test]
    fn landing_path_is_never_stored() {
        let (_store, throttle) = throttle(3_000);
        assert_eq!(throttle.storable_return_path("/inbox"), None);
        assert_eq!(
            throttle.storable_return_path("/inbox/7").as_deref(),
            Some("/inbox/7")
        );
    }

    #[test]
    fn return_path_pops_exactly_once() {
        let (_store, throttle) = throttle(3_000);
        throttle.note_redirect_at(10_000, Some("/settings"));
        assert_eq!(throttle.take_redirect_after_login().as_deref(), Some("/settings"));
        assert_eq!(throttle.take_redirect_after_login(), None);
    }

    #[test]
    fn clear_return_path_discards_pending_destination() {
        let (_store, throttle) = throttle(3_000);
        throttle.note_redirect_at(10_000, Some("/settings"));
        throttle.clear_return_path();
        assert_eq!(throttle.take_redirect_after_login(), None);
    }
}
