//! Route authorization gate: the single decision point for protected views.
//!
//! The evaluation order is load-bearing. Circuit-open and navigation checks
//! run before the throttle is allowed to approve a redirect; redirecting
//! while either condition holds is the documented root cause of redirect
//! loops. Consumers render their protected component only on `Render` and
//! must never flash it before the decision resolves.

use std::sync::Arc;

use chrono::Utc;

use crate::error::AuthErrorKind;
use crate::navigation::NavigationGuard;
use crate::session::SessionState;
use crate::throttle::RedirectThrottle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Session is authenticated; the protected view may render.
    Render,
    /// Status indeterminate or a loop-prevention condition holds; show the
    /// neutral loading affordance.
    ShowLoader,
    /// Conclusively unauthenticated with no suppression active. Carries the
    /// return path to restore after login, unless the current path is the
    /// designated no-store landing page.
    RedirectToLogin { return_path: Option<String> },
}

impl GateDecision {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Render => "render",
            Self::ShowLoader => "show_loader",
            Self::RedirectToLogin { .. } => "redirect_to_login",
        }
    }
}

pub struct RouteGate {
    guard: Arc<NavigationGuard>,
    throttle: Arc<RedirectThrottle>,
}

impl RouteGate {
    #[must_use]
    pub fn new(guard: Arc<NavigationGuard>, throttle: Arc<RedirectThrottle>) -> Self {
        Self { guard, throttle }
    }

    /// Pure decision for one protected-route render. No side effects; use
    /// [`RouteGate::decide`] to also stamp the throttle when redirecting.
    #[must_use]
    pub fn evaluate_at(
        &self,
        state: &SessionState,
        current_path: &str,
        now_unix_ms: i64,
    ) -> GateDecision {
        if !state.checked || state.loading {
            return GateDecision::ShowLoader;
        }
        if state.authenticated {
            return GateDecision::Render;
        }
        if state
            .last_error
            .is_some_and(|kind| kind.defers_redirect())
        {
            // Breaker open: wait it out, never bounce to login.
            return GateDecision::ShowLoader;
        }
        if self.guard.should_suppress_redirect_at(now_unix_ms) {
            return GateDecision::ShowLoader;
        }
        if !self.throttle.window_elapsed_at(now_unix_ms) {
            return GateDecision::ShowLoader;
        }
        GateDecision::RedirectToLogin {
            return_path: self.throttle.storable_return_path(current_path),
        }
    }

    /// Decision plus the redirect side effects: stamping the throttle and
    /// recording the intended return path immediately before the redirect
    /// is issued.
    pub fn decide(&self, state: &SessionState, current_path: &str) -> GateDecision {
        self.decide_at(state, current_path, Utc::now().timestamp_millis())
    }

    pub fn decide_at(
        &self,
        state: &SessionState,
        current_path: &str,
        now_unix_ms: i64,
    ) -> GateDecision {
        let decision = self.evaluate_at(state, current_path, now_unix_ms);
        match &decision {
            GateDecision::RedirectToLogin { return_path } => {
                self.throttle
                    .note_redirect_at(now_unix_ms, return_path.as_deref());
            }
            GateDecision::ShowLoader if state.checked && !state.authenticated => {
                tracing::debug!(
                    path = current_path,
                    last_error = state.last_error.map_or("none", |kind| kind.code()),
                    "login redirect deferred"
                );
            }
            _ => {}
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::{MarkerStore, MemoryMarkerStore};
    use crate::session::UserRef;

    fn gate_with(nav_cooldown_ms: i64, redirect_cooldown_ms: i64) -> (RouteGate, Arc<NavigationGuard>, Arc<MemoryMarkerStore>) {
        let guard = Arc::new(NavigationGuard::new(nav_cooldown_ms));
        let store = Arc::new(MemoryMarkerStore::new());
        let throttle = Arc::new(RedirectThrottle::new(
            Arc::clone(&store) as Arc<dyn MarkerStore>,
            redirect_cooldown_ms,
        ));
        (
            RouteGate::new(Arc::clone(&guard), throttle),
            guard,
            store,
        )
    }

    fn unauthorized() -> SessionState {
        SessionState::unauthenticated(AuthErrorKind::Unauthorized)
    }

    fn authenticated() -> SessionState {
        SessionState::authenticated(UserRef {
            user_id: "user_1".to_string(),
            email: "kim@example.com".to_string(),
            display_name: None,
        })
    }

    #[test]
    fn unresolved_state_shows_loader() {
        let (gate, _guard, _store) = gate_with(1_000, 3_000);
        assert_eq!(
            gate.evaluate_at(&SessionState::initial(), "/inbox/7", 0),
            GateDecision::ShowLoader
        );
    }

    #[test]
    fn authenticated_state_renders() {
        let (gate, _guard, _store) = gate_with(1_000, 3_000);
        assert_eq!(
            gate.evaluate_at(&authenticated(), "/inbox/7", 0),
            GateDecision::Render
        );
    }

    #[test]
    fn circuit_open_waits_instead_of_redirecting() {
        let (gate, _guard, _store) = gate_with(1_000, 3_000);
        let state = SessionState::unauthenticated(AuthErrorKind::CircuitOpen);
        assert_eq!(
            gate.evaluate_at(&state, "/inbox/7", 0),
            GateDecision::ShowLoader
        );
    }

    #[test]
    fn recent_navigation_defers_the_redirect() {
        let (gate, guard, _store) = gate_with(1_000, 3_000);
        guard.mark_transition_at(10_000);
        assert_eq!(
            gate.evaluate_at(&unauthorized(), "/inbox/7", 10_500),
            GateDecision::ShowLoader
        );
        assert_eq!(
            gate.evaluate_at(&unauthorized(), "/inbox/7", 11_001),
            GateDecision::RedirectToLogin {
                return_path: Some("/inbox/7".to_string())
            }
        );
    }

    #[test]
    fn unauthenticated_redirects_and_stamps_throttle() {
        let (gate, _guard, store) = gate_with(1_000, 3_000);
        let decision = gate.decide_at(&unauthorized(), "/settings", 10_000);
        assert_eq!(
            decision,
            GateDecision::RedirectToLogin {
                return_path: Some("/settings".to_string())
            }
        );
        let markers = store.load().expect("load");
        assert_eq!(markers.last_private_redirect_unix_ms, Some(10_000));
        assert_eq!(markers.redirect_after_login.as_deref(), Some("/settings"));
    }

    #[test]
    fn second_redirect_within_window_shows_loader() {
        let (gate, _guard, _store) = gate_with(1_000, 3_000);
        let first = gate.decide_at(&unauthorized(), "/inbox/7", 10_000);
        assert!(matches!(first, GateDecision::RedirectToLogin { .. }));
        assert_eq!(
            gate.decide_at(&unauthorized(), "/inbox/7", 11_000),
            GateDecision::ShowLoader
        );
        assert!(matches!(
            gate.decide_at(&unauthorized(), "/inbox/7", 13_001),
            GateDecision::RedirectToLogin { .. }
        ));
    }

    #[test]
    fn landing_path_redirect_carries_no_return_path() {
        let (gate, _guard, store) = gate_with(1_000, 3_000);
        let decision = gate.decide_at(&unauthorized(), "/inbox", 10_000);
        assert_eq!(decision, GateDecision::RedirectToLogin { return_path: None });
        assert!(store.load().expect("load").redirect_after_login.is_none());
    }

    // Back-press scenario: the user lands on a protected page, presses Back
    // within the cooldown, and the gate must hold the loader for the rest
    // of the window instead of flashing the login page.
    #[test]
    fn back_press_within_cooldown_never_redirects() {
        let (gate, guard, _store) = gate_with(1_000, 3_000);
        guard.mark_transition_at(50_000);
        for offset in [1, 250, 500, 999] {
            assert_eq!(
                gate.decide_at(&unauthorized(), "/inbox/7", 50_000 + offset),
                GateDecision::ShowLoader
            );
        }
        assert!(matches!(
            gate.decide_at(&unauthorized(), "/inbox/7", 51_000),
            GateDecision::RedirectToLogin { .. }
        ));
    }

    // Breaker scenario continuation: while the session store reports
    // CircuitOpen the gate holds the loader even with throttle and guard
    // both quiet.
    #[test]
    fn circuit_open_outranks_an_open_throttle_window() {
        let (gate, _guard, _store) = gate_with(1_000, 3_000);
        let state = SessionState::unauthenticated(AuthErrorKind::CircuitOpen);
        for at in [0, 10_000, 60_000] {
            assert_eq!(gate.decide_at(&state, "/inbox/7", at), GateDecision::ShowLoader);
        }
    }

    #[test]
    fn network_error_still_redirects_once_conditions_clear() {
        let (gate, _guard, _store) = gate_with(1_000, 3_000);
        let state = SessionState::unauthenticated(AuthErrorKind::NetworkError);
        assert!(matches!(
            gate.evaluate_at(&state, "/inbox/7", 10_000),
            GateDecision::RedirectToLogin { .. }
        ));
    }
}
