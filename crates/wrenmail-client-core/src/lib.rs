#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]
//! Transport-free core of the wrenmail client's authentication resilience
//! layer.
//!
//! The hard problem this crate owns is deciding, under partial and repeated
//! failure, whether a protected view may render, whether a redirect to the
//! login flow should fire, and whether further authentication probes should
//! be attempted at all. Four independently updated signals feed that
//! decision: the last probe result ([`session::SessionStore`]), accumulated
//! failure history ([`breaker::CircuitBreaker`]), recent history transitions
//! ([`navigation::NavigationGuard`]), and the durable redirect cooldown
//! ([`throttle::RedirectThrottle`]). The [`gate::RouteGate`] combines them
//! into a single render decision without redirect loops or probe storms.
//!
//! Everything here is an explicitly constructed, injectable instance; the
//! HTTP transport is a trait seam ([`session::AuthTransport`]) implemented
//! by `wrenmail-client`.

pub mod breaker;
pub mod debounce;
pub mod error;
pub mod gate;
pub mod markers;
pub mod navigation;
pub mod session;
pub mod throttle;

pub use breaker::{BreakerStatus, CircuitBreaker, CircuitBreakerConfig};
pub use debounce::DebouncedTask;
pub use error::AuthErrorKind;
pub use gate::{GateDecision, RouteGate};
pub use markers::{
    Auth401Log, FileMarkerStore, MarkerStore, MarkerStoreError, Markers, MemoryMarkerStore,
};
pub use navigation::{NavigationGuard, NavigationSink, Navigator};
pub use session::{AuthTransport, ProbeOutcome, SessionState, SessionStore, UserRef};
pub use throttle::RedirectThrottle;
