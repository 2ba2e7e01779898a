#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]
//! HTTP client for the wrenmail service.
//!
//! Owns the transport half of the authentication resilience layer: the
//! cookie-jar session, the CSRF double-submit token lifecycle
//! ([`csrf::CsrfManager`]), and the authentication probe that feeds
//! `wrenmail_client_core::SessionStore` through its `AuthTransport` seam.
//! The resilience decisions themselves (circuit breaker, navigation guard,
//! route gate) live in `wrenmail-client-core`; this crate only moves bytes.

pub mod client;
pub mod config;
pub mod csrf;

pub use client::{
    AUTH_LOGIN_PATH, AUTH_LOGOUT_PATH, AUTH_USER_PATH, ClientError, LoginRequest, WrenmailClient,
};
pub use config::{ClientConfig, ConfigError, DEFAULT_BASE_URL, ENV_BASE_URL, normalize_base_url};
pub use csrf::{CSRF_COOKIE_NAME, CSRF_FETCH_PATH, CSRF_HEADER_NAME, CsrfManager};
