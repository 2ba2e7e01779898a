//! CSRF double-submit token lifecycle.
//!
//! The server sets a readable `csrf_token` cookie; mutating requests echo
//! it back in a header and are rejected with a CSRF-marked 403 when the two
//! disagree. This module owns the whole lifecycle: lazy fetch, request
//! decoration, client-side invalidation, and the one-shot refresh-and-resend
//! recovery.

use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use uuid::Uuid;

use crate::client::ClientError;

pub const CSRF_COOKIE_NAME: &str = "csrf_token";
pub const CSRF_HEADER_NAME: &str = "x-csrf-token";
/// Benign endpoint whose only job is making the server set the cookie.
pub const CSRF_FETCH_PATH: &str = "/api/auth/csrf";

const REQUEST_ID_HEADER: &str = "x-request-id";

pub struct CsrfManager {
    http: reqwest::Client,
    cookies: Arc<Jar>,
    base_url: Url,
    timeout: std::time::Duration,
    // Serializes refreshes: exactly one token fetch in flight at a time.
    refresh_gate: tokio::sync::Mutex<()>,
}

impl CsrfManager {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        cookies: Arc<Jar>,
        base_url: Url,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            http,
            cookies,
            base_url,
            timeout,
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// The current cookie-sourced token, if the jar holds one.
    #[must_use]
    pub fn cookie_token(&self) -> Option<String> {
        let header = self.cookies.cookies(&self.base_url)?;
        let raw = header.to_str().ok()?;
        raw.split(';')
            .map(str::trim)
            .find_map(|pair| {
                pair.strip_prefix(CSRF_COOKIE_NAME)
                    .and_then(|rest| rest.strip_prefix('='))
            })
            .map(|value| value.to_string())
            .filter(|value| !value.is_empty())
    }

    /// Returns the cached token, fetching one through the benign GET when
    /// the cookie is absent. Issues at most one network call; resolves to
    /// `None` when the fetch fails or the server did not set the cookie.
    pub async fn ensure_token(&self) -> Option<String> {
        if let Some(token) = self.cookie_token() {
            return Some(token);
        }
        let _gate = self.refresh_gate.lock().await;
        // Another caller may have completed the fetch while we waited.
        if let Some(token) = self.cookie_token() {
            return Some(token);
        }
        if let Err(error) = self.fetch_cookie().await {
            tracing::warn!(error = %error, "csrf token fetch failed");
            return None;
        }
        let token = self.cookie_token();
        if token.is_none() {
            tracing::warn!("csrf fetch completed without setting the token cookie");
        }
        token
    }

    /// Discards the cookie client-side and fetches a fresh one. Used only
    /// after a CSRF rejection.
    pub async fn refresh(&self) -> Option<String> {
        let _gate = self.refresh_gate.lock().await;
        self.expire_cookie();
        if let Err(error) = self.fetch_cookie().await {
            tracing::warn!(error = %error, "csrf token refresh failed");
            return None;
        }
        self.cookie_token()
    }

    /// Attaches the anti-forgery header to mutating requests; a no-op for
    /// safe methods and when no token is available.
    pub fn decorate(&self, request: &mut reqwest::Request) {
        if !is_mutating(request.method()) {
            return;
        }
        let Some(token) = self.cookie_token() else {
            return;
        };
        match HeaderValue::from_str(&token) {
            Ok(value) => {
                request
                    .headers_mut()
                    .insert(HeaderName::from_static(CSRF_HEADER_NAME), value);
            }
            Err(error) => {
                tracing::warn!(error = %error, "csrf token not header-safe, skipping decoration");
            }
        }
    }

    /// Sends the decorated request; on a CSRF-marked 403 refreshes the token
    /// once and resends once. Never more than two sends per logical request.
    ///
    /// Non-403 responses are returned as-is for the caller to interpret. A
    /// 403 whose body is not CSRF-marked surfaces as [`ClientError::Http`].
    pub async fn send_with_retry(
        &self,
        mut request: reqwest::Request,
    ) -> Result<reqwest::Response, ClientError> {
        if is_mutating(request.method()) && self.cookie_token().is_none() {
            // Absence tolerated: the rejection path below recovers once.
            let _ = self.ensure_token().await;
        }
        let retry_request = request.try_clone();
        self.decorate(&mut request);

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|error| ClientError::Request {
                message: error.to_string(),
            })?;
        if response.status() != StatusCode::FORBIDDEN {
            return Ok(response);
        }

        let body = response.bytes().await.map_err(|error| ClientError::Read {
            message: error.to_string(),
        })?;
        if !is_csrf_rejection(&body) {
            return Err(crate::client::format_http_error(StatusCode::FORBIDDEN, &body));
        }

        let Some(mut retry) = retry_request else {
            // Streaming bodies cannot be replayed.
            tracing::warn!("csrf rejection on a non-replayable request");
            return Err(ClientError::CsrfRejected);
        };
        tracing::info!("csrf rejection, refreshing token and resending once");
        if self.refresh().await.is_none() {
            return Err(ClientError::CsrfRejected);
        }
        self.decorate(&mut retry);

        let response = self
            .http
            .execute(retry)
            .await
            .map_err(|error| ClientError::Request {
                message: error.to_string(),
            })?;
        if response.status() == StatusCode::FORBIDDEN {
            let body = response.bytes().await.map_err(|error| ClientError::Read {
                message: error.to_string(),
            })?;
            if is_csrf_rejection(&body) {
                tracing::warn!("csrf rejection repeated after refresh");
                return Err(ClientError::CsrfRejected);
            }
            return Err(crate::client::format_http_error(StatusCode::FORBIDDEN, &body));
        }
        Ok(response)
    }

    fn expire_cookie(&self) {
        self.cookies.add_cookie_str(
            &format!("{CSRF_COOKIE_NAME}=; Max-Age=0; Path=/"),
            &self.base_url,
        );
        tracing::debug!("csrf cookie cleared client-side");
    }

    async fn fetch_cookie(&self) -> Result<(), ClientError> {
        let mut url = self.base_url.clone();
        url.set_path(CSRF_FETCH_PATH);
        let response = self
            .http
            .get(url)
            .header(REQUEST_ID_HEADER, new_request_id())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| ClientError::Request {
                message: error.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(crate::client::format_http_error(status, &body));
        }
        Ok(())
    }
}

pub(crate) fn new_request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// A 403 counts as a CSRF rejection when its JSON body carries a
/// `code` starting with `csrf`, with a substring fallback for
/// non-JSON error pages.
fn is_csrf_rejection(body: &[u8]) -> bool {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        if let Some(code) = value.get("code").and_then(|code| code.as_str()) {
            return code.starts_with("csrf");
        }
    }
    String::from_utf8_lossy(body)
        .to_ascii_lowercase()
        .contains("csrf")
}
