use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::cookie::Jar;
use serde::{Deserialize, Serialize};

use wrenmail_client_core::session::{AuthTransport, ProbeOutcome, UserRef};

use crate::config::ClientConfig;
use crate::csrf::{CsrfManager, new_request_id};

/// Authentication probe; safe method, carries no CSRF header. 200 with a
/// user payload means authenticated, 401 means not.
pub const AUTH_USER_PATH: &str = "/api/auth/user";
pub const AUTH_LOGIN_PATH: &str = "/api/auth/login";
pub const AUTH_LOGOUT_PATH: &str = "/api/auth/logout";

const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("client_invalid_base_url")]
    InvalidBaseUrl,
    #[error("client_invalid_path")]
    InvalidPath,
    #[error("client_request_failed:{message}")]
    Request { message: String },
    #[error("client_read_failed:{message}")]
    Read { message: String },
    #[error("client_http_{status}:{body}")]
    Http { status: StatusCode, body: String },
    #[error("client_json_decode_failed:{message}")]
    Decode { message: String },
    /// A mutating request was rejected for its CSRF token even after the
    /// one-shot refresh-and-resend recovery.
    #[error("client_csrf_rejected")]
    CsrfRejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
struct AuthUserResponse {
    user: UserRef,
}

/// The wrenmail HTTP client. Owns the cookie jar (session and CSRF
/// cookies) and the CSRF manager; implements the probe transport consumed
/// by `wrenmail_client_core::SessionStore`.
pub struct WrenmailClient {
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
    csrf: CsrfManager,
}

impl WrenmailClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let cookies = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&cookies))
            .build()
            .map_err(|error| ClientError::Request {
                message: error.to_string(),
            })?;
        let base = reqwest::Url::parse(&config.base_url)
            .map_err(|_| ClientError::InvalidBaseUrl)?;
        let timeout = Duration::from_millis(config.timeout_ms.max(250));
        let csrf = CsrfManager::new(http.clone(), cookies, base, timeout);
        Ok(Self {
            base_url: config.base_url,
            timeout,
            http,
            csrf,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn csrf(&self) -> &CsrfManager {
        &self.csrf
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    /// Signs in and returns the authenticated user. CSRF-decorated and
    /// covered by the one-shot refresh-and-resend recovery.
    pub async fn login(&self, request: &LoginRequest) -> Result<UserRef, ClientError> {
        let response = self.post_with_csrf(AUTH_LOGIN_PATH, request).await?;
        decode_json_response::<AuthUserResponse>(response)
            .await
            .map(|payload| payload.user)
    }

    /// Ends the server-side session. The caller is responsible for
    /// invalidating its `SessionStore` afterwards. A 401 counts as success:
    /// the session was already gone.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let response = self
            .post_with_csrf(AUTH_LOGOUT_PATH, &serde_json::json!({}))
            .await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::UNAUTHORIZED {
            return Ok(());
        }
        let body = response.bytes().await.map_err(|error| ClientError::Read {
            message: error.to_string(),
        })?;
        Err(format_http_error(status, &body))
    }

    /// Sends a CSRF-decorated JSON request to an arbitrary service path and
    /// decodes the JSON response. The transport used by the domain layers
    /// (mail, settings) for their mutating calls.
    pub async fn post_json<Req, Res>(&self, path: &str, payload: &Req) -> Result<Res, ClientError>
    where
        Req: Serialize + ?Sized,
        Res: for<'de> serde::Deserialize<'de>,
    {
        let response = self.post_with_csrf(path, payload).await?;
        decode_json_response(response).await
    }

    pub async fn get_json<T>(&self, path: &str) -> Result<T, ClientError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let url = self.endpoint(path).ok_or(ClientError::InvalidPath)?;
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
        decode_json_response(response).await
    }

    async fn post_with_csrf<Req>(
        &self,
        path: &str,
        payload: &Req,
    ) -> Result<reqwest::Response, ClientError>
    where
        Req: Serialize + ?Sized,
    {
        let url = self.endpoint(path).ok_or(ClientError::InvalidPath)?;
        let request = self
            .http
            .post(url)
            .header(REQUEST_ID_HEADER, new_request_id())
            .timeout(self.timeout)
            .json(payload)
            .build()
            .map_err(|error| ClientError::Request {
                message: error.to_string(),
            })?;
        self.csrf.send_with_retry(request).await
    }

    async fn fetch_user(&self) -> ProbeOutcome {
        let Some(url) = self.endpoint(AUTH_USER_PATH) else {
            return ProbeOutcome::TransportFailure("invalid probe path".to_string());
        };
        let response = match self
            .http
            .get(url)
            .header(REQUEST_ID_HEADER, new_request_id())
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(error) => return ProbeOutcome::TransportFailure(error.to_string()),
        };
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return ProbeOutcome::Unauthorized;
        }
        if !status.is_success() {
            return ProbeOutcome::TransportFailure(format!("probe_http_{status}"));
        }
        match response.json::<AuthUserResponse>().await {
            Ok(payload) => ProbeOutcome::Authenticated(payload.user),
            // 2xx without a valid user payload is a transport fault, not an
            // authenticated session.
            Err(error) => ProbeOutcome::TransportFailure(error.to_string()),
        }
    }
}

#[async_trait]
impl AuthTransport for WrenmailClient {
    async fn probe_auth(&self) -> ProbeOutcome {
        self.fetch_user().await
    }
}

pub(crate) fn format_http_error(status: StatusCode, body: &[u8]) -> ClientError {
    let body = non_empty_string(String::from_utf8_lossy(body).to_string())
        .unwrap_or_else(|| "<empty>".to_string());
    ClientError::Http { status, body }
}

async fn decode_json_response<T>(response: reqwest::Response) -> Result<T, ClientError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let status = response.status();
    let bytes = response.bytes().await.map_err(|error| ClientError::Read {
        message: error.to_string(),
    })?;

    if !status.is_success() {
        return Err(format_http_error(status, &bytes));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| ClientError::Decode {
        message: error.to_string(),
    })
}

fn non_empty_string(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
