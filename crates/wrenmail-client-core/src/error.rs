use serde::{Deserialize, Serialize};

/// Failure taxonomy of the authentication layer.
///
/// `Unauthorized` is the expected signed-out outcome, never a fault.
/// `CircuitOpen` means no probe was sent at all; the gate treats it as a
/// blocking-loader state and must not read it as "redirect to login".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    #[error("not authenticated")]
    Unauthorized,
    #[error("request rejected for missing or stale csrf token")]
    CsrfRejected,
    #[error("authentication circuit open")]
    CircuitOpen,
    #[error("authentication probe failed in transport")]
    NetworkError,
}

impl AuthErrorKind {
    /// Stable identifier used as a logging and persistence key.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::CsrfRejected => "csrf_rejected",
            Self::CircuitOpen => "circuit_open",
            Self::NetworkError => "network_error",
        }
    }

    /// `true` for kinds that must hold the gate in its loader state instead
    /// of letting it redirect to login.
    #[must_use]
    pub fn defers_redirect(&self) -> bool {
        matches!(self, Self::CircuitOpen)
    }
}
