//! Typed error definitions for exchange access.
//!
//! [`ExchangeError`] is the closed taxonomy every outbound call is classified
//! into. Variants carry plain strings so the error is `Clone` and can be
//! shared between all callers awaiting one coalesced request.

use thiserror::Error;

/// Classified failure of an exchange call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    /// The exchange throttled us or banned the IP (HTTP 418/429). Back off.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Exchange-provided message.
        message: String,
        /// `Retry-After` hint in milliseconds, when the exchange sent one.
        retry_after_ms: Option<u64>,
    },

    /// Bad signature, bad key, or rejected timestamp. Fatal for the session.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Valid credentials without permission for the action.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Malformed instrument, quantity, or price; also rejected orders.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Network failure, timeout, 5xx, or an undecodable response.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Credentials are absent; raised before any network I/O.
    #[error("not configured: {0}")]
    NotConfigured(String),
}

/// Discriminant of [`ExchangeError`], convenient for logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    RateLimited,
    Unauthorized,
    Forbidden,
    InvalidRequest,
    UpstreamUnavailable,
    NotConfigured,
}

impl ExchangeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            Self::NotConfigured(_) => ErrorKind::NotConfigured,
        }
    }

    /// Only transport-level failures are worth repeating, and only for reads.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_))
    }

    /// Errors that no amount of waiting will fix within this session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::NotConfigured(_))
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::UpstreamUnavailable(msg.into())
    }
}

/// Result alias used by exchange-facing code.
pub type ExchangeResult<T> = Result<T, ExchangeError>;
