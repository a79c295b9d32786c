//! Mapping of Binance error responses onto [`ExchangeError`].
//!
//! Binance errors carry both an HTTP status and a JSON body
//! `{"code": -1021, "msg": "..."}`. The code is more specific than the
//! status, so it is checked first; the status decides whatever the code
//! leaves open.
//!
//! | Condition                                    | Class                 |
//! |----------------------------------------------|-----------------------|
//! | HTTP 418 / 429, code -1003 / -1015           | `RateLimited`         |
//! | code -2015                                   | `Forbidden`           |
//! | code -1002 / -1021 / -1022 / -2014, HTTP 401 | `Unauthorized`        |
//! | HTTP 403                                     | `Forbidden`           |
//! | HTTP 5xx                                     | `UpstreamUnavailable` |
//! | any other 4xx                                | `InvalidRequest`      |

use mirror_core::error::ExchangeError;
use serde::Deserialize;

/// Timestamp outside `recvWindow`.
pub const CODE_TIMESTAMP_OUTSIDE_WINDOW: i64 = -1021;

/// Error body returned by Binance on failure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

impl ApiErrorBody {
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str(body).ok()
    }
}

/// Classify a non-success response.
///
/// `retry_after_secs` is the parsed `Retry-After` header, if any.
pub fn classify(status: u16, retry_after_secs: Option<u64>, body: &str) -> ExchangeError {
    let api = ApiErrorBody::parse(body);
    let message = match &api {
        Some(api) => format!("HTTP {status} code {}: {}", api.code, api.msg),
        None if body.trim().is_empty() => format!("HTTP {status}"),
        None => format!("HTTP {status}: {}", truncate(body, 200)),
    };
    let code = api.as_ref().map(|a| a.code);

    if matches!(status, 418 | 429) || matches!(code, Some(-1003 | -1015)) {
        return ExchangeError::RateLimited { message, retry_after_ms: retry_after_secs.map(|s| s * 1000) };
    }
    match code {
        Some(-2015) => return ExchangeError::Forbidden(message),
        Some(-1002 | CODE_TIMESTAMP_OUTSIDE_WINDOW | -1022 | -2014) => {
            return ExchangeError::Unauthorized(message);
        }
        _ => {}
    }
    match status {
        401 => ExchangeError::Unauthorized(message),
        403 => ExchangeError::Forbidden(message),
        s if s >= 500 => ExchangeError::UpstreamUnavailable(message),
        _ => ExchangeError::InvalidRequest(message),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
