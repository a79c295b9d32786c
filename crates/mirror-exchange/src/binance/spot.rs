//! Binance Spot REST client.
//!
//! One HTTP round trip per call, with signing, clock offset, and error
//! classification. Reads are wrapped in the retry policy; writes are sent
//! exactly once.
//!
//! # Endpoints
//!
//! | Operation          | Method | Path                   | Signed |
//! |--------------------|--------|------------------------|--------|
//! | Server time        | GET    | `/api/v3/time`         | no     |
//! | Exchange info      | GET    | `/api/v3/exchangeInfo` | no     |
//! | 24h ticker         | GET    | `/api/v3/ticker/24hr`  | no     |
//! | Klines             | GET    | `/api/v3/klines`       | no     |
//! | Account            | GET    | `/api/v3/account`      | yes    |
//! | Open orders        | GET    | `/api/v3/openOrders`   | yes    |
//! | All orders         | GET    | `/api/v3/allOrders`    | yes    |
//! | New order          | POST   | `/api/v3/order`        | yes    |
//! | Cancel order       | DELETE | `/api/v3/order`        | yes    |
//! | New OCO            | POST   | `/api/v3/order/oco`    | yes    |
//! | Cancel order list  | DELETE | `/api/v3/orderList`    | yes    |

use mirror_core::error::{ExchangeError, ExchangeResult};
use mirror_core::time_util::now_ms;
use reqwest::Method;
use reqwest::header::RETRY_AFTER;
use tracing::{debug, warn};

use super::auth;
use super::classify::{ApiErrorBody, CODE_TIMESTAMP_OUTSIDE_WINDOW, classify};
use super::clock::ServerClock;
use super::config::BinanceConfig;
use super::wire::{RawServerTime, decode};
use crate::retry::{RetryConfig, with_retry};

pub type Params = Vec<(&'static str, String)>;

/// Binance Spot REST client.
pub struct SpotClient {
    /// Shared HTTP client (carries the per-request timeout).
    http: reqwest::Client,
    /// API key (sent in `X-MBX-APIKEY` header).
    api_key: String,
    /// Secret key for HMAC-SHA256 signing.
    secret_key: String,
    /// REST base URL (e.g. `https://api.binance.com`).
    base_url: String,
    /// `recvWindow` for signed requests.
    recv_window: u64,
    clock: ServerClock,
    read_retry: RetryConfig,
}

impl SpotClient {
    /// Create a client. No connection is opened until the first call.
    pub fn new(config: &BinanceConfig) -> ExchangeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ExchangeError::upstream(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            base_url: config.rest_url.trim_end_matches('/').to_owned(),
            recv_window: config.recv_window,
            clock: ServerClock::new(config.time_sync_interval()),
            read_retry: config.read_retry(),
        })
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.secret_key.is_empty()
    }

    pub fn clock(&self) -> &ServerClock {
        &self.clock
    }

    // -----------------------------------------------------------------------
    // Public entry points
    // -----------------------------------------------------------------------

    /// Unsigned GET with retries.
    pub async fn public_get(&self, path: &str, params: Params) -> ExchangeResult<serde_json::Value> {
        with_retry(&self.read_retry, path, || self.send(Method::GET, path, &params, false)).await
    }

    /// Signed GET with retries.
    pub async fn signed_get(&self, path: &str, params: Params) -> ExchangeResult<serde_json::Value> {
        self.require_credentials()?;
        with_retry(&self.read_retry, path, || self.send(Method::GET, path, &params, true)).await
    }

    /// Signed state-changing call; never retried.
    pub async fn signed_write(&self, method: Method, path: &str, params: Params) -> ExchangeResult<serde_json::Value> {
        self.require_credentials()?;
        self.send(method, path, &params, true).await
    }

    /// Exchange clock in milliseconds, straight from `/api/v3/time`.
    pub async fn server_time_ms(&self) -> ExchangeResult<i64> {
        let body = self.public_get("/api/v3/time", Vec::new()).await?;
        Ok(decode::<RawServerTime>("server time", body)?.server_time)
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn require_credentials(&self) -> ExchangeResult<()> {
        if self.has_credentials() {
            Ok(())
        } else {
            Err(ExchangeError::NotConfigured("Binance API key and secret are not set".into()))
        }
    }

    /// Timestamp for a signed request, resyncing the offset when due.
    async fn timestamp_ms(&self) -> i64 {
        if self.clock.needs_sync() {
            let sent = now_ms();
            let url = format!("{}/api/v3/time", self.base_url);
            let sample = self
                .execute(Method::GET, "/api/v3/time", &url, false)
                .await
                .and_then(|body| decode::<RawServerTime>("server time", body));
            match sample {
                Ok(t) => {
                    self.clock.record(t.server_time, sent, now_ms());
                    debug!(offset_ms = self.clock.offset_ms(), "[binance] server clock synced");
                }
                Err(e) => {
                    warn!("[binance] clock sync failed, using local clock: {e}");
                    self.clock.defer();
                }
            }
        }
        self.clock.now_ms()
    }

    /// Build the URL (signing if needed) and make one attempt.
    async fn send(
        &self,
        method: Method,
        path: &str,
        params: &[(&'static str, String)],
        signed: bool,
    ) -> ExchangeResult<serde_json::Value> {
        let query = if signed {
            let mut signed_params = params.to_vec();
            signed_params.push(("recvWindow", self.recv_window.to_string()));
            signed_params.push(("timestamp", self.timestamp_ms().await.to_string()));
            auth::build_signed_query(&signed_params, &self.secret_key)
        } else {
            auth::encode_query(params)
        };

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        self.execute(method, path, &url, signed).await
    }

    /// One HTTP round trip with status classification.
    async fn execute(&self, method: Method, path: &str, url: &str, signed: bool) -> ExchangeResult<serde_json::Value> {
        let mut request = self.http.request(method.clone(), url);
        if signed {
            request = request.header("X-MBX-APIKEY", &self.api_key);
        }

        let resp = request.send().await.map_err(|e| transport_error(&method, path, &e))?;
        let status = resp.status();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = resp.text().await.map_err(|e| transport_error(&method, path, &e))?;

        if !status.is_success() {
            if ApiErrorBody::parse(&body).is_some_and(|api| api.code == CODE_TIMESTAMP_OUTSIDE_WINDOW) {
                warn!("[binance] timestamp rejected, server clock will be resynced");
                self.clock.invalidate();
            }
            let err = classify(status.as_u16(), retry_after, &body);
            debug!(%method, path, status = status.as_u16(), "[binance] request failed: {err}");
            return Err(err);
        }

        serde_json::from_str(&body)
            .map_err(|e| ExchangeError::upstream(format!("{method} {path}: undecodable response body: {e}")))
    }
}

fn transport_error(method: &Method, path: &str, e: &reqwest::Error) -> ExchangeError {
    let what = if e.is_timeout() {
        "timed out"
    } else if e.is_connect() {
        "connection failed"
    } else {
        "transport error"
    };
    ExchangeError::upstream(format!("{method} {path}: {what}: {e}"))
}
