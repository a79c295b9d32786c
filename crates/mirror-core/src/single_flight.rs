//! Single-flight request coalescing.
//!
//! When several tasks ask for the same resource at once (five dashboard
//! refreshes hitting `account:balance` in the same instant), only the first
//! one starts the outbound call. Everyone else awaits the same shared future
//! and receives a clone of its result or error.
//!
//! ```text
//! caller A ──┐
//! caller B ──┼──► pending["account:balance"] ──► producer() ──► exchange
//! caller C ──┘            (one Shared future)
//! ```
//!
//! The registration is removed by the flight itself as soon as the producer
//! settles, before any caller observes the result, so the next request after
//! settlement always starts a fresh call. [`SingleFlight::forget_matching`]
//! detaches registrations early (after a write made them stale); the
//! detached flight still completes for the callers already waiting on it.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ahash::AHashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ExchangeError, ExchangeResult};

type Flight<V> = Shared<BoxFuture<'static, ExchangeResult<V>>>;

/// Counters describing coalescing activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SingleFlightStats {
    /// Keys with a call currently outstanding.
    pub in_flight: usize,
    /// Producer invocations.
    pub started: u64,
    /// Callers that joined an existing flight instead of starting one.
    pub coalesced: u64,
}

/// At most one outstanding producer per key.
pub struct SingleFlight<V> {
    /// Key → (flight id, flight). The id keeps a detached flight from
    /// deregistering its replacement.
    pending: Arc<Mutex<AHashMap<String, (u64, Flight<V>)>>>,
    timeout: Option<Duration>,
    started: AtomicU64,
    coalesced: AtomicU64,
}

impl<V> SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(AHashMap::new())),
            timeout: None,
            started: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        }
    }

    /// Bound every flight by `timeout`. A flight that overruns settles with
    /// [`ExchangeError::UpstreamUnavailable`], releasing all of its waiters.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run `producer` unless a call for `key` is already in flight, in which
    /// case await that call instead.
    ///
    /// `producer` is only invoked when this caller starts the flight.
    pub async fn fetch_once<F, Fut>(&self, key: &str, producer: F) -> ExchangeResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ExchangeResult<V>> + Send + 'static,
    {
        let flight = {
            let mut pending = self.pending.lock();
            match pending.get(key) {
                Some((_, flight)) => {
                    self.coalesced.fetch_add(1, Ordering::Relaxed);
                    debug!(key, "[single-flight] joining in-flight request");
                    flight.clone()
                }
                None => {
                    let id = self.started.fetch_add(1, Ordering::Relaxed);
                    let flight = self.launch(key, id, producer());
                    pending.insert(key.to_owned(), (id, flight.clone()));
                    flight
                }
            }
        };

        flight.await
    }

    /// Detach every in-flight call whose key contains `pattern`, so later
    /// callers start a fresh one. Returns how many were detached.
    pub fn forget_matching(&self, pattern: &str) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|key, _| !key.contains(pattern));
        before - pending.len()
    }

    pub fn stats(&self) -> SingleFlightStats {
        SingleFlightStats {
            in_flight: self.pending.lock().len(),
            started: self.started.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }

    /// Wrap the producer's future so that it deregisters itself on settlement.
    fn launch<Fut>(&self, key: &str, id: u64, fut: Fut) -> Flight<V>
    where
        Fut: Future<Output = ExchangeResult<V>> + Send + 'static,
    {
        let registry = Arc::clone(&self.pending);
        let owned_key = key.to_owned();
        let timeout = self.timeout;

        async move {
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            key = %owned_key,
                            timeout_ms = limit.as_millis() as u64,
                            "[single-flight] producer timed out"
                        );
                        Err(ExchangeError::upstream(format!(
                            "request `{owned_key}` timed out after {}ms",
                            limit.as_millis()
                        )))
                    }
                },
                None => fut.await,
            };
            let mut pending = registry.lock();
            if pending.get(&owned_key).is_some_and(|(current, _)| *current == id) {
                pending.remove(&owned_key);
            }
            drop(pending);
            result
        }
        .boxed()
        .shared()
    }
}

impl<V> Default for SingleFlight<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
