//! Server-time offset tracking for signed requests.
//!
//! Binance rejects signed requests whose `timestamp` falls outside
//! `recvWindow` of its own clock (code -1021). The adapter measures the
//! offset against `/api/v3/time` once per interval and after every such
//! rejection. If the measurement fails, the local clock is used as-is until
//! the next interval.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use mirror_core::time_util::now_ms;

/// Sentinel for "never synced / invalidated".
const UNSYNCED: i64 = i64::MIN;

pub struct ServerClock {
    offset_ms: AtomicI64,
    /// Local time of the last sync attempt, or [`UNSYNCED`].
    checked_at_ms: AtomicI64,
    resync_interval_ms: i64,
}

impl ServerClock {
    pub fn new(resync_interval: Duration) -> Self {
        Self {
            offset_ms: AtomicI64::new(0),
            checked_at_ms: AtomicI64::new(UNSYNCED),
            resync_interval_ms: resync_interval.as_millis() as i64,
        }
    }

    pub fn needs_sync(&self) -> bool {
        let checked = self.checked_at_ms.load(Ordering::Acquire);
        checked == UNSYNCED || now_ms() - checked >= self.resync_interval_ms
    }

    /// Record a server-time sample. `sent_at` and `received_at` bracket the
    /// request; the server stamp is taken to be at their midpoint.
    pub fn record(&self, server_ms: i64, sent_at: i64, received_at: i64) {
        let midpoint = sent_at + (received_at - sent_at) / 2;
        self.offset_ms.store(server_ms - midpoint, Ordering::Release);
        self.checked_at_ms.store(received_at, Ordering::Release);
    }

    /// Keep the current offset until the next interval (sync attempt failed).
    pub fn defer(&self) {
        self.checked_at_ms.store(now_ms(), Ordering::Release);
    }

    /// Force a resync before the next signed request.
    pub fn invalidate(&self) {
        self.checked_at_ms.store(UNSYNCED, Ordering::Release);
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Acquire)
    }

    /// Current time on the exchange's clock, best estimate.
    pub fn now_ms(&self) -> i64 {
        now_ms() + self.offset_ms()
    }
}
