//! # mirror-core
//!
//! Core crate for the exchange order mirror, providing:
//!
//! - **Types** (`types`): enums, mirrored orders, closed trades, exchange payloads
//! - **Configuration** (`config`): JSON config deserialization
//! - **Error types** (`error`): the closed exchange error taxonomy via thiserror
//! - **Cache store** (`cache`): TTL key/value store with pattern invalidation
//! - **Single-flight** (`single_flight`): coalesces concurrent identical fetches
//! - **Time utilities** (`time_util`): millisecond timestamps and duration labels
//! - **Logging** (`logging`): tracing-based structured logging

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod single_flight;
pub mod time_util;
pub mod types;

// Re-export types at crate root for convenience.
pub use types::*;
