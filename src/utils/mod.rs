//! # Utility Modules
//!
//! Supporting utilities for logging, metrics, timeouts and duplicate-probe tracking.
//!
//! ## Components
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Replay Cache**: Bounded probe-id cache for exactly-once accounting
//! - **Timeout**: Async timeout wrappers and default durations

pub mod logging;
pub mod metrics;
pub mod replay_cache;
pub mod timeout;

pub use replay_cache::ReplayCache;
