//! Timeout constants and helpers shared by the server and the client.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default timeout for establishing connections
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a server keeps an idle connection open
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// How long a client waits for the reply to one request
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a server waits for open connections during shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `fut`, failing with [`ProtocolError::Timeout`] once `duration` elapses.
pub async fn with_timeout<F, T>(duration: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}
