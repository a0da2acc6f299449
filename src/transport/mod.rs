//! # Transport Layer
//!
//! Stream listeners that carry framed protocol messages to a [`ModelServer`].
//!
//! ## Transports
//! - **TCP**: remote attack clients ([`tcp`])
//! - **Local**: Unix domain sockets for same-host clients ([`local`])
//!
//! Every connection runs the same loop: read one packet, then decode and
//! dispatch it on a blocking worker (inference may be slow), write the reply.
//! A payload that is not a valid message is answered with a
//! `MalformedDocument` error and the connection stays open; a broken frame
//! header closes it, since the stream can no longer be resynchronized.
//!
//! [`ModelServer`]: crate::server::ModelServer

#[cfg(unix)]
pub mod local;
pub mod tcp;

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Semaphore;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::core::codec::PacketCodec;
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::message::Message;
use crate::utils::metrics::global_metrics;

/// Answer requests on one connection until the peer hangs up or goes idle.
pub(crate) async fn serve_connection<S>(
    stream: S,
    dispatcher: Arc<Dispatcher>,
    idle_timeout: Duration,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let metrics = global_metrics();
    let mut framed = Framed::new(stream, PacketCodec);

    loop {
        let packet = match tokio::time::timeout(idle_timeout, framed.next()).await {
            Err(_) => {
                debug!(timeout_ms = idle_timeout.as_millis() as u64, "Connection idle, closing");
                return Err(ProtocolError::Timeout);
            }
            Ok(None) => return Ok(()),
            Ok(Some(Err(e))) => {
                metrics.protocol_error();
                warn!(error = %e, "Unreadable frame, closing connection");
                return Err(e);
            }
            Ok(Some(Ok(packet))) => packet,
        };
        metrics.message_received(packet.payload.len() as u64);

        let dispatcher = Arc::clone(&dispatcher);
        let request = packet.payload;
        let reply = match tokio::task::spawn_blocking(move || answer(&dispatcher, &request)).await {
            Ok(reply) => reply,
            Err(join_error) => {
                warn!(error = %join_error, "Request handler panicked");
                Message::from_error(&ProtocolError::Custom(join_error.to_string()))
            }
        };

        let payload = reply.encode()?;
        metrics.message_sent(payload.len() as u64);
        framed.send(Packet::new(payload)).await?;
    }
}

/// Decode one request payload and dispatch it. Runs on a blocking worker.
fn answer(dispatcher: &Dispatcher, payload: &[u8]) -> Message {
    let metrics = global_metrics();
    let request = match Message::decode(payload) {
        Ok(request) => request,
        Err(e) => {
            metrics.protocol_error();
            debug!(error = %e, "Rejected malformed request");
            return Message::from_error(&e);
        }
    };

    match dispatcher.dispatch(&request) {
        Ok(reply) => reply,
        Err(e) => {
            if matches!(e, ProtocolError::UnexpectedMessage) {
                metrics.protocol_error();
            }
            Message::from_error(&e)
        }
    }
}

/// Wait until every connection permit is back or `timeout` elapses.
pub(crate) async fn drain_connections(limiter: &Semaphore, capacity: usize, timeout: Duration) {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        let active = capacity.saturating_sub(limiter.available_permits());
        if active == 0 {
            info!("All connections closed, shutting down");
            return;
        }
        tokio::select! {
            _ = &mut deadline => {
                warn!(connections = active, "Shutdown timeout reached, forcing exit");
                return;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {
                debug!(connections = active, "Waiting for connections to close");
            }
        }
    }
}
