//! Unix domain socket transport for attack clients on the same host.

use std::path::Path;
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, instrument, warn};

use crate::core::codec::PacketCodec;
use crate::error::Result;
use crate::server::ModelServer;
use crate::transport::{drain_connections, serve_connection};
use crate::utils::metrics::global_metrics;

/// Serve on a Unix socket at `path` until Ctrl+C.
#[instrument(skip(path, server), fields(socket_path = %path.as_ref().display()))]
pub async fn start_server<P: AsRef<Path>>(path: P, server: Arc<ModelServer>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    start_server_with_shutdown(path, server, shutdown_rx).await
}

/// Serve on a Unix socket with an external shutdown channel.
///
/// A stale socket file at `path` is replaced; the file is removed again on
/// shutdown.
#[instrument(skip(path, server, shutdown_rx), fields(socket_path = %path.as_ref().display()))]
pub async fn start_server_with_shutdown<P: AsRef<Path>>(
    path: P,
    server: Arc<ModelServer>,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let path = path.as_ref().to_path_buf();
    if path.exists() {
        tokio::fs::remove_file(&path).await.ok();
    }

    let config = server.config().clone();
    let dispatcher = Arc::new(server.dispatcher()?);
    let limiter = Arc::new(Semaphore::new(config.max_connections));
    let metrics = global_metrics();

    let listener = UnixListener::bind(&path)?;
    info!(path = %path.display(), "Listening on unix socket");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down server. Waiting for connections to close...");
                drain_connections(&limiter, config.max_connections, config.shutdown_timeout).await;

                if let Err(e) = tokio::fs::remove_file(&path).await {
                    error!(error = %e, path = %path.display(), "Failed to remove socket file");
                } else {
                    info!(path = %path.display(), "Removed socket file");
                }
                return Ok(());
            }

            accept_result = listener.accept() => {
                let stream = match accept_result {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                        continue;
                    }
                };

                let Ok(permit) = Arc::clone(&limiter).try_acquire_owned() else {
                    warn!(limit = config.max_connections, "Connection limit reached, refusing");
                    continue;
                };

                metrics.connection_established();
                let dispatcher = Arc::clone(&dispatcher);
                let idle = config.connection_timeout;

                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, dispatcher, idle).await {
                        debug!(error = %e, "Local connection ended with error");
                    }
                    metrics.connection_closed();
                    drop(permit);
                });
            }
        }
    }
}

/// Connect to a local model server socket.
#[instrument(skip(path), fields(socket_path = %path.as_ref().display()))]
pub async fn connect<P: AsRef<Path>>(path: P) -> Result<Framed<UnixStream, PacketCodec>> {
    let stream = UnixStream::connect(path).await?;
    Ok(Framed::new(stream, PacketCodec))
}
