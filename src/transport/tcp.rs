use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, instrument, warn};

use crate::core::codec::PacketCodec;
use crate::error::{ProtocolError, Result};
use crate::server::ModelServer;
use crate::transport::{drain_connections, serve_connection};
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::with_timeout;

/// Serve on `server.config().address` until Ctrl+C.
#[instrument(skip(server), fields(address = %server.config().address))]
pub async fn start_server(server: Arc<ModelServer>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    start_server_with_shutdown(server, shutdown_rx).await
}

/// Bind the configured address and serve until `shutdown_rx` fires.
pub async fn start_server_with_shutdown(
    server: Arc<ModelServer>,
    shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(&server.config().address).await?;
    serve(listener, server, shutdown_rx).await
}

/// Accept connections on an already bound listener.
///
/// On shutdown the listener stops accepting and open connections get up to
/// `shutdown_timeout` to finish.
pub async fn serve(
    listener: TcpListener,
    server: Arc<ModelServer>,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let config = server.config().clone();
    let dispatcher = Arc::new(server.dispatcher()?);
    let limiter = Arc::new(Semaphore::new(config.max_connections));
    let metrics = global_metrics();

    info!(address = %listener.local_addr()?, "Model server listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down server. Waiting for connections to close...");
                drain_connections(&limiter, config.max_connections, config.shutdown_timeout).await;
                metrics.log_metrics();
                return Ok(());
            }

            accept_result = listener.accept() => {
                let (stream, peer) = match accept_result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                        continue;
                    }
                };

                let Ok(permit) = Arc::clone(&limiter).try_acquire_owned() else {
                    warn!(peer = %peer, limit = config.max_connections, "Connection limit reached, refusing");
                    continue;
                };

                metrics.connection_established();
                debug!(peer = %peer, "New connection established");
                let dispatcher = Arc::clone(&dispatcher);
                let idle = config.connection_timeout;

                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, dispatcher, idle).await {
                        debug!(peer = %peer, error = %e, "Connection ended with error");
                    }
                    metrics.connection_closed();
                    debug!(peer = %peer, "Connection closed");
                    drop(permit);
                });
            }
        }
    }
}

/// Open a framed client connection, failing with `Timeout` after `timeout`.
pub async fn connect<A: ToSocketAddrs>(
    addr: A,
    timeout: Duration,
) -> Result<Framed<TcpStream, PacketCodec>> {
    let stream = with_timeout(timeout, async move {
        TcpStream::connect(addr).await.map_err(ProtocolError::Io)
    })
    .await?;
    stream.set_nodelay(true)?;
    Ok(Framed::new(stream, PacketCodec))
}
