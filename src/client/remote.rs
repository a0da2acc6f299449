use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

use crate::client::Model;
use crate::config::ClientConfig;
use crate::core::codec::PacketCodec;
use crate::core::packet::Packet;
use crate::core::tensor::Tensor;
use crate::error::constants::ERR_NO_SESSION;
use crate::error::{ProtocolError, Result};
use crate::protocol::message::{Message, Probe, Response, SessionId, Want};
use crate::transport;
use crate::utils::timeout::with_timeout;

/// A model served by a remote [`ModelServer`], reached over the wire protocol.
///
/// One connection carries one session at a time. Every probe is tagged with a
/// fresh `probe_id`, so a probe the server answers twice is charged once.
///
/// [`ModelServer`]: crate::server::ModelServer
pub struct BsonModel<S = TcpStream> {
    framed: Framed<S, PacketCodec>,
    config: ClientConfig,
    session: Option<(SessionId, u64)>,
    probes_sent: u64,
    /// Set while a request is outstanding. A request that never read its
    /// reply leaves it set and the connection refuses further requests.
    desynced: bool,
}

impl BsonModel<TcpStream> {
    /// Connect to `config.address`.
    #[instrument(skip(config), fields(address = %config.address))]
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let framed = transport::tcp::connect(config.address.as_str(), config.connection_timeout).await?;
        info!("Connected to model server");
        Ok(Self::from_framed(framed, config.clone()))
    }
}

#[cfg(unix)]
impl BsonModel<tokio::net::UnixStream> {
    /// Connect to a model server on a local Unix socket.
    pub async fn connect_local<P: AsRef<std::path::Path>>(
        path: P,
        config: &ClientConfig,
    ) -> Result<Self> {
        let framed = with_timeout(config.connection_timeout, transport::local::connect(path)).await?;
        Ok(Self::from_framed(framed, config.clone()))
    }
}

impl<S> BsonModel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an established stream.
    pub fn from_stream(stream: S, config: ClientConfig) -> Self {
        Self::from_framed(Framed::new(stream, PacketCodec), config)
    }

    fn from_framed(framed: Framed<S, PacketCodec>, config: ClientConfig) -> Self {
        Self {
            framed,
            config,
            session: None,
            probes_sent: 0,
            desynced: false,
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref().map(|(id, _)| id)
    }

    /// Budget granted to the current session.
    pub fn budget(&self) -> Option<u64> {
        self.session.as_ref().map(|(_, budget)| *budget)
    }

    /// False once a request timed out or failed midway. Replies are matched
    /// to requests by order, so such a connection cannot be reused.
    pub fn is_usable(&self) -> bool {
        !self.desynced
    }

    /// Send one request and wait for its reply.
    ///
    /// Error replies are returned as `Err` with the server's error kind.
    /// After a timeout or a transport failure every later request fails with
    /// [`ProtocolError::ConnectionClosed`]; reconnect to continue.
    pub async fn request(&mut self, msg: &Message) -> Result<Message> {
        if self.desynced {
            return Err(ProtocolError::ConnectionClosed);
        }
        let payload = msg.encode()?;

        self.desynced = true;
        self.framed.send(Packet::new(payload)).await?;

        let packet = with_timeout(self.config.response_timeout, async {
            match self.framed.next().await {
                Some(packet) => packet,
                None => Err(ProtocolError::ConnectionClosed),
            }
        })
        .await
        .inspect_err(|e| warn!(error = %e, "No reply, connection unusable"))?;
        self.desynced = false;

        match Message::decode(&packet.payload)? {
            Message::Error(reply) => {
                debug!(kind = %reply.kind, message = %reply.message, "Server returned error");
                Err(reply.into_error())
            }
            reply => Ok(reply),
        }
    }

    /// Open a session on this connection, replacing any previous one.
    pub async fn open_session(&mut self, budget: u64) -> Result<SessionId> {
        match self.request(&Message::OpenSession { budget }).await? {
            Message::SessionOpened { session_id, budget } => {
                info!(session = %session_id, budget, "Session opened");
                self.session = Some((session_id.clone(), budget));
                self.probes_sent = 0;
                Ok(session_id)
            }
            _ => Err(ProtocolError::UnexpectedMessage),
        }
    }

    /// Send a prepared probe on the current session.
    pub async fn send_probe(&mut self, probe: Probe) -> Result<Response> {
        let session_id = self
            .session_id()
            .cloned()
            .ok_or_else(|| ProtocolError::SessionNotFound(ERR_NO_SESSION.to_string()))?;

        match self.request(&Message::Probe { session_id, probe }).await? {
            Message::Response(response) => Ok(response),
            _ => Err(ProtocolError::UnexpectedMessage),
        }
    }

    /// Close the current session. A no-op without one.
    pub async fn close(&mut self) -> Result<()> {
        let Some((session_id, _)) = self.session.take() else {
            return Ok(());
        };
        match self.request(&Message::CloseSession { session_id }).await? {
            Message::SessionClosed { session_id } => {
                info!(session = %session_id, "Session closed");
                Ok(())
            }
            _ => Err(ProtocolError::UnexpectedMessage),
        }
    }
}

impl<S> Model for BsonModel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn predict(&mut self, input: &Tensor, want: Want) -> Result<Response> {
        let probe_id = match self.session_id() {
            Some(id) => format!("{id}-{}", self.probes_sent),
            None => return Err(ProtocolError::SessionNotFound(ERR_NO_SESSION.to_string())),
        };
        self.probes_sent += 1;
        self.send_probe(Probe::new(input.clone(), want).with_probe_id(probe_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;

    fn response(label: i64) -> Message {
        Message::Response(Response {
            label,
            probs: None,
            gradient: None,
            queries_remaining: 10,
        })
    }

    async fn reply(server: &mut Framed<tokio::io::DuplexStream, PacketCodec>, msg: Message) {
        let payload = msg.encode().expect("encode");
        server.send(Packet::new(payload)).await.expect("send");
    }

    #[tokio::test]
    async fn test_late_reply_is_not_paired_with_next_request() {
        let (client_io, server_io) = duplex(64 * 1024);
        let config = ClientConfig {
            response_timeout: Duration::from_millis(50),
            ..ClientConfig::default()
        };
        let mut model = BsonModel::from_stream(client_io, config);

        let server = tokio::spawn(async move {
            let mut framed = Framed::new(server_io, PacketCodec);
            framed.next().await.expect("open").expect("frame");
            reply(
                &mut framed,
                Message::SessionOpened {
                    session_id: SessionId::from("s"),
                    budget: 10,
                },
            )
            .await;

            // First predict is answered after the client gave up on it
            framed.next().await.expect("first").expect("frame");
            tokio::time::sleep(Duration::from_millis(200)).await;
            reply(&mut framed, response(111)).await;

            // Anything still arriving gets a distinct label
            while let Some(Ok(_)) = framed.next().await {
                reply(&mut framed, response(222)).await;
            }
        });

        model.open_session(10).await.expect("open");
        assert!(model.is_usable());
        let input = Tensor::from_vec(vec![0.5, 0.5]);

        let first = model.predict(&input, Want::Label).await;
        assert!(matches!(first, Err(ProtocolError::Timeout)), "got {first:?}");
        assert!(!model.is_usable());

        tokio::time::sleep(Duration::from_millis(250)).await;
        let second = model.predict(&input, Want::Label).await;
        assert!(
            matches!(second, Err(ProtocolError::ConnectionClosed)),
            "stale reply reused: {second:?}"
        );
        assert!(model.close().await.is_err());

        drop(model);
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn test_error_reply_keeps_connection_usable() {
        let (client_io, server_io) = duplex(64 * 1024);
        let mut model = BsonModel::from_stream(client_io, ClientConfig::default());

        tokio::spawn(async move {
            let mut framed = Framed::new(server_io, PacketCodec);
            framed.next().await.expect("open").expect("frame");
            let err = ProtocolError::InvalidBudget(0);
            reply(&mut framed, Message::from_error(&err)).await;
            framed.next().await.expect("open").expect("frame");
            reply(
                &mut framed,
                Message::SessionOpened {
                    session_id: SessionId::from("s"),
                    budget: 1,
                },
            )
            .await;
        });

        assert!(model.open_session(1).await.is_err());
        assert!(model.is_usable());
        assert_eq!(model.open_session(1).await.expect("open"), SessionId::from("s"));
    }
}
