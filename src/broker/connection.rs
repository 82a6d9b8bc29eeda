//! Per-connection packet processing and the CONNECT/Active state machine.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::broker::router::Router;
use crate::broker::writer::SessionWriter;
use crate::broker::BrokerConfig;
use crate::buffer_pool;
use crate::codec::Decoder;
use crate::protocol::{
    ConnAck, ConnectReturnCode, DecodeError, Packet, SubAck, Unsubscribe, UnsubAck,
};
use crate::session::{Session, SessionState};
use crate::topic::{validate_topic_filter, validate_topic_name, SubscriptionRegistry};

/// Connection error types.
#[derive(Debug)]
pub enum ConnectionError {
    Io(std::io::Error),
    Decode(DecodeError),
    /// Peer violated the 3-state dispatch rules (e.g. a second CONNECT).
    ProtocolViolation(&'static str),
    /// Graceful shutdown: DISCONNECT received, or the broker is stopping.
    Shutdown,
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Io(e) => write!(f, "IO error: {}", e),
            ConnectionError::Decode(e) => write!(f, "decode error: {}", e),
            ConnectionError::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            ConnectionError::Shutdown => write!(f, "shutdown"),
        }
    }
}

impl std::error::Error for ConnectionError {}

impl From<std::io::Error> for ConnectionError {
    fn from(e: std::io::Error) -> Self {
        ConnectionError::Io(e)
    }
}

impl From<DecodeError> for ConnectionError {
    fn from(e: DecodeError) -> Self {
        ConnectionError::Decode(e)
    }
}

/// One TCP connection's worker state.
pub struct Connection {
    stream: TcpStream,
    addr: SocketAddr,
    decoder: Decoder,
    read_buf: BytesMut,
    session: Session,
    writer: Option<Arc<SessionWriter>>,
    config: BrokerConfig,
    registry: Arc<SubscriptionRegistry>,
    clients: Arc<DashMap<Arc<str>, Arc<SessionWriter>>>,
    router: Arc<Router>,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        config: BrokerConfig,
        registry: Arc<SubscriptionRegistry>,
        clients: Arc<DashMap<Arc<str>, Arc<SessionWriter>>>,
        router: Arc<Router>,
    ) -> Self {
        Self {
            stream,
            addr,
            decoder: Decoder::new().with_max_packet_size(config.max_packet_size),
            read_buf: buffer_pool::get_buffer(),
            session: Session::new(),
            writer: None,
            config,
            registry,
            clients,
            router,
        }
    }

    /// Drive the connection to completion: read loop racing against writer
    /// flushes until the socket closes, DISCONNECT arrives, or the caller's
    /// `tokio::select!` shutdown branch wins.
    pub async fn run(&mut self) -> Result<(), ConnectionError> {
        loop {
            tokio::select! {
                biased;

                result = self.stream.read_buf(&mut self.read_buf) => {
                    match result {
                        Ok(0) => {
                            debug!("connection closed from {}", self.addr);
                            self.disconnect();
                            return Ok(());
                        }
                        Ok(_) => {
                            if let Err(e) = self.drain_decoded_packets().await {
                                self.disconnect();
                                return Err(e);
                            }
                        }
                        Err(e) => {
                            debug!("read error from {}: {}", self.addr, e);
                            self.disconnect();
                            return Err(e.into());
                        }
                    }
                }

                _ = async {
                    match &self.writer {
                        Some(writer) => writer.notified().await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    if let Some(writer) = self.writer.clone() {
                        let data = writer.take_buffer();
                        if !data.is_empty() {
                            self.stream.write_all(&data).await?;
                        }
                        if !writer.is_alive() {
                            // Either evicted by a duplicate client_id CONNECT
                            // (the evictor already removed our old client
                            // table entry and unsubscribed us) or the
                            // supervisor is stopping. `disconnect()` is safe
                            // to call in both cases: removing a client table
                            // entry that no longer points at our writer, and
                            // pruning subscriptions that are already gone,
                            // are both no-ops.
                            debug!("session for {:?} closing", self.session.client_id);
                            self.disconnect();
                            return Err(ConnectionError::Shutdown);
                        }
                    }
                }
            }
        }
    }

    async fn drain_decoded_packets(&mut self) -> Result<(), ConnectionError> {
        loop {
            let decoded = self.decoder.decode(&self.read_buf)?;
            let Some((packet, consumed)) = decoded else {
                break;
            };
            bytes::Buf::advance(&mut self.read_buf, consumed);
            self.session.touch();
            self.handle_packet(packet).await?;
        }
        Ok(())
    }

    async fn handle_packet(&mut self, packet: Packet) -> Result<(), ConnectionError> {
        match self.session.state {
            SessionState::ExpectConnect => match packet {
                Packet::Connect(connect) => self.handle_connect(*connect).await,
                _ => Err(ConnectionError::ProtocolViolation(
                    "first packet on a connection must be CONNECT",
                )),
            },
            SessionState::Active => match packet {
                Packet::Connect(_) => {
                    Err(ConnectionError::ProtocolViolation("duplicate CONNECT"))
                }
                Packet::Publish(publish) => {
                    if validate_topic_name(&publish.topic).is_err() {
                        return Err(ConnectionError::ProtocolViolation("invalid topic name"));
                    }
                    let topic = publish.topic.clone();
                    self.router.publish(&topic, &publish);
                    Ok(())
                }
                Packet::Subscribe(subscribe) => self.handle_subscribe(subscribe).await,
                Packet::Unsubscribe(unsubscribe) => self.handle_unsubscribe(unsubscribe).await,
                Packet::PingReq => self.send(&Packet::PingResp),
                Packet::Disconnect => Err(ConnectionError::Shutdown),
                _ => {
                    warn!("unexpected packet type {:?} from {}", packet.packet_type(), self.addr);
                    Ok(())
                }
            },
            SessionState::Closed => Ok(()),
        }
    }

    async fn handle_connect(&mut self, connect: crate::protocol::Connect) -> Result<(), ConnectionError> {
        if connect.protocol_level != 3 && connect.protocol_level != 4 {
            self.send_connack(false, ConnectReturnCode::UnacceptableProtocolVersion).await?;
            return Err(ConnectionError::ProtocolViolation("unsupported protocol level"));
        }

        if self.config.max_connections != 0 && self.clients.len() >= self.config.max_connections {
            self.send_connack(false, ConnectReturnCode::NotAuthorized).await?;
            return Err(ConnectionError::ProtocolViolation("max connections reached"));
        }

        let client_id: Arc<str> = Arc::from(connect.client_id.as_str());

        // Duplicate client_id: evict the prior session before activating ours.
        if let Some((_, old_writer)) = self.clients.remove(&client_id) {
            debug!("evicting prior session for client_id {}", client_id);
            self.registry.unsubscribe_all(&client_id);
            old_writer.close();
        }

        let writer = Arc::new(SessionWriter::new(self.config.max_packet_size));
        self.clients.insert(client_id.clone(), writer.clone());
        self.writer = Some(writer);
        self.session.activate(client_id, connect.keep_alive);

        self.send_connack(false, ConnectReturnCode::Accepted).await
    }

    async fn handle_subscribe(&mut self, subscribe: crate::protocol::Subscribe) -> Result<(), ConnectionError> {
        let Some(client_id) = self.session.client_id.clone() else {
            return Err(ConnectionError::ProtocolViolation("no active session"));
        };

        let mut return_codes = Vec::with_capacity(subscribe.filters.len());
        for filter in &subscribe.filters {
            if validate_topic_filter(&filter.filter).is_err() {
                return Err(ConnectionError::ProtocolViolation("invalid topic filter"));
            }
            self.registry.subscribe(&filter.filter, client_id.clone());
            self.session.add_subscription(filter.filter.clone());
            // Every subscription is granted at QoS 0 regardless of what was requested.
            return_codes.push(0u8);
        }

        self.send(&Packet::SubAck(SubAck {
            packet_id: subscribe.packet_id,
            return_codes,
        }))
    }

    async fn handle_unsubscribe(&mut self, unsubscribe: Unsubscribe) -> Result<(), ConnectionError> {
        let Some(client_id) = self.session.client_id.clone() else {
            return Err(ConnectionError::ProtocolViolation("no active session"));
        };

        for filter in &unsubscribe.filters {
            self.registry.unsubscribe(filter, &client_id);
            self.session.remove_subscription(filter);
        }

        self.send(&Packet::UnsubAck(UnsubAck {
            packet_id: unsubscribe.packet_id,
        }))
    }

    /// Send a CONNACK. Before a session is activated there's no `SessionWriter`
    /// yet, so rejections are written straight to the socket instead.
    async fn send_connack(&mut self, session_present: bool, return_code: ConnectReturnCode) -> Result<(), ConnectionError> {
        let packet = Packet::ConnAck(ConnAck {
            session_present,
            return_code,
        });
        if let Some(writer) = &self.writer {
            writer.send_packet(&packet).ok();
            return Ok(());
        }

        let mut buf = BytesMut::new();
        crate::codec::Encoder::new()
            .encode(&packet, &mut buf)
            .map_err(|_| ConnectionError::ProtocolViolation("failed to encode CONNACK"))?;
        self.stream.write_all(&buf).await?;
        Ok(())
    }

    fn send(&self, packet: &Packet) -> Result<(), ConnectionError> {
        if let Some(writer) = &self.writer {
            writer.send_packet(packet).ok();
        }
        Ok(())
    }

    /// Remove this connection's client_id from the client table and registry,
    /// but only if we still own the entry (a duplicate-id CONNECT may have
    /// already replaced it, in which case the evictor already cleaned up).
    fn disconnect(&mut self) {
        if let Some(client_id) = self.session.client_id.take() {
            if let Some(writer) = &self.writer {
                self.clients
                    .remove_if(&client_id, |_, w| Arc::ptr_eq(w, writer));
            }
            self.registry.unsubscribe_all(&client_id);
        }
        self.session.state = SessionState::Closed;
        let read_buf = std::mem::take(&mut self.read_buf);
        buffer_pool::put_buffer(read_buf);
    }
}
