//! Broker Connection Manager
//!
//! Owns one MQTT v3.1.1 session with one broker: TCP connect, CONNECT and
//! CONNACK, SUBSCRIBE and SUBACK, then a session task that delivers inbound
//! PUBLISH packets, writes queued publishes and keeps the session alive.
//!
//! A manager never reconnects. When the session ends its state becomes
//! `Failed` (or `Disconnected` when cancelled), the inbound stream closes and
//! [`ConnectionManager::closed`] resolves. Retrying is the supervisor's job.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::endpoint::BrokerEndpoint;
use crate::codec::{Decoder, Encoder};
use crate::config::ConnectionConfig;
use crate::error::{ConnectError, PublishError};
use crate::protocol::{
    Connect, Packet, ProtocolError, PubAck, Publish, QoS, Subscribe, SubscribeReturnCode,
};
use crate::remote::{ConnectionState, Message, RemotePeer, Side};
use crate::topic::FilterSet;

/// Packet identifier used for the single SUBSCRIBE of a session
const SUBSCRIBE_PACKET_ID: u16 = 1;

/// Stream of messages received on one connection
pub type Inbound = mpsc::Receiver<Message>;

/// Operations queued for the session task
#[derive(Debug)]
enum Command {
    Publish { topic: String, payload: Bytes },
}

/// Handle to one live broker session
#[derive(Debug)]
pub struct ConnectionManager {
    side: Side,
    state: watch::Receiver<ConnectionState>,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    /// Filters the broker granted in its SUBACK
    granted: FilterSet,
}

impl ConnectionManager {
    /// Establish a session and start its task
    ///
    /// Resolves once the broker has acknowledged both CONNECT and SUBSCRIBE.
    /// `cancel` should be a token dedicated to this connection; cancelling it
    /// ends the session with a DISCONNECT.
    pub async fn connect(
        side: Side,
        endpoint: &BrokerEndpoint,
        settings: &ConnectionConfig,
        cancel: CancellationToken,
    ) -> Result<(Self, Inbound), ConnectError> {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (inbound_tx, inbound_rx) = mpsc::channel(settings.inbound_capacity);
        let (command_tx, command_rx) = mpsc::channel(settings.outbound_capacity);

        debug!("{} broker: Connecting to {}", side, endpoint.address);

        let handshake = Self::handshake(side, endpoint, settings, &inbound_tx);
        let (reader, writer, granted) = tokio::select! {
            _ = cancel.cancelled() => return Err(ConnectError::Cancelled),
            result = handshake => result?,
        };

        state_tx.send_replace(ConnectionState::Connected);

        let session = Session {
            side,
            reader,
            writer,
            keep_alive: settings.keep_alive,
        };
        tokio::spawn(session.run(command_rx, inbound_tx, cancel.clone(), state_tx));

        let manager = Self {
            side,
            state: state_rx,
            commands: command_tx,
            cancel,
            granted,
        };
        Ok((manager, inbound_rx))
    }

    async fn handshake(
        side: Side,
        endpoint: &BrokerEndpoint,
        settings: &ConnectionConfig,
        inbound: &mpsc::Sender<Message>,
    ) -> Result<(PacketReader, PacketWriter, FilterSet), ConnectError> {
        let address = &endpoint.address;
        let stream = timeout(
            settings.connect_timeout,
            TcpStream::connect((address.host.as_str(), address.port)),
        )
        .await
        .map_err(|_| ConnectError::Timeout("TCP connect"))??;
        stream.set_nodelay(true)?;

        debug!("{} broker: TCP connected", side);

        let (read_half, write_half) = stream.into_split();
        let mut reader = PacketReader::new(read_half, settings.max_packet_size);
        let mut writer = PacketWriter::new(write_half);

        let (username, password) = match &endpoint.credentials {
            Some(creds) => (
                Some(creds.username.clone()),
                creds.password.as_ref().map(|p| Bytes::from(p.clone())),
            ),
            None => (None, None),
        };
        let keep_alive = u16::try_from(settings.keep_alive.as_secs()).unwrap_or(u16::MAX);
        writer
            .send(&Packet::Connect(Box::new(Connect {
                client_id: endpoint.client_id.clone(),
                clean_session: true,
                keep_alive,
                username,
                password,
            })))
            .await?;

        debug!("{} broker: CONNECT sent", side);

        match timeout(settings.connect_timeout, reader.read_packet())
            .await
            .map_err(|_| ConnectError::Timeout("CONNACK"))??
        {
            Packet::ConnAck(connack) if connack.return_code.is_accepted() => {
                info!(
                    "{} broker: Connected to {} as '{}'",
                    side, endpoint.address, endpoint.client_id
                );
            }
            Packet::ConnAck(connack) => return Err(ConnectError::Rejected(connack.return_code)),
            _ => {
                return Err(ProtocolError::ProtocolViolation("expected CONNACK").into());
            }
        }

        let filters = endpoint.subscriptions();
        writer
            .send(&Packet::Subscribe(Subscribe {
                packet_id: SUBSCRIBE_PACKET_ID,
                filters: filters
                    .filters()
                    .iter()
                    .map(|f| (f.clone(), QoS::AtMostOnce))
                    .collect(),
            }))
            .await?;

        let deadline = Instant::now() + settings.connect_timeout;
        let suback = loop {
            let packet = tokio::time::timeout_at(deadline, reader.read_packet())
                .await
                .map_err(|_| ConnectError::Timeout("SUBACK"))??;
            match packet {
                Packet::SubAck(suback) if suback.packet_id == SUBSCRIBE_PACKET_ID => break suback,
                Packet::Publish(publish) => {
                    // Brokers may deliver before the SUBACK is written
                    if publish.qos != QoS::AtMostOnce {
                        return Err(
                            ProtocolError::ProtocolViolation("PUBLISH before SUBACK with QoS > 0")
                                .into(),
                        );
                    }
                    if inbound
                        .try_send(Message::new(publish.topic, publish.payload))
                        .is_err()
                    {
                        warn!("{} broker: Inbound queue full, dropping early message", side);
                    }
                }
                _ => return Err(ProtocolError::ProtocolViolation("expected SUBACK").into()),
            }
        };

        let mut granted = Vec::with_capacity(filters.filters().len());
        for (filter, code) in filters.filters().iter().zip(&suback.return_codes) {
            match code {
                SubscribeReturnCode::Granted(_) => granted.push(filter.clone()),
                SubscribeReturnCode::Failure => {
                    warn!("{} broker: Subscription to '{}' rejected", side, filter)
                }
            }
        }
        if granted.is_empty() {
            return Err(ConnectError::SubscriptionRejected);
        }
        debug!(
            "{} broker: Subscribed to {} of {} filters",
            side,
            granted.len(),
            filters.filters().len()
        );

        Ok((reader, writer, FilterSet::new(&granted)))
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Resolve when the session has ended, by failure or by cancellation
    pub async fn closed(&self) -> ConnectionState {
        let mut state = self.state.clone();
        let ended = state
            .wait_for(|s| matches!(s, ConnectionState::Failed | ConnectionState::Disconnected))
            .await
            .map(|s| *s);
        // The session task always sets a final state before it goes away
        ended.unwrap_or_else(|_| *state.borrow())
    }

    /// Filters this session is actually subscribed with
    pub fn granted(&self) -> &FilterSet {
        &self.granted
    }

    /// End the session with a DISCONNECT
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Queue a QoS 0 publish without waiting
    pub fn try_publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        if self.state() != ConnectionState::Connected {
            return Err(PublishError::NotConnected { side: self.side });
        }
        self.commands
            .try_send(Command::Publish {
                topic: topic.to_string(),
                payload,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => PublishError::QueueFull { side: self.side },
                mpsc::error::TrySendError::Closed(_) => {
                    PublishError::NotConnected { side: self.side }
                }
            })
    }
}

#[async_trait]
impl RemotePeer for ConnectionManager {
    fn side(&self) -> Side {
        self.side
    }

    fn state(&self) -> ConnectionState {
        ConnectionManager::state(self)
    }

    fn accepts(&self, topic: &str) -> bool {
        self.granted.matches(topic)
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        self.try_publish(topic, payload)
    }
}

/// Buffered packet reader over the socket read half
struct PacketReader {
    half: OwnedReadHalf,
    buf: BytesMut,
    decoder: Decoder,
}

impl PacketReader {
    fn new(half: OwnedReadHalf, max_packet_size: usize) -> Self {
        Self {
            half,
            buf: BytesMut::with_capacity(4096),
            decoder: Decoder::new().with_max_packet_size(max_packet_size),
        }
    }

    /// Read the next complete packet
    ///
    /// Cancel safe: partial data stays in the buffer for the next call.
    async fn read_packet(&mut self) -> Result<Packet, ConnectError> {
        loop {
            if let Some((packet, consumed)) = self
                .decoder
                .decode(&self.buf)
                .map_err(ProtocolError::from)?
            {
                self.buf.advance(consumed);
                return Ok(packet);
            }
            if self.half.read_buf(&mut self.buf).await? == 0 {
                return Err(ConnectError::Closed);
            }
        }
    }
}

/// Packet writer over the socket write half
struct PacketWriter {
    half: OwnedWriteHalf,
    buf: BytesMut,
    encoder: Encoder,
}

impl PacketWriter {
    fn new(half: OwnedWriteHalf) -> Self {
        Self {
            half,
            buf: BytesMut::with_capacity(4096),
            encoder: Encoder::new(),
        }
    }

    async fn send(&mut self, packet: &Packet) -> Result<(), ConnectError> {
        self.buf.clear();
        self.encoder
            .encode(packet, &mut self.buf)
            .map_err(ProtocolError::from)?;
        self.half.write_all(&self.buf).await?;
        Ok(())
    }
}

/// The established half of a connection, driven by its own task
struct Session {
    side: Side,
    reader: PacketReader,
    writer: PacketWriter,
    keep_alive: Duration,
}

impl Session {
    async fn run(
        mut self,
        commands: mpsc::Receiver<Command>,
        inbound: mpsc::Sender<Message>,
        cancel: CancellationToken,
        state: watch::Sender<ConnectionState>,
    ) {
        let side = self.side;
        match self.message_loop(commands, &inbound, &cancel).await {
            Ok(()) => {
                info!("{} broker: Disconnected", side);
                state.send_replace(ConnectionState::Disconnected);
            }
            Err(e) => {
                warn!("{} broker: Connection lost: {}", side, e);
                state.send_replace(ConnectionState::Failed);
            }
        }
        // Dropping `inbound` here closes the stream for the relay flow
    }

    async fn message_loop(
        &mut self,
        mut commands: mpsc::Receiver<Command>,
        inbound: &mpsc::Sender<Message>,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectError> {
        let mut keepalive_timer =
            tokio::time::interval_at(Instant::now() + self.keep_alive, self.keep_alive);
        keepalive_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut awaiting_pingresp = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.disconnect().await;
                    return Ok(());
                }

                cmd = commands.recv() => match cmd {
                    Some(Command::Publish { topic, payload }) => {
                        let publish = Packet::Publish(Publish::at_most_once(topic, payload));
                        match self.writer.send(&publish).await {
                            Err(ConnectError::Protocol(ProtocolError::Encode(e))) => {
                                warn!("{} broker: Dropping unencodable publish: {}", self.side, e);
                            }
                            other => other?,
                        }
                    }
                    // Every handle was dropped
                    None => {
                        self.disconnect().await;
                        return Ok(());
                    }
                },

                result = self.reader.read_packet() => {
                    self.handle_packet(result?, inbound, &mut awaiting_pingresp).await?;
                }

                _ = keepalive_timer.tick() => {
                    if awaiting_pingresp {
                        return Err(ProtocolError::KeepAliveTimeout.into());
                    }
                    self.writer.send(&Packet::PingReq).await?;
                    awaiting_pingresp = true;
                }
            }
        }
    }

    async fn handle_packet(
        &mut self,
        packet: Packet,
        inbound: &mpsc::Sender<Message>,
        awaiting_pingresp: &mut bool,
    ) -> Result<(), ConnectError> {
        match packet {
            Packet::Publish(publish) => {
                let ack = match (publish.qos, publish.packet_id) {
                    (QoS::AtMostOnce, _) => None,
                    (QoS::AtLeastOnce, Some(packet_id)) => Some(PubAck { packet_id }),
                    _ => {
                        return Err(ProtocolError::ProtocolViolation(
                            "QoS 2 delivery is not supported",
                        )
                        .into())
                    }
                };

                debug!(
                    "{} broker: Received {} ({} bytes)",
                    self.side,
                    publish.topic,
                    publish.payload.len()
                );
                if inbound
                    .send(Message::new(publish.topic, publish.payload))
                    .await
                    .is_err()
                {
                    debug!("{} broker: Inbound stream closed, message dropped", self.side);
                }

                if let Some(puback) = ack {
                    self.writer.send(&Packet::PubAck(puback)).await?;
                }
            }
            Packet::PingResp => {
                *awaiting_pingresp = false;
            }
            Packet::SubAck(_) | Packet::PubAck(_) => {
                debug!("{} broker: Ignoring late acknowledgement", self.side);
            }
            Packet::Disconnect => return Err(ConnectError::Closed),
            _ => {
                return Err(ProtocolError::ProtocolViolation("unexpected packet from broker").into())
            }
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.writer.send(&Packet::Disconnect).await {
            debug!("{} broker: DISCONNECT not sent: {}", self.side, e);
        }
        let _ = self.writer.half.shutdown().await;
    }
}
