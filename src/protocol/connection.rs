//! Session state machine.
//!
//! The session never touches a socket. It consumes decoded [`ServerPacket`]s,
//! produces [`OutgoingFrame`]s and reports what happened as
//! [`SessionEvent`]s. Time is passed in by the caller so that keepalive and
//! timeout handling are plain comparisons.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::{AssociatedPlayerData, CryptoPublicKey, Encode, GameServerRole, SpecialUserData};
use crate::error::{Error, Result};
use super::crypto::{KeyPair, SharedCrypto};
use super::message::{
    CryptoHandshakeStartPacket, DisconnectPacket, KeepalivePacket, KeepaliveTCPPacket, LoginPacket,
};
use super::packet::{encode_packet, OutgoingFrame, PacketMetadata, PROTOCOL_VERSION};
use super::registry::{PacketSet, ServerPacket};

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 5_000;
const DEFAULT_KEEPALIVE_TIMEOUT_MS: u64 = 20_000;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    HandshakeStarted,
    CryptoEstablished,
    LoggingIn,
    Established,
    /// Disconnect packet queued, waiting for the next poll to flush it
    Disconnecting,
}

impl ConnectionState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::HandshakeStarted => "HandshakeStarted",
            Self::CryptoEstablished => "CryptoEstablished",
            Self::LoggingIn => "LoggingIn",
            Self::Established => "Established",
            Self::Disconnecting => "Disconnecting",
        }
    }

    /// Between the handshake request and a successful login
    pub fn is_connecting(self) -> bool {
        matches!(self, Self::HandshakeStarted | Self::CryptoEstablished | Self::LoggingIn)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why the session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    UserRequested,
    /// Generic server-side disconnect with the server's message
    Server { message: String },
    LoginFailed { message: String },
    Banned { message: String, timestamp: i64 },
    Muted { reason: String, timestamp: i64 },
    ProtocolMismatch { server: u16, client: u16 },
    /// No response within the connect or keepalive window
    Timeout,
    /// The transport closed underneath the session
    ConnectionLost,
    HandshakeFailed(String),
}

impl DisconnectReason {
    /// Server-side rejection of the user rather than a network fault
    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::LoginFailed { .. } | Self::Banned { .. } | Self::Muted { .. })
    }

    /// A plain reconnect with the same parameters may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UserRequested | Self::Server { .. } | Self::Timeout | Self::ConnectionLost
        )
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserRequested => write!(f, "disconnected by user"),
            Self::Server { message } => write!(f, "server closed the connection: {message}"),
            Self::LoginFailed { message } => write!(f, "login failed: {message}"),
            Self::Banned { message, timestamp } => write!(f, "banned until {timestamp}: {message}"),
            Self::Muted { reason, timestamp } => write!(f, "muted until {timestamp}: {reason}"),
            Self::ProtocolMismatch { server, client } => {
                write!(f, "protocol mismatch (server {server}, client {client})")
            }
            Self::Timeout => write!(f, "connection timed out"),
            Self::ConnectionLost => write!(f, "connection lost"),
            Self::HandshakeFailed(msg) => write!(f, "handshake failed: {msg}"),
        }
    }
}

/// Account credentials sent in the login packet
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginCredentials {
    pub account_id: i32,
    pub name: String,
    pub token: String,
}

impl LoginCredentials {
    pub fn new(account_id: i32, name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            account_id,
            name: name.into(),
            token: token.into(),
        }
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("account_id", &self.account_id)
            .field("name", &self.name)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Session tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub protocol_version: u16,
    pub connect_timeout_ms: u64,
    pub keepalive_interval_ms: u64,
    pub keepalive_timeout_ms: u64,
    /// Sent automatically as soon as the session key exists
    pub credentials: Option<LoginCredentials>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            keepalive_interval_ms: DEFAULT_KEEPALIVE_INTERVAL_MS,
            keepalive_timeout_ms: DEFAULT_KEEPALIVE_TIMEOUT_MS,
            credentials: None,
        }
    }
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn keepalive_timeout(&self) -> Duration {
        Duration::from_millis(self.keepalive_timeout_ms)
    }
}

/// Something the owner of the session should know about
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    LoggedIn {
        tps: u32,
        secret_key: u32,
    },
    PlayerCount(u32),
    Notice(String),
    ConnectionTest {
        uid: u32,
        data: Vec<u8>,
    },
    ClaimThreadFailed,
    LevelData(Vec<AssociatedPlayerData>),
    Disconnected(DisconnectReason),
}

/// Client side of one server connection
#[derive(Debug)]
pub struct GameSession {
    config: SessionConfig,
    state: ConnectionState,
    crypto: SharedCrypto,
    key_pair: Option<KeyPair>,

    connect_started_at: Option<Instant>,
    last_received_at: Option<Instant>,
    last_keepalive_at: Option<Instant>,

    tps: u32,
    secret_key: u32,
    special_user_data: SpecialUserData,
    all_roles: Vec<GameServerRole>,
    player_count: u32,
    last_notice: Option<String>,

    disconnect_reason: Option<DisconnectReason>,
    /// Client version the server rejected; blocks handshakes until the version changes
    rejected_protocol: Option<u16>,

    outbox: VecDeque<OutgoingFrame>,
    pending_events: Vec<SessionEvent>,
}

impl GameSession {
    pub fn new(config: SessionConfig, crypto: SharedCrypto) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            crypto,
            key_pair: None,
            connect_started_at: None,
            last_received_at: None,
            last_keepalive_at: None,
            tps: 0,
            secret_key: 0,
            special_user_data: SpecialUserData::default(),
            all_roles: Vec::new(),
            player_count: 0,
            last_notice: None,
            disconnect_reason: None,
            rejected_protocol: None,
            outbox: VecDeque::new(),
            pending_events: Vec::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_established(&self) -> bool {
        self.state == ConnectionState::Established
    }

    /// Server tick rate announced at login
    pub fn tps(&self) -> u32 {
        self.tps
    }

    /// Anti-spoofing token assigned at login
    pub fn secret_key(&self) -> u32 {
        self.secret_key
    }

    pub fn special_user_data(&self) -> &SpecialUserData {
        &self.special_user_data
    }

    pub fn all_roles(&self) -> &[GameServerRole] {
        &self.all_roles
    }

    pub fn player_count(&self) -> u32 {
        self.player_count
    }

    pub fn disconnect_reason(&self) -> Option<&DisconnectReason> {
        self.disconnect_reason.as_ref()
    }

    pub fn last_notice(&self) -> Option<&str> {
        self.last_notice.as_deref()
    }

    pub fn crypto(&self) -> &SharedCrypto {
        &self.crypto
    }

    /// Change the protocol version announced in the next handshake.
    pub fn set_protocol_version(&mut self, version: u16) {
        self.config.protocol_version = version;
    }

    pub fn set_credentials(&mut self, credentials: Option<LoginCredentials>) {
        self.config.credentials = credentials;
    }

    /// Whether a handshake may start now: the session is idle and the
    /// announced protocol version was not already rejected by the server.
    pub fn check_can_handshake(&self) -> Result<()> {
        if self.state != ConnectionState::Disconnected {
            return Err(Error::InvalidState {
                expected: ConnectionState::Disconnected.name(),
                actual: self.state.name(),
            });
        }
        if let Some(server) = self.rejected_protocol {
            if let Some(DisconnectReason::ProtocolMismatch { client, .. }) = &self.disconnect_reason {
                if *client == self.config.protocol_version {
                    return Err(Error::ProtocolMismatch {
                        server,
                        client: self.config.protocol_version,
                    });
                }
            }
        }
        Ok(())
    }

    /// Start a new connection attempt.
    pub fn begin_handshake(&mut self, now: Instant) -> Result<OutgoingFrame> {
        self.check_can_handshake()?;

        let key_pair = KeyPair::generate()?;
        let frame = encode_packet(
            &CryptoHandshakeStartPacket {
                protocol: self.config.protocol_version,
                key: key_pair.public_key(),
            },
            None,
        )?;

        self.clear_session_data();
        self.key_pair = Some(key_pair);
        self.connect_started_at = Some(now);
        self.last_received_at = Some(now);
        self.disconnect_reason = None;
        self.rejected_protocol = None;
        self.transition(ConnectionState::HandshakeStarted);

        info!(protocol = self.config.protocol_version, "starting crypto handshake");
        Ok(frame)
    }

    /// Send credentials over the established session key.
    pub fn login(&mut self, credentials: &LoginCredentials) -> Result<OutgoingFrame> {
        if self.state != ConnectionState::CryptoEstablished {
            return Err(Error::InvalidState {
                expected: ConnectionState::CryptoEstablished.name(),
                actual: self.state.name(),
            });
        }

        let packet = LoginPacket {
            account_id: credentials.account_id,
            name: credentials.name.clone(),
            token: credentials.token.clone(),
        };
        let frame = self.crypto.with(|crypto| encode_packet(&packet, crypto))?;

        info!(account_id = credentials.account_id, name = %credentials.name, "logging in");
        self.transition(ConnectionState::LoggingIn);
        Ok(frame)
    }

    /// Feed one decoded server packet into the state machine.
    pub fn handle_packet(&mut self, packet: ServerPacket, now: Instant) -> Vec<SessionEvent> {
        if matches!(self.state, ConnectionState::Disconnected | ConnectionState::Disconnecting) {
            debug!(packet = packet.name(), state = %self.state, "ignoring packet, not connected");
            return std::mem::take(&mut self.pending_events);
        }
        self.last_received_at = Some(now);

        match packet {
            ServerPacket::CryptoHandshakeResponse(p) => {
                if self.expect_state(ConnectionState::HandshakeStarted, "CryptoHandshakeResponse") {
                    self.finish_handshake(&p.key);
                }
            }
            ServerPacket::LoggedIn(p) => {
                if self.expect_state(ConnectionState::LoggingIn, "LoggedIn") {
                    info!(tps = p.tps, roles = p.all_roles.len(), "logged in");
                    self.tps = p.tps;
                    self.secret_key = p.secret_key;
                    self.special_user_data = p.special_user_data;
                    self.all_roles = p.all_roles;
                    self.connect_started_at = None;
                    self.last_keepalive_at = None;
                    self.transition(ConnectionState::Established);
                    self.pending_events.push(SessionEvent::LoggedIn {
                        tps: p.tps,
                        secret_key: p.secret_key,
                    });
                }
            }
            ServerPacket::LoginFailed(p) => {
                if self.expect_state(ConnectionState::LoggingIn, "LoginFailed") {
                    self.terminate(DisconnectReason::LoginFailed { message: p.message });
                }
            }
            ServerPacket::ServerDisconnect(p) => {
                self.terminate(DisconnectReason::Server { message: p.message });
            }
            ServerPacket::ServerBanned(p) => {
                self.terminate(DisconnectReason::Banned {
                    message: p.message,
                    timestamp: p.timestamp,
                });
            }
            ServerPacket::ServerMuted(p) => {
                self.terminate(DisconnectReason::Muted {
                    reason: p.reason,
                    timestamp: p.timestamp,
                });
            }
            ServerPacket::ProtocolMismatch(p) => {
                let client = self.config.protocol_version;
                warn!(server = p.server_protocol, client, "server rejected protocol version");
                self.rejected_protocol = Some(p.server_protocol);
                self.terminate(DisconnectReason::ProtocolMismatch {
                    server: p.server_protocol,
                    client,
                });
            }
            ServerPacket::KeepaliveResponse(p) => {
                self.update_player_count(p.player_count);
            }
            ServerPacket::PingResponse(p) => {
                debug!(id = p.id, players = p.player_count, "ping response");
                self.update_player_count(p.player_count);
            }
            ServerPacket::KeepaliveTCPResponse(_) => {}
            ServerPacket::ServerNotice(p) => {
                info!(message = %p.message, "server notice");
                self.last_notice = Some(p.message.clone());
                self.pending_events.push(SessionEvent::Notice(p.message));
            }
            ServerPacket::ConnectionTestResponse(p) => {
                self.pending_events.push(SessionEvent::ConnectionTest {
                    uid: p.uid,
                    data: p.data,
                });
            }
            ServerPacket::ClaimThreadFailed(_) => {
                warn!("server failed to claim the connection thread");
                self.pending_events.push(SessionEvent::ClaimThreadFailed);
            }
            ServerPacket::LevelData(p) => {
                if self.state == ConnectionState::Established {
                    self.pending_events.push(SessionEvent::LevelData(p.players));
                } else {
                    debug!(state = %self.state, "level data before login, dropping");
                }
            }
        }

        std::mem::take(&mut self.pending_events)
    }

    /// Keepalive and timeout handling. Returns every frame that should go out now.
    pub fn poll(&mut self, now: Instant) -> Vec<OutgoingFrame> {
        match self.state {
            ConnectionState::Disconnected => {}
            ConnectionState::Disconnecting => {
                self.transition(ConnectionState::Disconnected);
            }
            ConnectionState::HandshakeStarted
            | ConnectionState::CryptoEstablished
            | ConnectionState::LoggingIn => {
                let started = self.connect_started_at.unwrap_or(now);
                if now.saturating_duration_since(started) >= self.config.connect_timeout() {
                    warn!(state = %self.state, "connect attempt timed out");
                    self.terminate(DisconnectReason::Timeout);
                }
            }
            ConnectionState::Established => {
                let last = self.last_received_at.unwrap_or(now);
                if now.saturating_duration_since(last) >= self.config.keepalive_timeout() {
                    warn!(silent_for = ?now.saturating_duration_since(last), "keepalive timeout");
                    self.terminate(DisconnectReason::Timeout);
                } else if self
                    .last_keepalive_at
                    .map_or(true, |t| now.saturating_duration_since(t) >= self.config.keepalive_interval())
                {
                    self.last_keepalive_at = Some(now);
                    self.queue_plain(&KeepalivePacket);
                    self.queue_plain(&KeepaliveTCPPacket);
                }
            }
        }

        self.outbox.drain(..).collect()
    }

    /// Events raised outside [`handle_packet`](Self::handle_packet), e.g. a timeout in `poll`.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// User-initiated disconnect. The state settles on the next `poll`.
    pub fn disconnect(&mut self, _now: Instant) -> Option<OutgoingFrame> {
        if matches!(self.state, ConnectionState::Disconnected | ConnectionState::Disconnecting) {
            return None;
        }

        let frame = match encode_packet(&DisconnectPacket, None) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(error = %e, "failed to encode disconnect packet");
                None
            }
        };

        info!("disconnecting");
        self.end_session(DisconnectReason::UserRequested);
        self.transition(ConnectionState::Disconnecting);
        frame
    }

    /// The transport went away. Ends the session unless it already ended.
    pub fn connection_lost(&mut self) {
        match self.state {
            ConnectionState::Disconnected => {}
            ConnectionState::Disconnecting => self.transition(ConnectionState::Disconnected),
            _ => self.terminate(DisconnectReason::ConnectionLost),
        }
    }

    /// Drop all session state for a fresh connect attempt.
    pub fn reset(&mut self) {
        self.end_session_quietly();
        self.clear_session_data();
        self.outbox.clear();
        self.pending_events.clear();
        self.state = ConnectionState::Disconnected;
    }

    fn finish_handshake(&mut self, server_key: &CryptoPublicKey) {
        let Some(key_pair) = self.key_pair.take() else {
            self.terminate(DisconnectReason::HandshakeFailed("no local key pair".into()));
            return;
        };

        match key_pair.derive(server_key) {
            Ok(crypto) => {
                self.crypto.install(crypto);
                self.transition(ConnectionState::CryptoEstablished);
                info!("session key established");

                if let Some(credentials) = self.config.credentials.clone() {
                    match self.login(&credentials) {
                        Ok(frame) => self.outbox.push_back(frame),
                        Err(e) => self.terminate(DisconnectReason::HandshakeFailed(e.to_string())),
                    }
                }
            }
            Err(e) => self.terminate(DisconnectReason::HandshakeFailed(e.to_string())),
        }
    }

    fn expect_state(&self, expected: ConnectionState, packet: &'static str) -> bool {
        if self.state == expected {
            return true;
        }
        warn!(packet, state = %self.state, expected = %expected, "unexpected packet for state, ignoring");
        false
    }

    fn update_player_count(&mut self, count: u32) {
        if self.player_count != count {
            self.player_count = count;
            self.pending_events.push(SessionEvent::PlayerCount(count));
        }
    }

    fn queue_plain<P: PacketMetadata + Encode>(&mut self, packet: &P) {
        match encode_packet(packet, None) {
            Ok(frame) => self.outbox.push_back(frame),
            Err(e) => warn!(packet = P::NAME, error = %e, "failed to encode packet"),
        }
    }

    fn transition(&mut self, to: ConnectionState) {
        let from = self.state;
        if from == to {
            return;
        }
        debug!(%from, %to, "session state change");
        self.state = to;
        self.pending_events.push(SessionEvent::StateChanged { from, to });
    }

    fn terminate(&mut self, reason: DisconnectReason) {
        info!(%reason, "session ended");
        self.end_session(reason);
        self.transition(ConnectionState::Disconnected);
    }

    fn end_session(&mut self, reason: DisconnectReason) {
        self.end_session_quietly();
        self.disconnect_reason = Some(reason.clone());
        self.pending_events.push(SessionEvent::Disconnected(reason));
    }

    fn end_session_quietly(&mut self) {
        self.crypto.clear();
        self.key_pair = None;
        self.connect_started_at = None;
        self.last_keepalive_at = None;
    }

    fn clear_session_data(&mut self) {
        self.tps = 0;
        self.secret_key = 0;
        self.special_user_data = SpecialUserData::default();
        self.all_roles.clear();
        self.player_count = 0;
        self.last_notice = None;
    }
}
