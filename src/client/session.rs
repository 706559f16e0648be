use std::sync::Arc;
use std::time::Instant;

use ahash::{AHashMap, AHashSet};
use tracing::{debug, info, warn};

use crate::codec::{AssociatedPlayerData, PlayerData, VisualPlayerState};
use crate::error::{Error, Result};
use crate::interp::{InterpolatorSettings, PlayerId, PlayerInterpolator};
use crate::protocol::message::PlayerDataPacket;
use crate::protocol::{
    encode_packet, transport, ConnectionState, GameSession, LoginCredentials, NetworkHandle,
    OutgoingFrame, PacketLogger, PacketSummary, ServerPacket, SessionEvent, SharedCrypto,
};
use crate::util::time::{SystemClock, TimeSource};
use crate::client::config::ClientConfig;
use crate::client::events::{EventCollector, EventHandler, GameEvent};

/// Builder for creating overlay clients
pub struct ClientBuilder {
    config: ClientConfig,
    clock: Arc<dyn TimeSource>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn credentials(mut self, account_id: i32, name: impl Into<String>, token: impl Into<String>) -> Self {
        self.config.session.credentials = Some(LoginCredentials::new(account_id, name, token));
        self
    }

    pub fn realtime(mut self, realtime: bool) -> Self {
        self.config.interpolation.realtime = realtime;
        self
    }

    pub fn expected_delta(mut self, delta: f32) -> Self {
        self.config.interpolation.expected_delta = delta;
        self.config.expected_delta_from_tps = false;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Client without a transport; frames collect in [`OverlayClient::take_unsent`].
    pub fn build(self) -> OverlayClient {
        OverlayClient::new(self.config, self.clock)
    }

    pub async fn connect(self) -> Result<OverlayClient> {
        let mut client = self.build();
        client.connect().await?;
        Ok(client)
    }
}

/// Session, interpolation engine and network plumbing for one server.
///
/// Everything except [`connect`](Self::connect) runs on the caller's update
/// thread; call [`update`](Self::update) once per frame.
pub struct OverlayClient {
    config: ClientConfig,
    session: GameSession,
    interpolator: PlayerInterpolator,
    network: Option<NetworkHandle>,
    logger: PacketLogger,
    events: EventCollector,
    /// Bumped once per level data packet
    server_update_counter: f32,
    /// Consecutive level data packets each tracked player was missing from
    absent_for: AHashMap<PlayerId, u32>,
    unsent: Vec<OutgoingFrame>,
}

impl OverlayClient {
    pub fn new(config: ClientConfig, clock: Arc<dyn TimeSource>) -> Self {
        let session = GameSession::new(config.session.clone(), SharedCrypto::new());
        let interpolator = PlayerInterpolator::with_clock(config.interpolation, clock);
        Self {
            config,
            session,
            interpolator,
            network: None,
            logger: PacketLogger::new(),
            events: EventCollector::new(),
            server_update_counter: 0.0,
            absent_for: AHashMap::new(),
            unsent: Vec::new(),
        }
    }

    /// Open the transport and start the handshake.
    pub async fn connect(&mut self) -> Result<()> {
        if self.session.state() != ConnectionState::Disconnected {
            return Err(Error::InvalidState {
                expected: ConnectionState::Disconnected.name(),
                actual: self.session.state().name(),
            });
        }
        self.session.reset();
        self.session.check_can_handshake()?;

        let network = transport::connect(
            self.config.server_addr,
            &self.config.transport,
            self.session.crypto().clone(),
            self.logger.clone(),
        )
        .await?;
        info!(addr = %network.remote_addr(), "connected, starting handshake");
        self.network = Some(network);

        if let Err(e) = self.begin_handshake(Instant::now()) {
            self.network = None;
            return Err(e);
        }
        Ok(())
    }

    /// Start the handshake over whatever transport is attached.
    pub fn begin_handshake(&mut self, now: Instant) -> Result<()> {
        let frame = self.session.begin_handshake(now)?;
        self.dispatch(frame);
        self.collect_session_events();
        Ok(())
    }

    /// Log in with explicit credentials once the session key exists.
    pub fn login(&mut self, credentials: &LoginCredentials) -> Result<()> {
        let frame = self.session.login(credentials)?;
        self.dispatch(frame);
        self.collect_session_events();
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(frame) = self.session.disconnect(Instant::now()) {
            self.dispatch(frame);
        }
        self.collect_session_events();
        self.clear_players();
    }

    /// Per-frame update with the wall clock.
    pub fn update(&mut self, dt: f32) {
        self.update_at(dt, Instant::now());
    }

    pub fn update_at(&mut self, dt: f32, now: Instant) {
        let mut closed = false;
        if let Some(network) = self.network.as_mut() {
            let mut inbound = Vec::new();
            while let Some(packet) = network.try_recv() {
                inbound.push(packet);
            }
            // set by the drain above, never ahead of queued packets
            closed = network.is_closed();
            for packet in inbound {
                self.handle_packet(packet, now);
            }
        }

        if closed && self.session.state() != ConnectionState::Disconnected {
            warn!("transport closed");
            self.session.connection_lost();
            self.network = None;
        }

        for frame in self.session.poll(now) {
            self.dispatch(frame);
        }
        self.collect_session_events();

        self.interpolator.tick(dt);

        let ids: Vec<PlayerId> = self.interpolator.player_ids().collect();
        for player_id in ids {
            if self.interpolator.swap_death_status(player_id) {
                self.events.on_event(GameEvent::PlayerDied { player_id });
            }
        }
    }

    /// Feed one decoded server packet, as the update loop does for the transport.
    pub fn handle_packet(&mut self, packet: ServerPacket, now: Instant) {
        let events = self.session.handle_packet(packet, now);
        self.apply_session_events(events);
    }

    /// Send the local player's sample. Ignored until logged in.
    pub fn send_player_data(&mut self, data: PlayerData) -> Result<()> {
        if !self.session.is_established() {
            return Err(Error::NotConnected);
        }
        let frame = encode_packet(&PlayerDataPacket { data }, None)?;
        self.dispatch(frame);
        Ok(())
    }

    pub fn session(&self) -> &GameSession {
        &self.session
    }

    pub fn interpolator(&self) -> &PlayerInterpolator {
        &self.interpolator
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn player_state(&self, player_id: PlayerId) -> Option<&VisualPlayerState> {
        self.interpolator.get_player_state(player_id)
    }

    /// The player was missing from the most recent level data packet
    pub fn is_player_stale(&self, player_id: PlayerId) -> bool {
        self.interpolator.is_player_stale(player_id, self.server_update_counter)
    }

    pub fn server_update_counter(&self) -> f32 {
        self.server_update_counter
    }

    pub fn drain_events(&mut self) -> Vec<GameEvent> {
        self.events.drain()
    }

    /// Frames produced while no transport was attached
    pub fn take_unsent(&mut self) -> Vec<OutgoingFrame> {
        std::mem::take(&mut self.unsent)
    }

    /// Traffic since the previous call
    pub fn packet_summary(&self) -> PacketSummary {
        self.logger.summary()
    }

    pub fn network(&self) -> Option<&NetworkHandle> {
        self.network.as_ref()
    }

    fn dispatch(&mut self, frame: OutgoingFrame) {
        match self.network.as_ref() {
            Some(network) => {
                network.send(frame);
            }
            None => self.unsent.push(frame),
        }
    }

    fn collect_session_events(&mut self) {
        let events = self.session.take_events();
        self.apply_session_events(events);
    }

    fn apply_session_events(&mut self, events: Vec<SessionEvent>) {
        for event in events {
            match event {
                SessionEvent::StateChanged { from, to } => {
                    self.events.on_event(GameEvent::StateChanged { from, to });
                }
                SessionEvent::LoggedIn { tps, secret_key } => {
                    if self.config.expected_delta_from_tps && tps > 0 {
                        let settings = InterpolatorSettings {
                            realtime: self.interpolator.settings().realtime,
                            ..InterpolatorSettings::for_tps(tps)
                        };
                        debug!(expected_delta = settings.expected_delta, "using server tick rate");
                        self.interpolator.set_settings(settings);
                    }
                    self.events.on_event(GameEvent::LoggedIn { tps, secret_key });
                }
                SessionEvent::PlayerCount(count) => {
                    self.events.on_event(GameEvent::PlayerCount { count });
                }
                SessionEvent::Notice(message) => {
                    self.events.on_event(GameEvent::ServerNotice { message });
                }
                SessionEvent::ConnectionTest { uid, data } => {
                    self.events.on_event(GameEvent::ConnectionTest { uid, data });
                }
                SessionEvent::ClaimThreadFailed => {
                    self.events.on_event(GameEvent::ClaimThreadFailed);
                }
                SessionEvent::LevelData(players) => self.apply_level_data(&players),
                SessionEvent::Disconnected(reason) => {
                    self.clear_players();
                    self.events.on_event(GameEvent::Disconnected { reason });
                }
            }
        }
    }

    fn apply_level_data(&mut self, players: &[AssociatedPlayerData]) {
        self.server_update_counter += 1.0;
        let counter = self.server_update_counter;

        let mut seen = AHashSet::with_capacity(players.len());
        for player in players {
            let id = player.account_id;
            if !self.interpolator.contains(id) {
                self.interpolator.add_player(id);
                self.events.on_event(GameEvent::PlayerJoined { player_id: id });
            }
            self.interpolator.update_player(id, &player.data, counter);
            self.absent_for.insert(id, 0);
            seen.insert(id);
        }

        let limit = self.config.stale_eviction_packets.max(1);
        let mut evicted = Vec::new();
        for (&id, missing) in self.absent_for.iter_mut() {
            if seen.contains(&id) {
                continue;
            }
            *missing += 1;
            if *missing >= limit {
                evicted.push(id);
            }
        }
        for id in evicted {
            debug!(player = id, "player left the level");
            self.absent_for.remove(&id);
            self.interpolator.remove_player(id);
            self.events.on_event(GameEvent::PlayerLeft { player_id: id });
        }
    }

    fn clear_players(&mut self) {
        self.interpolator.clear();
        self.absent_for.clear();
        self.server_update_counter = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SpecialUserData;
    use crate::protocol::message::{
        CryptoHandshakeResponsePacket, LevelDataPacket, LoggedInPacket, ProtocolMismatchPacket,
        ServerBannedPacket, ServerNoticePacket,
    };
    use crate::protocol::{DisconnectReason, PROTOCOL_VERSION};
    use tokio::sync::mpsc;
    use crate::protocol::{ClientPacket, KeyPair, PacketSet};
    use crate::util::time::ManualClock;
    use glam::Vec2;

    fn player(id: PlayerId, ts: f32, x: f32, death: f32) -> AssociatedPlayerData {
        let mut data = PlayerData {
            timestamp: ts,
            last_death_timestamp: death,
            ..Default::default()
        };
        data.player1.position = Vec2::new(x, 0.0);
        AssociatedPlayerData { account_id: id, data }
    }

    fn level(players: Vec<AssociatedPlayerData>) -> ServerPacket {
        LevelDataPacket { players }.into()
    }

    /// Offline client driven through handshake and login
    fn logged_in_client(config: ClientConfig) -> OverlayClient {
        let mut client = ClientBuilder::new(config)
            .credentials(7, "tester", "token")
            .clock(Arc::new(ManualClock::new(0.0)))
            .build();
        let now = Instant::now();

        client.begin_handshake(now).unwrap();
        let hello = client.take_unsent().remove(0);
        let server_keys = KeyPair::generate().unwrap();
        let client_key = match ClientPacket::registry().decode_frame(&hello.bytes, None).unwrap() {
            ClientPacket::CryptoHandshakeStart(p) => p.key,
            other => panic!("unexpected {other:?}"),
        };
        let server_box = server_keys.derive(&client_key).unwrap();
        client.handle_packet(CryptoHandshakeResponsePacket { key: server_keys.public_key() }.into(), now);

        client.update_at(0.0, now);
        let login = client.take_unsent().remove(0);
        let decoded = ClientPacket::registry().decode_frame(&login.bytes, Some(&server_box)).unwrap();
        assert_eq!(decoded.name(), "LoginPacket");

        client.handle_packet(
            LoggedInPacket {
                tps: 30,
                special_user_data: SpecialUserData::default(),
                all_roles: Vec::new(),
                secret_key: 1,
            }
            .into(),
            now,
        );
        assert_eq!(client.state(), ConnectionState::Established);
        client.take_unsent();
        client.drain_events();
        client
    }

    #[test]
    fn test_level_data_drives_interpolator() {
        let mut client = logged_in_client(ClientConfig::default());
        let now = Instant::now();

        client.handle_packet(level(vec![player(1, 0.0, 0.0, 0.0)]), now);
        client.handle_packet(level(vec![player(1, 1.0 / 30.0, 10.0, 0.0)]), now);
        assert_eq!(client.server_update_counter(), 2.0);
        assert_eq!(client.drain_events(), vec![GameEvent::PlayerJoined { player_id: 1 }]);

        client.update_at(1.0 / 60.0, now);
        client.update_at(1.0 / 60.0, now);
        let x = client.player_state(1).unwrap().player1.position.x;
        assert!((x - 5.0).abs() < 1e-3, "x = {x}");
        assert!(!client.is_player_stale(1));
    }

    #[test]
    fn test_death_and_staleness_events() {
        let mut client = logged_in_client(ClientConfig::default());
        let now = Instant::now();

        client.handle_packet(level(vec![player(1, 0.0, 0.0, 0.0), player(2, 0.0, 0.0, 0.0)]), now);
        client.handle_packet(level(vec![player(1, 0.1, 0.0, 4.0)]), now);
        client.update_at(0.016, now);

        let events = client.drain_events();
        assert!(events.contains(&GameEvent::PlayerDied { player_id: 1 }));
        assert!(!events.contains(&GameEvent::PlayerDied { player_id: 2 }));
        assert!(client.is_player_stale(2));
        assert!(!client.is_player_stale(1));
    }

    #[test]
    fn test_absent_players_are_evicted() {
        let config = ClientConfig {
            stale_eviction_packets: 2,
            ..Default::default()
        };
        let mut client = logged_in_client(config);
        let now = Instant::now();

        client.handle_packet(level(vec![player(1, 0.0, 0.0, 0.0), player(2, 0.0, 0.0, 0.0)]), now);
        client.handle_packet(level(vec![player(1, 0.1, 0.0, 0.0)]), now);
        assert!(client.player_state(2).is_some());

        client.handle_packet(level(vec![player(1, 0.2, 0.0, 0.0)]), now);
        assert!(client.player_state(2).is_none());
        assert!(client.drain_events().contains(&GameEvent::PlayerLeft { player_id: 2 }));
    }

    #[test]
    fn test_notice_and_disconnect_clear_players() {
        let mut client = logged_in_client(ClientConfig::default());
        let now = Instant::now();

        client.handle_packet(level(vec![player(1, 0.0, 0.0, 0.0)]), now);
        client.handle_packet(ServerNoticePacket { message: "hi".into() }.into(), now);
        assert!(client.drain_events().contains(&GameEvent::ServerNotice { message: "hi".into() }));

        client.disconnect();
        assert!(client.player_state(1).is_none());
        let frames = client.take_unsent();
        assert_eq!(frames.len(), 1);

        client.update_at(0.0, now);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_send_player_data_requires_login() {
        let mut client = ClientBuilder::new(ClientConfig::default()).build();
        assert!(matches!(
            client.send_player_data(PlayerData::default()),
            Err(Error::NotConnected)
        ));

        let mut client = logged_in_client(ClientConfig::default());
        client.send_player_data(PlayerData::default()).unwrap();
        assert_eq!(client.take_unsent()[0].packet_id, 11000);
    }

    #[test]
    fn test_tps_updates_expected_delta() {
        let mut client = ClientBuilder::new(ClientConfig::default())
            .credentials(1, "a", "b")
            .build();
        client.config.interpolation.expected_delta = 0.5;
        client.apply_session_events(vec![SessionEvent::LoggedIn { tps: 60, secret_key: 0 }]);
        assert!((client.interpolator().settings().expected_delta - 1.0 / 60.0).abs() < 1e-7);

        let mut fixed = ClientBuilder::new(ClientConfig::default()).expected_delta(0.25).build();
        fixed.apply_session_events(vec![SessionEvent::LoggedIn { tps: 60, secret_key: 0 }]);
        assert_eq!(fixed.interpolator().settings().expected_delta, 0.25);
    }

    /// Attach a channel pair standing in for the I/O task
    fn attach_channels(client: &mut OverlayClient) -> (mpsc::Sender<ServerPacket>, mpsc::Receiver<OutgoingFrame>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(8);
        let (outbound_tx, outbound_rx) = mpsc::channel(8);
        client.network = Some(NetworkHandle::from_channels(inbound_rx, outbound_tx));
        (inbound_tx, outbound_rx)
    }

    #[test]
    fn test_ban_queued_before_close_is_reported() {
        let mut client = logged_in_client(ClientConfig::default());
        let (inbound, _outbound) = attach_channels(&mut client);
        let now = Instant::now();

        client.update_at(0.0, now);
        assert_eq!(client.state(), ConnectionState::Established);

        inbound
            .try_send(
                ServerBannedPacket {
                    message: "cheating".into(),
                    timestamp: 1_700_000_000,
                }
                .into(),
            )
            .unwrap();
        drop(inbound);

        client.update_at(0.0, now);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(
            client.session().disconnect_reason(),
            Some(&DisconnectReason::Banned {
                message: "cheating".into(),
                timestamp: 1_700_000_000,
            })
        );
        let disconnects: Vec<_> = client
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, GameEvent::Disconnected { .. }))
            .collect();
        assert_eq!(disconnects.len(), 1);
    }

    #[test]
    fn test_bare_close_is_connection_lost() {
        let mut client = logged_in_client(ClientConfig::default());
        let (inbound, _outbound) = attach_channels(&mut client);
        drop(inbound);

        client.update_at(0.0, Instant::now());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.session().disconnect_reason(), Some(&DisconnectReason::ConnectionLost));
        assert!(client.network().is_none());
    }

    #[tokio::test]
    async fn test_connect_blocked_by_protocol_mismatch_opens_nothing() {
        // nothing listens here, so reaching the transport would fail with an I/O error
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut client = ClientBuilder::new(ClientConfig::new(addr)).build();
        let now = Instant::now();
        client.begin_handshake(now).unwrap();
        client.handle_packet(ProtocolMismatchPacket { server_protocol: PROTOCOL_VERSION + 1 }.into(), now);
        assert_eq!(client.state(), ConnectionState::Disconnected);

        assert!(matches!(client.connect().await, Err(Error::ProtocolMismatch { .. })));
        assert!(client.network().is_none());
    }
}
