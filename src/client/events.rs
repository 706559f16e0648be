use crate::interp::PlayerId;
use crate::protocol::ConnectionState;

pub use crate::protocol::DisconnectReason;

/// Events surfaced to the host application
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    /// Session moved to a new state
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// Login accepted
    LoggedIn {
        tps: u32,
        secret_key: u32,
    },

    /// Server-reported number of online players changed
    PlayerCount {
        count: u32,
    },

    /// A remote player appeared in level data
    PlayerJoined {
        player_id: PlayerId,
    },

    /// A remote player stopped appearing in level data
    PlayerLeft {
        player_id: PlayerId,
    },

    /// A remote player died since the last update
    PlayerDied {
        player_id: PlayerId,
    },

    /// Broadcast message from the server
    ServerNotice {
        message: String,
    },

    ConnectionTest {
        uid: u32,
        data: Vec<u8>,
    },

    ClaimThreadFailed,

    /// Session ended
    Disconnected {
        reason: DisconnectReason,
    },
}

/// Event handler trait
pub trait EventHandler {
    fn on_event(&mut self, event: GameEvent);
}

/// Simple event collector
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Vec<GameEvent>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn drain(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Forward everything collected so far to another handler
    pub fn flush_into(&mut self, handler: &mut impl EventHandler) {
        for event in self.drain() {
            handler.on_event(event);
        }
    }
}

impl EventHandler for EventCollector {
    fn on_event(&mut self, event: GameEvent) {
        self.events.push(event);
    }
}
