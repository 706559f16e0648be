//! Overlay sync
//!
//! Networked synchronization layer for a multiplayer game overlay: a typed
//! binary packet protocol with an encrypted session handshake, and a
//! client-side engine that turns sparse player samples into smooth per-frame
//! poses.

pub mod codec;
pub mod error;
pub mod protocol;
pub mod interp;
pub mod util;
pub mod client;

pub use error::{Error, Result};
pub use protocol::{
    ClientPacket, ConnectionState, DisconnectReason, GameSession, LoginCredentials,
    PacketRegistry, ServerPacket, SessionConfig, SessionEvent, PROTOCOL_VERSION,
};
pub use codec::{
    AssociatedPlayerData, PlayerData, PlayerIconType, SpecificIconData, VisualPlayerState,
};
pub use interp::{InterpolatorSettings, PlayerInterpolator};
pub use client::{ClientBuilder, ClientConfig, GameEvent, OverlayClient};
