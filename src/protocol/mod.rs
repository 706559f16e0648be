pub mod packet;
pub mod message;
pub mod registry;
pub mod crypto;
pub mod connection;
pub mod transport;
pub mod stats;

pub use packet::{
    encode_packet, OutgoingFrame, PacketFlags, PacketHeader, PacketMetadata,
    MAX_PACKET_SIZE, PROTOCOL_VERSION,
};
pub use registry::{ClientPacket, PacketEntry, PacketRegistry, PacketSet, ServerPacket};
pub use crypto::{CryptoBox, KeyPair, SharedCrypto};
pub use connection::{
    ConnectionState, DisconnectReason, GameSession, LoginCredentials, SessionConfig, SessionEvent,
};
pub use transport::{NetworkHandle, TransportConfig};
pub use stats::{PacketLog, PacketLogger, PacketSummary};
