//! Packet definitions.
//!
//! Ids are grouped by origin: 10000-band client connection packets,
//! 11000-band client game packets, 20000-band server connection packets and
//! 21000-band server game packets. Field order below is the wire order.

use crate::codec::{
    AssociatedPlayerData, BinaryReader, BinaryWriter, CryptoPublicKey, Decode, Encode,
    GameServerRole, PlayerData, SpecialUserData,
};
use crate::error::Result;
use super::packet::PacketMetadata;

macro_rules! packet_metadata {
    ($ty:ident, $id:expr, encrypted = $enc:expr, reliable = $rel:expr) => {
        impl PacketMetadata for $ty {
            const PACKET_ID: u16 = $id;
            const ENCRYPTED: bool = $enc;
            const RELIABLE: bool = $rel;
            const NAME: &'static str = stringify!($ty);
        }
    };
}

macro_rules! empty_packet {
    ($ty:ident) => {
        impl Encode for $ty {
            fn encode(&self, _writer: &mut BinaryWriter) {}
        }

        impl Decode for $ty {
            fn decode(_reader: &mut BinaryReader) -> Result<Self> {
                Ok(Self)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// client -> server
// ---------------------------------------------------------------------------

/// 10000
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingPacket {
    pub id: u32,
}

packet_metadata!(PingPacket, 10000, encrypted = false, reliable = false);

impl Encode for PingPacket {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.id);
    }
}

impl Decode for PingPacket {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self { id: reader.read_u32()? })
    }
}

/// 10001 - opens the crypto handshake and announces the client protocol version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoHandshakeStartPacket {
    pub protocol: u16,
    pub key: CryptoPublicKey,
}

packet_metadata!(CryptoHandshakeStartPacket, 10001, encrypted = false, reliable = true);

impl Encode for CryptoHandshakeStartPacket {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_u16(self.protocol);
        self.key.encode(writer);
    }
}

impl Decode for CryptoHandshakeStartPacket {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self {
            protocol: reader.read_u16()?,
            key: CryptoPublicKey::decode(reader)?,
        })
    }
}

/// 10002
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepalivePacket;

packet_metadata!(KeepalivePacket, 10002, encrypted = false, reliable = false);
empty_packet!(KeepalivePacket);

/// 10003 - credentials, only ever sent once the session key exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginPacket {
    pub account_id: i32,
    pub name: String,
    pub token: String,
}

packet_metadata!(LoginPacket, 10003, encrypted = true, reliable = true);

impl Encode for LoginPacket {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_i32(self.account_id);
        writer.write_string(&self.name);
        writer.write_string(&self.token);
    }
}

impl Decode for LoginPacket {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self {
            account_id: reader.read_i32()?,
            name: reader.read_string()?,
            token: reader.read_string()?,
        })
    }
}

/// 10004
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectPacket;

packet_metadata!(DisconnectPacket, 10004, encrypted = false, reliable = true);
empty_packet!(DisconnectPacket);

/// 10005
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepaliveTCPPacket;

packet_metadata!(KeepaliveTCPPacket, 10005, encrypted = false, reliable = true);
empty_packet!(KeepaliveTCPPacket);

/// 10010
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTestPacket {
    pub uid: u32,
    pub data: Vec<u8>,
}

packet_metadata!(ConnectionTestPacket, 10010, encrypted = false, reliable = false);

impl Encode for ConnectionTestPacket {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.uid);
        writer.write_byte_vec(&self.data);
    }
}

impl Decode for ConnectionTestPacket {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self {
            uid: reader.read_u32()?,
            data: reader.read_byte_vec()?,
        })
    }
}

/// 11000 - the local player's own sample
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerDataPacket {
    pub data: PlayerData,
}

packet_metadata!(PlayerDataPacket, 11000, encrypted = false, reliable = false);

impl Encode for PlayerDataPacket {
    fn encode(&self, writer: &mut BinaryWriter) {
        self.data.encode(writer);
    }
}

impl Decode for PlayerDataPacket {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self { data: PlayerData::decode(reader)? })
    }
}

// ---------------------------------------------------------------------------
// server -> client
// ---------------------------------------------------------------------------

/// 20000
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingResponsePacket {
    pub id: u32,
    pub player_count: u32,
}

packet_metadata!(PingResponsePacket, 20000, encrypted = false, reliable = false);

impl Encode for PingResponsePacket {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.id);
        writer.write_u32(self.player_count);
    }
}

impl Decode for PingResponsePacket {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self {
            id: reader.read_u32()?,
            player_count: reader.read_u32()?,
        })
    }
}

/// 20001
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoHandshakeResponsePacket {
    pub key: CryptoPublicKey,
}

packet_metadata!(CryptoHandshakeResponsePacket, 20001, encrypted = false, reliable = false);

impl Encode for CryptoHandshakeResponsePacket {
    fn encode(&self, writer: &mut BinaryWriter) {
        self.key.encode(writer);
    }
}

impl Decode for CryptoHandshakeResponsePacket {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self { key: CryptoPublicKey::decode(reader)? })
    }
}

/// 20002
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepaliveResponsePacket {
    pub player_count: u32,
}

packet_metadata!(KeepaliveResponsePacket, 20002, encrypted = false, reliable = false);

impl Encode for KeepaliveResponsePacket {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.player_count);
    }
}

impl Decode for KeepaliveResponsePacket {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self { player_count: reader.read_u32()? })
    }
}

/// 20003
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDisconnectPacket {
    pub message: String,
}

packet_metadata!(ServerDisconnectPacket, 20003, encrypted = false, reliable = false);

impl Encode for ServerDisconnectPacket {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_string(&self.message);
    }
}

impl Decode for ServerDisconnectPacket {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self { message: reader.read_string()? })
    }
}

/// 20004
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedInPacket {
    pub tps: u32,
    pub special_user_data: SpecialUserData,
    pub all_roles: Vec<GameServerRole>,
    pub secret_key: u32,
}

packet_metadata!(LoggedInPacket, 20004, encrypted = false, reliable = false);

impl Encode for LoggedInPacket {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.tps);
        self.special_user_data.encode(writer);
        writer.write_list(&self.all_roles, |w, role| role.encode(w));
        writer.write_u32(self.secret_key);
    }
}

impl Decode for LoggedInPacket {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self {
            tps: reader.read_u32()?,
            special_user_data: SpecialUserData::decode(reader)?,
            all_roles: reader.read_list(GameServerRole::decode)?,
            secret_key: reader.read_u32()?,
        })
    }
}

/// 20005
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginFailedPacket {
    pub message: String,
}

packet_metadata!(LoginFailedPacket, 20005, encrypted = false, reliable = false);

impl Encode for LoginFailedPacket {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_string(&self.message);
    }
}

impl Decode for LoginFailedPacket {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self { message: reader.read_string()? })
    }
}

/// 20006
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerNoticePacket {
    pub message: String,
}

packet_metadata!(ServerNoticePacket, 20006, encrypted = false, reliable = false);

impl Encode for ServerNoticePacket {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_string(&self.message);
    }
}

impl Decode for ServerNoticePacket {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self { message: reader.read_string()? })
    }
}

/// 20007
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMismatchPacket {
    pub server_protocol: u16,
}

packet_metadata!(ProtocolMismatchPacket, 20007, encrypted = false, reliable = false);

impl Encode for ProtocolMismatchPacket {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_u16(self.server_protocol);
    }
}

impl Decode for ProtocolMismatchPacket {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self { server_protocol: reader.read_u16()? })
    }
}

/// 20008
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepaliveTCPResponsePacket;

packet_metadata!(KeepaliveTCPResponsePacket, 20008, encrypted = false, reliable = false);
empty_packet!(KeepaliveTCPResponsePacket);

/// 20009
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimThreadFailedPacket;

packet_metadata!(ClaimThreadFailedPacket, 20009, encrypted = false, reliable = false);
empty_packet!(ClaimThreadFailedPacket);

/// 20010
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTestResponsePacket {
    pub uid: u32,
    pub data: Vec<u8>,
}

packet_metadata!(ConnectionTestResponsePacket, 20010, encrypted = false, reliable = false);

impl Encode for ConnectionTestResponsePacket {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_u32(self.uid);
        writer.write_byte_vec(&self.data);
    }
}

impl Decode for ConnectionTestResponsePacket {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self {
            uid: reader.read_u32()?,
            data: reader.read_byte_vec()?,
        })
    }
}

/// 20011
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerBannedPacket {
    pub message: String,
    pub timestamp: i64,
}

packet_metadata!(ServerBannedPacket, 20011, encrypted = false, reliable = false);

impl Encode for ServerBannedPacket {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_string(&self.message);
        writer.write_i64(self.timestamp);
    }
}

impl Decode for ServerBannedPacket {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self {
            message: reader.read_string()?,
            timestamp: reader.read_i64()?,
        })
    }
}

/// 20012
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMutedPacket {
    pub reason: String,
    pub timestamp: i64,
}

packet_metadata!(ServerMutedPacket, 20012, encrypted = false, reliable = false);

impl Encode for ServerMutedPacket {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_string(&self.reason);
        writer.write_i64(self.timestamp);
    }
}

impl Decode for ServerMutedPacket {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self {
            reason: reader.read_string()?,
            timestamp: reader.read_i64()?,
        })
    }
}

/// 21000 - samples of every other player in the current level
#[derive(Debug, Clone, PartialEq)]
pub struct LevelDataPacket {
    pub players: Vec<AssociatedPlayerData>,
}

packet_metadata!(LevelDataPacket, 21000, encrypted = false, reliable = false);

impl Encode for LevelDataPacket {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_list(&self.players, |w, p| p.encode(w));
    }
}

impl Decode for LevelDataPacket {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self {
            players: reader.read_list(AssociatedPlayerData::decode)?,
        })
    }
}
