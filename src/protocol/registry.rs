//! Packet registry.
//!
//! Each direction has a closed enum over its packet payloads and an
//! id-keyed table built once at startup. The table is the only place a
//! packet type becomes decodable; registering an id twice is a programming
//! error and panics during construction.

use std::sync::OnceLock;

use indexmap::IndexMap;

use crate::codec::{BinaryReader, BinaryWriter, Decode, Encode};
use crate::error::{Error, Result};
use super::crypto::CryptoBox;
use super::message::*;
use super::packet::{build_frame, OutgoingFrame, PacketFlags, PacketHeader, PacketMetadata};

/// A closed set of packets travelling in one direction
pub trait PacketSet: Sized + 'static {
    fn id(&self) -> u16;
    fn name(&self) -> &'static str;
    fn flags(&self) -> PacketFlags;
    fn encode_payload(&self, writer: &mut BinaryWriter);

    /// Full frame (header + possibly encrypted payload)
    fn to_frame(&self, crypto: Option<&CryptoBox>) -> Result<OutgoingFrame> {
        let mut payload = BinaryWriter::new();
        self.encode_payload(&mut payload);
        let payload = payload.finish().map_err(|e| e.in_packet(self.id()))?;
        build_frame(self.id(), self.flags(), &payload, crypto)
    }
}

macro_rules! packet_set {
    ($(#[$meta:meta])* $set:ident { $($variant:ident($ty:ident)),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub enum $set {
            $($variant($ty)),+
        }

        impl PacketSet for $set {
            fn id(&self) -> u16 {
                match self {
                    $(Self::$variant(_) => $ty::PACKET_ID),+
                }
            }

            fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => $ty::NAME),+
                }
            }

            fn flags(&self) -> PacketFlags {
                match self {
                    $(Self::$variant(_) => $ty::flags()),+
                }
            }

            fn encode_payload(&self, writer: &mut BinaryWriter) {
                match self {
                    $(Self::$variant(p) => p.encode(writer)),+
                }
            }
        }

        $(
            impl From<$ty> for $set {
                fn from(packet: $ty) -> Self {
                    Self::$variant(packet)
                }
            }
        )+

        impl $set {
            fn build_registry() -> PacketRegistry<Self> {
                let mut registry = PacketRegistry::new();
                $(registry.register::<$ty>();)+
                registry
            }

            /// Process-wide registry for this direction
            pub fn registry() -> &'static PacketRegistry<Self> {
                static REGISTRY: OnceLock<PacketRegistry<$set>> = OnceLock::new();
                REGISTRY.get_or_init(Self::build_registry)
            }
        }
    };
}

packet_set!(
    /// Packets sent by the server, received by the client
    ServerPacket {
        PingResponse(PingResponsePacket),
        CryptoHandshakeResponse(CryptoHandshakeResponsePacket),
        KeepaliveResponse(KeepaliveResponsePacket),
        ServerDisconnect(ServerDisconnectPacket),
        LoggedIn(LoggedInPacket),
        LoginFailed(LoginFailedPacket),
        ServerNotice(ServerNoticePacket),
        ProtocolMismatch(ProtocolMismatchPacket),
        KeepaliveTCPResponse(KeepaliveTCPResponsePacket),
        ClaimThreadFailed(ClaimThreadFailedPacket),
        ConnectionTestResponse(ConnectionTestResponsePacket),
        ServerBanned(ServerBannedPacket),
        ServerMuted(ServerMutedPacket),
        LevelData(LevelDataPacket),
    }
);

packet_set!(
    /// Packets sent by the client, received by the server
    ClientPacket {
        Ping(PingPacket),
        CryptoHandshakeStart(CryptoHandshakeStartPacket),
        Keepalive(KeepalivePacket),
        Login(LoginPacket),
        Disconnect(DisconnectPacket),
        KeepaliveTCP(KeepaliveTCPPacket),
        ConnectionTest(ConnectionTestPacket),
        PlayerData(PlayerDataPacket),
    }
);

type DecodeFn<T> = fn(&mut BinaryReader) -> Result<T>;

/// Registered packet type
pub struct PacketEntry<T> {
    pub id: u16,
    pub name: &'static str,
    pub flags: PacketFlags,
    decode: DecodeFn<T>,
}

impl<T> std::fmt::Debug for PacketEntry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Append-only `id -> (decoder, flags)` table
#[derive(Debug)]
pub struct PacketRegistry<T> {
    entries: IndexMap<u16, PacketEntry<T>>,
}

impl<T: PacketSet> PacketRegistry<T> {
    pub fn new() -> Self {
        Self { entries: IndexMap::new() }
    }

    /// Register a packet type.
    ///
    /// # Panics
    /// If the id is already taken. Two schemas behind one id would make the
    /// wire contract ambiguous.
    pub fn register<P>(&mut self)
    where
        P: PacketMetadata + Decode + Into<T>,
    {
        let entry = PacketEntry {
            id: P::PACKET_ID,
            name: P::NAME,
            flags: P::flags(),
            decode: |reader| P::decode(reader).map(Into::into),
        };

        if let Some(existing) = self.entries.get(&P::PACKET_ID) {
            panic!(
                "packet id {} registered twice ({} and {})",
                P::PACKET_ID,
                existing.name,
                P::NAME
            );
        }
        self.entries.insert(P::PACKET_ID, entry);
    }

    pub fn get(&self, id: u16) -> Option<&PacketEntry<T>> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in registration order
    pub fn iter(&self) -> impl Iterator<Item = &PacketEntry<T>> {
        self.entries.values()
    }

    /// Decode a plaintext payload for the given id.
    pub fn decode(&self, id: u16, payload: &[u8]) -> Result<T> {
        let entry = self.entries.get(&id).ok_or(Error::UnknownPacketId(id))?;

        let mut reader = BinaryReader::new(payload);
        let packet = (entry.decode)(&mut reader).map_err(|e| e.in_packet(id))?;

        if !reader.is_empty() {
            return Err(Error::MalformedPayload {
                id,
                reason: format!("{} trailing bytes", reader.remaining()),
            });
        }
        Ok(packet)
    }

    /// Decode a full frame, decrypting the payload when the header says so.
    pub fn decode_frame(&self, frame: &[u8], crypto: Option<&CryptoBox>) -> Result<T> {
        let (header, payload_start) = PacketHeader::parse(frame).map_err(|_| Error::MalformedPayload {
            id: 0,
            reason: "truncated header".into(),
        })?;
        let id = header.packet_id;
        let entry = self.entries.get(&id).ok_or(Error::UnknownPacketId(id))?;

        if header.encrypted != entry.flags.encrypted() {
            return Err(Error::MalformedPayload {
                id,
                reason: format!(
                    "encryption flag {} does not match registered flag {}",
                    header.encrypted,
                    entry.flags.encrypted()
                ),
            });
        }

        let payload = &frame[payload_start..];
        if header.encrypted {
            let crypto = crypto.ok_or(Error::MissingSessionKey(id))?;
            let plaintext = crypto.decrypt(payload)?;
            self.decode(id, &plaintext)
        } else {
            self.decode(id, payload)
        }
    }
}

impl<T: PacketSet> Default for PacketRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
