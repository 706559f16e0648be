use bitflags::bitflags;

use crate::codec::{BinaryReader, BinaryWriter, Encode};
use crate::error::{Error, Result};
use super::crypto::CryptoBox;

/// Protocol version sent in the crypto handshake
pub const PROTOCOL_VERSION: u16 = 2;

/// Maximum frame size (MTU-safe for UDP; TCP frames share the limit)
pub const MAX_PACKET_SIZE: usize = 65536;

/// Static per-type packet properties
pub trait PacketMetadata {
    const PACKET_ID: u16;
    const ENCRYPTED: bool;
    /// Send over the reliable (stream) transport instead of datagrams
    const RELIABLE: bool;
    const NAME: &'static str;

    fn flags() -> PacketFlags {
        PacketFlags::from_static(Self::ENCRYPTED, Self::RELIABLE)
    }
}

bitflags! {
    /// Registry-level flags of a packet type
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u8 {
        const ENCRYPTED = 0x01;
        const RELIABLE = 0x02;
    }
}

impl PacketFlags {
    pub const fn from_static(encrypted: bool, reliable: bool) -> Self {
        let mut bits = 0;
        if encrypted {
            bits |= Self::ENCRYPTED.bits();
        }
        if reliable {
            bits |= Self::RELIABLE.bits();
        }
        Self::from_bits_truncate(bits)
    }

    pub fn encrypted(self) -> bool {
        self.contains(Self::ENCRYPTED)
    }

    pub fn reliable(self) -> bool {
        self.contains(Self::RELIABLE)
    }
}

/// Frame header: `[u16 packet id][u8 encrypted]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub packet_id: u16,
    pub encrypted: bool,
}

impl PacketHeader {
    pub const SIZE: usize = 3;

    pub const fn from_packet<P: PacketMetadata>() -> Self {
        Self {
            packet_id: P::PACKET_ID,
            encrypted: P::ENCRYPTED,
        }
    }

    /// Parse header from raw frame data, returns header and payload start position
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        let mut reader = BinaryReader::new(data);
        let packet_id = reader.read_u16()?;
        let encrypted = reader.read_bool()?;
        Ok((Self { packet_id, encrypted }, reader.position()))
    }

    pub fn write(&self, writer: &mut BinaryWriter) {
        writer.write_u16(self.packet_id);
        writer.write_bool(self.encrypted);
    }
}

/// Encoded frame ready for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFrame {
    pub packet_id: u16,
    pub reliable: bool,
    pub bytes: Vec<u8>,
}

/// Encode header and payload, encrypting the payload when the type asks for it.
pub fn encode_packet<P: PacketMetadata + Encode>(packet: &P, crypto: Option<&CryptoBox>) -> Result<OutgoingFrame> {
    let mut payload = BinaryWriter::new();
    packet.encode(&mut payload);
    let payload = payload.finish().map_err(|e| e.in_packet(P::PACKET_ID))?;
    build_frame(P::PACKET_ID, P::flags(), &payload, crypto)
}

pub(crate) fn build_frame(
    packet_id: u16,
    flags: PacketFlags,
    payload: &[u8],
    crypto: Option<&CryptoBox>,
) -> Result<OutgoingFrame> {
    let mut writer = BinaryWriter::with_capacity(PacketHeader::SIZE + payload.len() + 32);
    PacketHeader {
        packet_id,
        encrypted: flags.encrypted(),
    }
    .write(&mut writer);

    if flags.encrypted() {
        let crypto = crypto.ok_or(Error::MissingSessionKey(packet_id))?;
        writer.write_bytes(&crypto.encrypt(payload)?);
    } else {
        writer.write_bytes(payload);
    }

    if writer.len() > MAX_PACKET_SIZE {
        return Err(Error::PacketTooLarge {
            size: writer.len(),
            max: MAX_PACKET_SIZE,
        });
    }

    Ok(OutgoingFrame {
        packet_id,
        reliable: flags.reliable(),
        bytes: writer.into_vec(),
    })
}
