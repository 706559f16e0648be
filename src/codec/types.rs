use bitflags::bitflags;
use glam::Vec2;

use crate::error::Result;
use super::{BinaryReader, BinaryWriter};

/// Types with a fixed wire layout
pub trait Encode {
    fn encode(&self, writer: &mut BinaryWriter);
}

pub trait Decode: Sized {
    fn decode(reader: &mut BinaryReader) -> Result<Self>;
}

/// Size of an X25519 public key on the wire
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Raw public key material exchanged during the crypto handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CryptoPublicKey(pub [u8; PUBLIC_KEY_SIZE]);

impl CryptoPublicKey {
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }
}

impl Encode for CryptoPublicKey {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_bytes(&self.0);
    }
}

impl Decode for CryptoPublicKey {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self(reader.read_array()?))
    }
}

/// RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Color3 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color3 {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl Encode for Color3 {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_u8(self.r);
        writer.write_u8(self.g);
        writer.write_u8(self.b);
    }
}

impl Decode for Color3 {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self {
            r: reader.read_u8()?,
            g: reader.read_u8()?,
            b: reader.read_u8()?,
        })
    }
}

/// Per-user cosmetic data granted by the server on login
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecialUserData {
    pub name_color: Option<Color3>,
}

impl Encode for SpecialUserData {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_option(self.name_color.as_ref(), |w, c| c.encode(w));
    }
}

impl Decode for SpecialUserData {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self {
            name_color: reader.read_option(Color3::decode)?,
        })
    }
}

/// A moderation/cosmetic role as defined on the server
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerRole {
    pub id: String,
    pub priority: i32,
    pub badge_icon: String,
    pub name_color: String,
    pub chat_color: String,
}

impl Encode for ServerRole {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_string(&self.id);
        writer.write_i32(self.priority);
        writer.write_string(&self.badge_icon);
        writer.write_string(&self.name_color);
        writer.write_string(&self.chat_color);
    }
}

impl Decode for ServerRole {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self {
            id: reader.read_string()?,
            priority: reader.read_i32()?,
            badge_icon: reader.read_string()?,
            name_color: reader.read_string()?,
            chat_color: reader.read_string()?,
        })
    }
}

/// Server role together with the compact id used to reference it in later packets
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameServerRole {
    pub int_id: u8,
    pub role: ServerRole,
}

impl Encode for GameServerRole {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_u8(self.int_id);
        self.role.encode(writer);
    }
}

impl Decode for GameServerRole {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self {
            int_id: reader.read_u8()?,
            role: ServerRole::decode(reader)?,
        })
    }
}

/// Avatar shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PlayerIconType {
    #[default]
    Unknown = 0,
    Cube = 1,
    Ship = 2,
    Ball = 3,
    Ufo = 4,
    Wave = 5,
    Robot = 6,
    Spider = 7,
    Swing = 8,
}

impl PlayerIconType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Cube,
            2 => Self::Ship,
            3 => Self::Ball,
            4 => Self::Ufo,
            5 => Self::Wave,
            6 => Self::Robot,
            7 => Self::Spider,
            8 => Self::Swing,
            _ => Self::Unknown,
        }
    }

    /// Shapes that teleport between floor and ceiling instead of moving there.
    pub fn flips_discontinuously(self) -> bool {
        self == Self::Spider
    }
}

bitflags! {
    /// Boolean state of one icon, packed into a single byte on the wire
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IconFlags: u8 {
        const LOOKING_LEFT = 0x01;
        const UPSIDE_DOWN = 0x02;
        const DASHING = 0x04;
        const MINI = 0x08;
        const VISIBLE = 0x10;
    }
}

/// Visual state of a single icon (one of the two a player may control)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpecificIconData {
    pub position: Vec2,
    pub rotation: f32,
    pub icon_type: PlayerIconType,
    pub is_visible: bool,
    pub is_looking_left: bool,
    pub is_upside_down: bool,
    pub is_dashing: bool,
    pub is_mini: bool,
}

impl SpecificIconData {
    pub fn flags(&self) -> IconFlags {
        let mut flags = IconFlags::empty();
        flags.set(IconFlags::LOOKING_LEFT, self.is_looking_left);
        flags.set(IconFlags::UPSIDE_DOWN, self.is_upside_down);
        flags.set(IconFlags::DASHING, self.is_dashing);
        flags.set(IconFlags::MINI, self.is_mini);
        flags.set(IconFlags::VISIBLE, self.is_visible);
        flags
    }

    pub fn set_flags(&mut self, flags: IconFlags) {
        self.is_looking_left = flags.contains(IconFlags::LOOKING_LEFT);
        self.is_upside_down = flags.contains(IconFlags::UPSIDE_DOWN);
        self.is_dashing = flags.contains(IconFlags::DASHING);
        self.is_mini = flags.contains(IconFlags::MINI);
        self.is_visible = flags.contains(IconFlags::VISIBLE);
    }
}

impl Encode for SpecificIconData {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_f32(self.position.x);
        writer.write_f32(self.position.y);
        writer.write_f32(self.rotation);
        writer.write_u8(self.icon_type as u8);
        writer.write_u8(self.flags().bits());
    }
}

impl Decode for SpecificIconData {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        let x = reader.read_f32()?;
        let y = reader.read_f32()?;
        let rotation = reader.read_f32()?;
        let icon_type = PlayerIconType::from_u8(reader.read_u8()?);
        let flags = IconFlags::from_bits_truncate(reader.read_u8()?);

        let mut icon = Self {
            position: Vec2::new(x, y),
            rotation,
            icon_type,
            ..Default::default()
        };
        icon.set_flags(flags);
        Ok(icon)
    }
}

/// Render-ready pose of a remote player
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VisualPlayerState {
    pub player1: SpecificIconData,
    pub player2: SpecificIconData,
}

/// One authoritative sample of a remote player, as sent by the server
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerData {
    pub timestamp: f32,
    pub player1: SpecificIconData,
    pub player2: SpecificIconData,
    /// Changes value every time the player dies
    pub last_death_timestamp: f32,
}

impl PlayerData {
    pub fn visual(&self) -> VisualPlayerState {
        VisualPlayerState {
            player1: self.player1,
            player2: self.player2,
        }
    }
}

impl Encode for PlayerData {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_f32(self.timestamp);
        self.player1.encode(writer);
        self.player2.encode(writer);
        writer.write_f32(self.last_death_timestamp);
    }
}

impl Decode for PlayerData {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self {
            timestamp: reader.read_f32()?,
            player1: SpecificIconData::decode(reader)?,
            player2: SpecificIconData::decode(reader)?,
            last_death_timestamp: reader.read_f32()?,
        })
    }
}

/// Player sample tagged with the owning account
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AssociatedPlayerData {
    pub account_id: i32,
    pub data: PlayerData,
}

impl Encode for AssociatedPlayerData {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_i32(self.account_id);
        self.data.encode(writer);
    }
}

impl Decode for AssociatedPlayerData {
    fn decode(reader: &mut BinaryReader) -> Result<Self> {
        Ok(Self {
            account_id: reader.read_i32()?,
            data: PlayerData::decode(reader)?,
        })
    }
}
