#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unexpected end of data")]
    UnexpectedEof,

    #[error("string too long: {len} bytes (max {max})")]
    StringTooLong { len: usize, max: usize },

    #[error("byte blob too long: {len} bytes (max {max})")]
    BytesTooLong { len: usize, max: usize },

    #[error("list too long: {len} elements (max {max})")]
    ListTooLong { len: usize, max: usize },

    #[error("unknown packet id: {0}")]
    UnknownPacketId(u16),

    #[error("malformed payload for packet {id}: {reason}")]
    MalformedPayload { id: u16, reason: String },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("encrypted packet {0} received before a session key was established")]
    MissingSessionKey(u16),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: usize },

    #[error("invalid session state: expected {expected}, was {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("protocol version mismatch: server {server}, client {client}")]
    ProtocolMismatch { server: u16, client: u16 },

    #[error("connection timeout")]
    ConnectionTimeout,

    #[error("not connected")]
    NotConnected,

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(String),
}

impl Error {
    /// Errors confined to a single inbound packet. The packet is dropped and
    /// the connection stays up.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedEof
                | Self::StringTooLong { .. }
                | Self::BytesTooLong { .. }
                | Self::ListTooLong { .. }
                | Self::UnknownPacketId(_)
                | Self::MalformedPayload { .. }
                | Self::InvalidData(_)
                | Self::MissingSessionKey(_)
                | Self::Crypto(_)
                | Self::PacketTooLarge { .. }
        )
    }

    /// Attach the packet id to a low-level reader error.
    pub(crate) fn in_packet(self, id: u16) -> Self {
        match self {
            Self::UnexpectedEof => Self::MalformedPayload {
                id,
                reason: "truncated payload".into(),
            },
            Self::StringTooLong { len, max } => Self::MalformedPayload {
                id,
                reason: format!("string too long: {len} bytes (max {max})"),
            },
            Self::BytesTooLong { len, max } => Self::MalformedPayload {
                id,
                reason: format!("byte blob too long: {len} bytes (max {max})"),
            },
            Self::ListTooLong { len, max } => Self::MalformedPayload {
                id,
                reason: format!("list too long: {len} elements (max {max})"),
            },
            Self::InvalidData(reason) => Self::MalformedPayload { id, reason },
            other => other,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_classification() {
        assert!(Error::UnknownPacketId(1).is_decode_error());
        assert!(Error::MissingSessionKey(10003).is_decode_error());
        assert!(!Error::ConnectionTimeout.is_decode_error());
        assert!(!Error::ProtocolMismatch { server: 2, client: 1 }.is_decode_error());
    }

    #[test]
    fn test_in_packet_wraps_reader_errors() {
        match Error::UnexpectedEof.in_packet(20004) {
            Error::MalformedPayload { id, .. } => assert_eq!(id, 20004),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            Error::UnknownPacketId(5).in_packet(7),
            Error::UnknownPacketId(5)
        ));
    }
}
