pub mod reader;
pub mod writer;
pub mod types;

pub use reader::BinaryReader;
pub use writer::BinaryWriter;
pub use types::*;

/// Upper bound for a length-prefixed string
pub const MAX_STRING_LEN: usize = 64 * 1024;
/// Upper bound for a length-prefixed byte blob
pub const MAX_BYTES_LEN: usize = 1024 * 1024;
/// Upper bound for the element count of a list
pub const MAX_LIST_LEN: usize = 4096;
