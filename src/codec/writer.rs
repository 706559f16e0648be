use crate::error::{Error, Result};
use super::{MAX_BYTES_LEN, MAX_LIST_LEN, MAX_STRING_LEN};

/// Binary writer for protocol payloads (network byte order)
///
/// Writing a string, blob or list above the limits the reader enforces
/// records an error that [`finish`](Self::finish) reports.
pub struct BinaryWriter {
    data: Vec<u8>,
    overflow: Option<Error>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            overflow: None,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// The written bytes, or the first length limit that was exceeded.
    pub fn finish(self) -> Result<Vec<u8>> {
        match self.overflow {
            Some(e) => Err(e),
            None => Ok(self.data),
        }
    }

    fn note_overflow(&mut self, e: Error) {
        if self.overflow.is_none() {
            self.overflow = Some(e);
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write_u8(if v { 1 } else { 0 });
    }

    pub fn write_u16(&mut self, v: u16) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    /// Write a string (u32 length prefix + UTF-8 bytes)
    pub fn write_string(&mut self, s: &str) {
        if s.len() > MAX_STRING_LEN {
            self.note_overflow(Error::StringTooLong { len: s.len(), max: MAX_STRING_LEN });
        }
        self.write_u32(s.len() as u32);
        self.write_bytes(s.as_bytes());
    }

    /// Write a byte blob (u32 length prefix + raw bytes)
    pub fn write_byte_vec(&mut self, bytes: &[u8]) {
        if bytes.len() > MAX_BYTES_LEN {
            self.note_overflow(Error::BytesTooLong { len: bytes.len(), max: MAX_BYTES_LEN });
        }
        self.write_u32(bytes.len() as u32);
        self.write_bytes(bytes);
    }

    /// Write a list (u32 element count + elements)
    pub fn write_list<T>(&mut self, items: &[T], mut write_one: impl FnMut(&mut Self, &T)) {
        if items.len() > MAX_LIST_LEN {
            self.note_overflow(Error::ListTooLong { len: items.len(), max: MAX_LIST_LEN });
        }
        self.write_u32(items.len() as u32);
        for item in items {
            write_one(self, item);
        }
    }

    /// Write an optional value (bool presence flag + value)
    pub fn write_option<T>(&mut self, value: Option<&T>, write_one: impl FnOnce(&mut Self, &T)) {
        match value {
            None => self.write_bool(false),
            Some(v) => {
                self.write_bool(true);
                write_one(self, v);
            }
        }
    }
}

impl Default for BinaryWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl From<BinaryWriter> for Vec<u8> {
    fn from(writer: BinaryWriter) -> Self {
        writer.into_vec()
    }
}
