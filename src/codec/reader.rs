use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};
use super::{MAX_BYTES_LEN, MAX_LIST_LEN, MAX_STRING_LEN};

/// Binary reader for protocol payloads (network byte order)
pub struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        if self.remaining() < 1 {
            return Err(Error::UnexpectedEof);
        }
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(BigEndian::read_u16(self.read_bytes(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(self.read_bytes(4)?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(BigEndian::read_i32(self.read_bytes(4)?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(BigEndian::read_i64(self.read_bytes(8)?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(BigEndian::read_f32(self.read_bytes(4)?))
    }

    /// Read a string (u32 length prefix + UTF-8 bytes)
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        if len > MAX_STRING_LEN {
            return Err(Error::StringTooLong { len, max: MAX_STRING_LEN });
        }
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| Error::InvalidData("invalid UTF-8 string".into()))
    }

    /// Read a byte blob (u32 length prefix + raw bytes)
    pub fn read_byte_vec(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u32()? as usize;
        if len > MAX_BYTES_LEN {
            return Err(Error::BytesTooLong { len, max: MAX_BYTES_LEN });
        }
        Ok(self.read_bytes(len)?.to_vec())
    }

    /// Read a list (u32 element count + elements)
    pub fn read_list<T>(&mut self, mut read_one: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let len = self.read_u32()? as usize;
        if len > MAX_LIST_LEN {
            return Err(Error::ListTooLong { len, max: MAX_LIST_LEN });
        }
        // Every element takes at least one byte, so a count larger than the
        // remaining input is already known to be truncated.
        if len > self.remaining() {
            return Err(Error::UnexpectedEof);
        }
        let mut out = Vec::with_capacity(len);
        for _ in 0..len {
            out.push(read_one(self)?);
        }
        Ok(out)
    }

    /// Read an optional value (bool presence flag + value)
    pub fn read_option<T>(&mut self, read_one: impl FnOnce(&mut Self) -> Result<T>) -> Result<Option<T>> {
        if self.read_bool()? {
            Ok(Some(read_one(self)?))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_primitives() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
        let mut reader = BinaryReader::new(&data);

        assert_eq!(reader.read_u8().unwrap(), 0x01);
        assert_eq!(reader.read_u16().unwrap(), 0x0203);
        assert_eq!(reader.read_u32().unwrap(), 0x04050607);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_read_signed() {
        let data = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE];
        let mut reader = BinaryReader::new(&data);
        assert_eq!(reader.read_i64().unwrap(), -2);
    }

    #[test]
    fn test_read_string() {
        let data = [0x00, 0x00, 0x00, 0x05, b'h', b'e', b'l', b'l', b'o'];
        let mut reader = BinaryReader::new(&data);
        assert_eq!(reader.read_string().unwrap(), "hello");
    }

    #[test]
    fn test_truncated_string() {
        let data = [0x00, 0x00, 0x00, 0x05, b'h', b'e'];
        let mut reader = BinaryReader::new(&data);
        assert!(matches!(reader.read_string(), Err(Error::UnexpectedEof)));
    }

    #[test]
    fn test_oversized_string_rejected_before_body() {
        let data = [0xFF, 0xFF, 0xFF, 0xFF];
        let mut reader = BinaryReader::new(&data);
        assert!(matches!(reader.read_string(), Err(Error::StringTooLong { .. })));
    }

    #[test]
    fn test_oversized_blob_has_its_own_error() {
        let data = (MAX_BYTES_LEN as u32 + 1).to_be_bytes();
        let mut reader = BinaryReader::new(&data);
        assert!(matches!(
            reader.read_byte_vec(),
            Err(Error::BytesTooLong { len, max: MAX_BYTES_LEN }) if len == MAX_BYTES_LEN + 1
        ));
    }

    #[test]
    fn test_list_count_larger_than_input() {
        let data = [0x00, 0x00, 0x01, 0x00, 0x01];
        let mut reader = BinaryReader::new(&data);
        let res = reader.read_list(|r| r.read_u8());
        assert!(matches!(res, Err(Error::UnexpectedEof)));
    }

    #[test]
    fn test_read_option() {
        let data = [0x01, 0x2A, 0x00];
        let mut reader = BinaryReader::new(&data);
        assert_eq!(reader.read_option(|r| r.read_u8()).unwrap(), Some(0x2A));
        assert_eq!(reader.read_option(|r| r.read_u8()).unwrap(), None);
    }
}
