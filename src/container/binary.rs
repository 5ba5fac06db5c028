//! Checked big/little-endian field access over `bytes` buffers.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;

use crate::{
    error::{Error, HeaderError, Result},
    math::get_next_multiple,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

/// Reads fields from a shared buffer. Every read is bounds-checked and fails
/// with [`Error::UnexpectedEof`] rather than panicking.
#[derive(Debug, Clone)]
pub struct ByteReader {
    cursor: Cursor<Bytes>,
    endianness: Endianness,
}

macro_rules! read_fn {
    ($name:ident, $ty:ty, $be:ident, $le:ident) => {
        pub fn $name(&mut self) -> Result<$ty> {
            let endianness = self.endianness;
            let mut field = self.take(std::mem::size_of::<$ty>())?;
            Ok(match endianness {
                Endianness::Big => field.$be(),
                Endianness::Little => field.$le(),
            })
        }
    };
}

impl ByteReader {
    pub fn new(bytes: Bytes, endianness: Endianness) -> Self {
        Self { cursor: Cursor::new(bytes), endianness }
    }

    pub fn len(&self) -> usize {
        self.cursor.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn set_endianness(&mut self, endianness: Endianness) {
        self.endianness = endianness;
    }

    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position > self.len() {
            return Err(Error::UnexpectedEof { offset: position, needed: 0 });
        }
        self.cursor.set_position(position as u64);
        Ok(())
    }

    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.take(count).map(|_| ())
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        let offset = self.position();
        match offset.checked_add(needed) {
            Some(end) if end <= self.len() => Ok(()),
            _ => Err(Error::UnexpectedEof { offset, needed }),
        }
    }

    fn take(&mut self, count: usize) -> Result<&[u8]> {
        self.ensure(count)?;
        let start = self.position();
        self.cursor.set_position((start + count) as u64);
        Ok(&self.cursor.get_ref()[start..start + count])
    }

    /// Zero-copy view of the next `count` bytes.
    pub fn read_bytes(&mut self, count: usize) -> Result<Bytes> {
        self.ensure(count)?;
        let start = self.position();
        self.cursor.set_position((start + count) as u64);
        Ok(self.cursor.get_ref().slice(start..start + count))
    }

    pub fn peek_bytes(&self, count: usize) -> Option<&[u8]> {
        self.cursor.get_ref().get(self.position()..self.position().checked_add(count)?)
    }

    /// Consumes `expected.len()` bytes and fails unless they equal `expected`.
    pub fn expect_magic(&mut self, expected: &[u8]) -> Result<()> {
        let start = self.position();
        let available = self.cursor.get_ref().get(start..).unwrap_or_default();
        let found = &available[..available.len().min(expected.len())];

        if found != expected {
            return Err(HeaderError::bad_magic(expected, found).into());
        }

        self.cursor.set_position((start + expected.len()) as u64);
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    read_fn!(read_u16, u16, get_u16, get_u16_le);
    read_fn!(read_i16, i16, get_i16, get_i16_le);
    read_fn!(read_u32, u32, get_u32, get_u32_le);
    read_fn!(read_i32, i32, get_i32, get_i32_le);

    /// Reads a 32-bit length or offset field.
    pub fn read_offset(&mut self) -> Result<usize> {
        Ok(self.read_u32()? as usize)
    }

    pub fn read_coefficients(&mut self) -> Result<[i16; 16]> {
        let mut coefficients = [0; 16];
        for c in &mut coefficients {
            *c = self.read_i16()?;
        }
        Ok(coefficients)
    }
}

/// Appends fields to a growable buffer.
#[derive(Debug, Clone, Default)]
pub struct ByteWriter {
    buffer: BytesMut,
    endianness: Endianness,
}

macro_rules! write_fn {
    ($name:ident, $ty:ty, $be:ident, $le:ident) => {
        pub fn $name(&mut self, value: $ty) {
            match self.endianness {
                Endianness::Big => self.buffer.$be(value),
                Endianness::Little => self.buffer.$le(value),
            }
        }
    };
}

impl ByteWriter {
    pub fn with_capacity(capacity: usize, endianness: Endianness) -> Self {
        Self { buffer: BytesMut::with_capacity(capacity), endianness }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.put_u8(value);
    }

    write_fn!(write_u16, u16, put_u16, put_u16_le);
    write_fn!(write_i16, i16, put_i16, put_i16_le);
    write_fn!(write_u32, u32, put_u32, put_u32_le);
    write_fn!(write_i32, i32, put_i32, put_i32_le);

    /// Writes a 32-bit length or offset field.
    pub fn write_offset(&mut self, value: usize) {
        self.write_u32(value as u32);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.put_slice(bytes);
    }

    pub fn write_coefficients(&mut self, coefficients: &[i16; 16]) {
        for &c in coefficients {
            self.write_i16(c);
        }
    }

    pub fn write_zeros(&mut self, count: usize) {
        self.buffer.put_bytes(0, count);
    }

    /// Zero-fills up to the next multiple of `alignment`.
    pub fn pad_to(&mut self, alignment: usize) {
        let target = get_next_multiple(self.len(), alignment);
        self.write_zeros(target - self.len());
    }

    /// Zero-fills up to an absolute length.
    pub fn pad_to_len(&mut self, length: usize) {
        if length > self.len() {
            self.write_zeros(length - self.len());
        }
    }

    pub fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_reads_both_endiannesses() {
        let data = Bytes::from_static(&[0x12, 0x34, 0xFF, 0xFE, 0x00, 0x00, 0x01, 0x00]);

        let mut reader = ByteReader::new(data.clone(), Endianness::Big);
        assert_eq!(reader.read_u16().unwrap(), 0x1234);
        assert_eq!(reader.read_i16().unwrap(), -2);
        assert_eq!(reader.read_u32().unwrap(), 0x100);

        let mut reader = ByteReader::new(data, Endianness::Little);
        assert_eq!(reader.read_u16().unwrap(), 0x3412);
        assert_eq!(reader.read_i16().unwrap(), -257);
        assert_eq!(reader.read_u32().unwrap(), 0x10000);
    }

    #[test]
    fn test_read_past_end() {
        let mut reader = ByteReader::new(Bytes::from_static(&[1, 2, 3]), Endianness::Big);
        reader.skip(2).unwrap();
        assert_eq!(reader.read_u16(), Err(Error::UnexpectedEof { offset: 2, needed: 2 }));
        assert_eq!(reader.position(), 2);
        assert!(reader.set_position(4).is_err());
    }

    #[test]
    fn test_magic() {
        let mut reader = ByteReader::new(Bytes::from_static(b"RSTMxx"), Endianness::Big);
        assert!(reader.expect_magic(b"RSTM").is_ok());

        let mut reader = ByteReader::new(Bytes::from_static(b"IDSP"), Endianness::Big);
        assert!(matches!(
            reader.expect_magic(b"RSTM"),
            Err(Error::MalformedHeader(HeaderError::BadMagic { .. }))
        ));

        let mut reader = ByteReader::new(Bytes::from_static(b"RS"), Endianness::Big);
        assert!(matches!(reader.expect_magic(b"RSTM"), Err(Error::MalformedHeader(_))));
    }

    #[test]
    fn test_read_bytes_shares_buffer() {
        let mut reader = ByteReader::new(Bytes::from_static(b"abcdef"), Endianness::Big);
        reader.skip(1).unwrap();
        assert_eq!(&reader.read_bytes(3).unwrap()[..], b"bcd");
        assert_eq!(reader.peek_bytes(2), Some(&b"ef"[..]));
        assert_eq!(reader.peek_bytes(3), None);
    }

    #[test]
    fn test_writer_padding() {
        let mut writer = ByteWriter::with_capacity(0x20, Endianness::Big);
        writer.write_u16(0xFEFF);
        writer.write_i32(-1);
        writer.pad_to(0x20);
        assert_eq!(writer.len(), 0x20);
        writer.pad_to(0x20);
        assert_eq!(writer.len(), 0x20);

        let bytes = writer.into_bytes();
        assert_eq!(&bytes[..6], &[0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(bytes[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_little_endian_writer() {
        let mut writer = ByteWriter::with_capacity(4, Endianness::Little);
        writer.write_u32(0x01020304);
        assert_eq!(&writer.into_bytes()[..], &[4, 3, 2, 1]);
    }
}
