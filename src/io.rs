//! Sequential Entry Codecs
//!
//! [`EntryReader`] is handed to deserializers over the key or value region of
//! a fetched entry; [`EntryWriter`] is its mirror image for serializers that
//! fill a freshly allocated [`EntryBuf`](crate::EntryBuf).
//!
//! Both are bounds-checked: every fixed-width access either fits entirely in
//! the remaining region or fails with [`DecodeError::EndOfData`] without
//! consuming anything. All multi-byte values are big-endian.
//!
//! Strings use the modified UTF-8 encoding: a 16-bit big-endian byte-length
//! prefix followed by one to three bytes per UTF-16 code unit.
//!
//! | lead byte   | sequence length |
//! |-------------|-----------------|
//! | `0x00-0x7F` | 1               |
//! | `0xC0-0xDF` | 2               |
//! | `0xE0-0xEF` | 3               |
//! | other       | malformed       |
//!
//! Continuation bytes must be in `0x80-0xBF`.

use crate::error::DecodeError;
use bytes::{Buf, BufMut};

/// Sequential, bounds-checked reader over an entry region.
///
/// # Examples
///
/// ```
/// use ohc_segment::io::EntryReader;
///
/// let data = [0x00, 0x2A, 0x00, 0x02, b'h', b'i'];
/// let mut reader = EntryReader::new(&data);
/// assert_eq!(reader.read_i16().unwrap(), 42);
/// assert_eq!(reader.read_utf().unwrap(), "hi");
/// assert_eq!(reader.available(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct EntryReader<'a> {
    buf: &'a [u8],
    len: usize,
}

impl<'a> EntryReader<'a> {
    /// Creates a reader over `region`.
    pub fn new(region: &'a [u8]) -> Self {
        EntryReader {
            buf: region,
            len: region.len(),
        }
    }

    /// Returns the number of bytes left to read.
    #[inline]
    pub fn available(&self) -> usize {
        self.buf.remaining()
    }

    /// Returns the number of bytes consumed so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.len - self.buf.remaining()
    }

    #[inline]
    fn ensure(&self, n: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < n {
            Err(DecodeError::EndOfData)
        } else {
            Ok(())
        }
    }

    /// Fills `dst` completely from the region.
    pub fn read_fully(&mut self, dst: &mut [u8]) -> Result<(), DecodeError> {
        self.ensure(dst.len())?;
        self.buf.copy_to_slice(dst);
        Ok(())
    }

    /// Returns the next `n` bytes without copying them.
    pub fn read_slice(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.ensure(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    /// Skips exactly `n` bytes.
    pub fn skip_bytes(&mut self, n: usize) -> Result<(), DecodeError> {
        self.ensure(n)?;
        self.buf.advance(n);
        Ok(())
    }

    /// Reads a signed byte.
    pub fn read_i8(&mut self) -> Result<i8, DecodeError> {
        self.ensure(1)?;
        Ok(self.buf.get_i8())
    }

    /// Reads an unsigned byte.
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    /// Reads a boolean: any non-zero byte is `true`.
    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a big-endian `i16`.
    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        self.ensure(2)?;
        Ok(self.buf.get_i16())
    }

    /// Reads a big-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    /// Reads one big-endian UTF-16 code unit.
    pub fn read_char_unit(&mut self) -> Result<u16, DecodeError> {
        self.read_u16()
    }

    /// Reads a big-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    /// Reads a big-endian `i64`.
    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    /// Reads a big-endian IEEE 754 single.
    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        self.ensure(4)?;
        Ok(self.buf.get_f32())
    }

    /// Reads a big-endian IEEE 754 double.
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        self.ensure(8)?;
        Ok(self.buf.get_f64())
    }

    /// Reads a length-prefixed modified UTF-8 string.
    ///
    /// The number of characters produced may be smaller than the byte
    /// length prefix.
    pub fn read_utf(&mut self) -> Result<String, DecodeError> {
        let utf_len = usize::from(self.read_u16()?);
        let mut units: Vec<u16> = Vec::with_capacity(utf_len);
        let mut count = 0;

        while count < utf_len {
            let lead = self.read_u8()?;
            match lead >> 4 {
                0..=7 => {
                    count += 1;
                    units.push(u16::from(lead));
                }
                12 | 13 => {
                    count += 2;
                    if count > utf_len {
                        return Err(malformed(count, "partial character at end"));
                    }
                    let b2 = self.read_u8()?;
                    if !is_continuation(b2) {
                        return Err(malformed(count, "bad continuation byte"));
                    }
                    units.push((u16::from(lead & 0x1F) << 6) | u16::from(b2 & 0x3F));
                }
                14 => {
                    count += 3;
                    if count > utf_len {
                        return Err(malformed(count, "partial character at end"));
                    }
                    let b2 = self.read_u8()?;
                    let b3 = self.read_u8()?;
                    if !is_continuation(b2) || !is_continuation(b3) {
                        return Err(malformed(count - 1, "bad continuation byte"));
                    }
                    units.push(
                        (u16::from(lead & 0x0F) << 12)
                            | (u16::from(b2 & 0x3F) << 6)
                            | u16::from(b3 & 0x3F),
                    );
                }
                _ => return Err(malformed(count, "invalid lead byte")),
            }
        }

        String::from_utf16(&units).map_err(|_| malformed(count, "unpaired surrogate"))
    }
}

#[inline]
fn is_continuation(b: u8) -> bool {
    b & 0xC0 == 0x80
}

#[inline]
fn malformed(position: usize, reason: &'static str) -> DecodeError {
    DecodeError::Malformed { position, reason }
}

/// Sequential, bounds-checked writer over an entry region.
///
/// Writes never spill over the region: a value that does not fit fails with
/// [`DecodeError::EndOfData`] and leaves the writer untouched.
#[derive(Debug)]
pub struct EntryWriter<'a> {
    buf: &'a mut [u8],
}

impl<'a> EntryWriter<'a> {
    /// Creates a writer over `region`.
    pub fn new(region: &'a mut [u8]) -> Self {
        EntryWriter { buf: region }
    }

    /// Returns the number of bytes that can still be written.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining_mut()
    }

    #[inline]
    fn ensure(&self, n: usize) -> Result<(), DecodeError> {
        if self.buf.remaining_mut() < n {
            Err(DecodeError::EndOfData)
        } else {
            Ok(())
        }
    }

    /// Writes all of `src`.
    pub fn write_bytes(&mut self, src: &[u8]) -> Result<(), DecodeError> {
        self.ensure(src.len())?;
        self.buf.put_slice(src);
        Ok(())
    }

    /// Writes an unsigned byte.
    pub fn write_u8(&mut self, v: u8) -> Result<(), DecodeError> {
        self.ensure(1)?;
        self.buf.put_u8(v);
        Ok(())
    }

    /// Writes a signed byte.
    pub fn write_i8(&mut self, v: i8) -> Result<(), DecodeError> {
        self.ensure(1)?;
        self.buf.put_i8(v);
        Ok(())
    }

    /// Writes a boolean as `1` or `0`.
    pub fn write_bool(&mut self, v: bool) -> Result<(), DecodeError> {
        self.write_u8(u8::from(v))
    }

    /// Writes a big-endian `i16`.
    pub fn write_i16(&mut self, v: i16) -> Result<(), DecodeError> {
        self.ensure(2)?;
        self.buf.put_i16(v);
        Ok(())
    }

    /// Writes a big-endian `u16`.
    pub fn write_u16(&mut self, v: u16) -> Result<(), DecodeError> {
        self.ensure(2)?;
        self.buf.put_u16(v);
        Ok(())
    }

    /// Writes a big-endian `i32`.
    pub fn write_i32(&mut self, v: i32) -> Result<(), DecodeError> {
        self.ensure(4)?;
        self.buf.put_i32(v);
        Ok(())
    }

    /// Writes a big-endian `i64`.
    pub fn write_i64(&mut self, v: i64) -> Result<(), DecodeError> {
        self.ensure(8)?;
        self.buf.put_i64(v);
        Ok(())
    }

    /// Writes a big-endian IEEE 754 single.
    pub fn write_f32(&mut self, v: f32) -> Result<(), DecodeError> {
        self.ensure(4)?;
        self.buf.put_f32(v);
        Ok(())
    }

    /// Writes a big-endian IEEE 754 double.
    pub fn write_f64(&mut self, v: f64) -> Result<(), DecodeError> {
        self.ensure(8)?;
        self.buf.put_f64(v);
        Ok(())
    }

    /// Writes `s` as a length-prefixed modified UTF-8 string.
    pub fn write_utf(&mut self, s: &str) -> Result<(), DecodeError> {
        let encoded_len = utf_len(s);
        let prefix = u16::try_from(encoded_len)
            .map_err(|_| DecodeError::StringTooLong(encoded_len))?;
        self.ensure(2 + encoded_len)?;

        self.buf.put_u16(prefix);
        for unit in s.encode_utf16() {
            match unit {
                0x0001..=0x007F => self.buf.put_u8(unit as u8),
                0x0000 | 0x0080..=0x07FF => {
                    self.buf.put_u8(0xC0 | ((unit >> 6) & 0x1F) as u8);
                    self.buf.put_u8(0x80 | (unit & 0x3F) as u8);
                }
                _ => {
                    self.buf.put_u8(0xE0 | ((unit >> 12) & 0x0F) as u8);
                    self.buf.put_u8(0x80 | ((unit >> 6) & 0x3F) as u8);
                    self.buf.put_u8(0x80 | (unit & 0x3F) as u8);
                }
            }
        }
        Ok(())
    }
}

/// Returns the encoded length of `s` in modified UTF-8, excluding the prefix.
pub fn utf_len(s: &str) -> usize {
    s.encode_utf16()
        .map(|unit| match unit {
            0x0001..=0x007F => 1,
            0x0000 | 0x0080..=0x07FF => 2,
            _ => 3,
        })
        .sum()
}
