//! The binary packet format shared by every socket in the cluster.
//!
//! A packet is a flat little-endian byte buffer. The first byte is the
//! opcode; everything after it is the payload, read back in the exact
//! order it was written. There are no field tags and no lengths except
//! the ones strings carry, so both sides must agree on the layout of
//! every message.
//!
//! ## Strings
//!
//! Strings start with a 16-bit length. The top bit (`0x8000`) selects
//! the encoding of the bytes that follow:
//!
//! ```text
//! 0x8000 set    → len ^ 0x8000 bytes of UTF-8
//! 0x8000 clear  → len bytes of Latin-1 (one byte per character)
//! ```
//!
//! [`Packet::write_string`] always emits the UTF-8 form;
//! [`Packet::write_latin1_string`] emits the single-byte form for peers
//! that expect it. [`PacketReader::read_string`] accepts both.

use crate::ProtocolError;

/// Flag bit in a string length prefix meaning "payload is UTF-8".
pub const UTF8_FLAG: u16 = 0x8000;

/// Largest string payload, in bytes, that fits in the 15-bit length.
pub const MAX_STRING_LEN: usize = 0x7FFF;

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// An outgoing packet under construction.
///
/// Every `write_*` method returns `&mut Self` so writes can be chained:
///
/// ```rust
/// use wvs_protocol::{Packet, ServerMessage};
///
/// let mut packet = Packet::new(ServerMessage::GuildChat);
/// packet.write_i32(7).write_i32(1001).write_string("hello");
/// assert_eq!(packet.opcode(), Some(ServerMessage::GuildChat as u8));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    buf: Vec<u8>,
}

impl Packet {
    /// Starts a packet with the given opcode as its first byte.
    pub fn new(opcode: impl Into<u8>) -> Self {
        let mut buf = Vec::with_capacity(32);
        buf.push(opcode.into());
        Self { buf }
    }

    /// Starts a packet with no opcode. Used for the connection handshake,
    /// which is the only frame on the wire without one.
    pub fn headerless() -> Self {
        Self::default()
    }

    /// Wraps bytes that already form a packet, opcode included.
    pub fn from_bytes(buf: Vec<u8>) -> Self {
        Self { buf }
    }

    /// The opcode byte, if the packet has one.
    pub fn opcode(&self) -> Option<u8> {
        self.buf.first().copied()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn write_i8(&mut self, value: i8) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Writes `1` for true and `0` for false.
    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.buf.push(u8::from(value));
        self
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_i16(&mut self, value: i16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_u64(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_f64(&mut self, value: f64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Appends raw bytes with no length prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Writes a UTF-8 string with the `0x8000` flag set.
    ///
    /// An empty string is written as a bare `0x0000` length. Strings
    /// longer than [`MAX_STRING_LEN`] bytes are cut at the last character
    /// boundary that fits.
    pub fn write_string(&mut self, value: &str) -> &mut Self {
        if value.is_empty() {
            return self.write_u16(0);
        }
        let mut end = value.len().min(MAX_STRING_LEN);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        let bytes = &value.as_bytes()[..end];
        // `end` is at most 0x7FFF so the cast cannot lose bits.
        self.write_u16(end as u16 | UTF8_FLAG);
        self.write_bytes(bytes)
    }

    /// Writes a Latin-1 string without the flag bit.
    ///
    /// Characters outside `U+0000..=U+00FF` have no Latin-1 byte and are
    /// written as `?`.
    pub fn write_latin1_string(&mut self, value: &str) -> &mut Self {
        let bytes: Vec<u8> = value
            .chars()
            .take(MAX_STRING_LEN)
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect();
        self.write_u16(bytes.len() as u16);
        self.write_bytes(&bytes)
    }

    /// Writes `value` into a zero-padded field of exactly `width` bytes.
    /// Used by fixed-size client structs such as party member names.
    pub fn write_fixed_string(&mut self, value: &str, width: usize) -> &mut Self {
        let bytes = value.as_bytes();
        let take = bytes.len().min(width);
        self.write_bytes(&bytes[..take]);
        self.buf.resize(self.buf.len() + (width - take), 0);
        self
    }
}

impl From<Packet> for Vec<u8> {
    fn from(packet: Packet) -> Self {
        packet.buf
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// A forward-only cursor over a received packet.
///
/// Reads never panic: running out of bytes yields
/// [`ProtocolError::UnexpectedEnd`] and leaves the cursor where it was.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], ProtocolError> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(ProtocolError::UnexpectedEnd { needed, remaining });
        }
        let slice = &self.data[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Reads the opcode byte and maps it into an opcode namespace.
    pub fn read_opcode<T>(&mut self) -> Result<T, ProtocolError>
    where
        T: TryFrom<u8, Error = ProtocolError>,
    {
        let byte = self.read_u8().map_err(|_| ProtocolError::MissingOpcode)?;
        T::try_from(byte)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, ProtocolError> {
        Ok(i8::from_le_bytes(self.take_array()?))
    }

    /// Any non-zero byte is `true`.
    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        Ok(i16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, ProtocolError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        self.take(len)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        self.take_array()
    }

    /// Reads a length-prefixed string in either encoding.
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.read_u16()?;
        if len & UTF8_FLAG != 0 {
            let bytes = self.take(usize::from(len ^ UTF8_FLAG))?;
            String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
        } else {
            // Latin-1 code points are exactly U+0000..=U+00FF.
            let bytes = self.take(usize::from(len))?;
            Ok(bytes.iter().map(|&b| char::from(b)).collect())
        }
    }

    /// Consumes and returns everything after the cursor.
    pub fn read_leftover(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(packet: &Packet) -> PacketReader<'_> {
        PacketReader::new(packet.as_bytes())
    }

    // =====================================================================
    // Integers and booleans
    // =====================================================================

    #[test]
    fn test_write_integers_are_little_endian() {
        let mut p = Packet::headerless();
        p.write_u16(0x1234).write_i32(-2).write_u64(1);

        assert_eq!(
            p.as_bytes(),
            &[0x34, 0x12, 0xFE, 0xFF, 0xFF, 0xFF, 1, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_primitives_round_trip() {
        let mut p = Packet::headerless();
        p.write_u8(0xAB)
            .write_i8(-5)
            .write_bool(true)
            .write_u16(u16::MAX)
            .write_i16(i16::MIN)
            .write_u32(0xDEAD_BEEF)
            .write_i32(i32::MIN)
            .write_u64(u64::MAX)
            .write_i64(-42)
            .write_f64(1.5);

        let mut r = reader(&p);
        assert_eq!(r.read_u8().unwrap(), 0xAB);
        assert_eq!(r.read_i8().unwrap(), -5);
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_u16().unwrap(), u16::MAX);
        assert_eq!(r.read_i16().unwrap(), i16::MIN);
        assert_eq!(r.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.read_i32().unwrap(), i32::MIN);
        assert_eq!(r.read_u64().unwrap(), u64::MAX);
        assert_eq!(r.read_i64().unwrap(), -42);
        assert_eq!(r.read_f64().unwrap(), 1.5);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_read_bool_any_nonzero_is_true() {
        let data = [0u8, 1, 0x7F, 0xFF];
        let mut r = PacketReader::new(&data);
        assert!(!r.read_bool().unwrap());
        assert!(r.read_bool().unwrap());
        assert!(r.read_bool().unwrap());
        assert!(r.read_bool().unwrap());
    }

    #[test]
    fn test_read_past_end_returns_unexpected_end() {
        let data = [1u8, 2, 3];
        let mut r = PacketReader::new(&data);

        let err = r.read_i32().unwrap_err();

        assert_eq!(err, ProtocolError::UnexpectedEnd { needed: 4, remaining: 3 });
        // The failed read must not move the cursor.
        assert_eq!(r.position(), 0);
        assert_eq!(r.read_u16().unwrap(), 0x0201);
    }

    #[test]
    fn test_read_opcode_on_empty_packet_is_missing_opcode() {
        let mut r = PacketReader::new(&[]);
        let err = r.read_opcode::<crate::ClientMessage>().unwrap_err();
        assert_eq!(err, ProtocolError::MissingOpcode);
    }

    // =====================================================================
    // Strings
    // =====================================================================

    #[test]
    fn test_write_string_sets_utf8_flag() {
        let mut p = Packet::headerless();
        p.write_string("héllo");

        // "héllo" is 6 bytes of UTF-8.
        assert_eq!(&p.as_bytes()[..2], &[6, 0x80]);
    }

    #[test]
    fn test_write_empty_string_is_bare_zero_length() {
        let mut p = Packet::headerless();
        p.write_string("");
        assert_eq!(p.as_bytes(), &[0, 0]);

        let mut r = reader(&p);
        assert_eq!(r.read_string().unwrap(), "");
    }

    #[test]
    fn test_read_string_without_flag_decodes_latin1() {
        // 0xE9 is 'é' in Latin-1 but an invalid lone byte in UTF-8.
        let data = [3u8, 0, b'c', b'a', 0xE9];
        let mut r = PacketReader::new(&data);
        assert_eq!(r.read_string().unwrap(), "caé");
    }

    #[test]
    fn test_read_string_with_flag_rejects_bad_utf8() {
        let data = [1u8, 0x80, 0xE9];
        let mut r = PacketReader::new(&data);
        assert_eq!(r.read_string().unwrap_err(), ProtocolError::InvalidUtf8);
    }

    #[test]
    fn test_latin1_string_round_trip_and_replacement() {
        let mut p = Packet::headerless();
        p.write_latin1_string("Zoë€");

        assert_eq!(&p.as_bytes()[..2], &[4, 0], "flag bit must be clear");
        let mut r = reader(&p);
        assert_eq!(r.read_string().unwrap(), "Zoë?");
    }

    #[test]
    fn test_string_boundary_lengths_round_trip() {
        for len in [1usize, 0x7FFE, 0x7FFF] {
            let s = "a".repeat(len);

            let mut utf8 = Packet::headerless();
            utf8.write_string(&s);
            assert_eq!(reader(&utf8).read_string().unwrap(), s, "utf8 len {len}");

            let mut latin1 = Packet::headerless();
            latin1.write_latin1_string(&s);
            assert_eq!(reader(&latin1).read_string().unwrap(), s, "latin1 len {len}");
        }
    }

    #[test]
    fn test_write_string_truncates_on_char_boundary() {
        // 'é' is two bytes, so 0x4000 of them is 0x8000 bytes, one over.
        let s = "é".repeat(0x4000);
        let mut p = Packet::headerless();
        p.write_string(&s);

        let decoded = reader(&p).read_string().unwrap();
        assert_eq!(decoded.len(), 0x7FFE);
        assert!(decoded.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_write_fixed_string_pads_and_truncates() {
        let mut p = Packet::headerless();
        p.write_fixed_string("abc", 5).write_fixed_string("abcdefgh", 4);
        assert_eq!(p.as_bytes(), b"abc\0\0abcd");
    }

    // =====================================================================
    // Leftover bytes
    // =====================================================================

    #[test]
    fn test_read_leftover_consumes_rest() {
        let data = [9u8, 1, 2, 3];
        let mut r = PacketReader::new(&data);
        r.read_u8().unwrap();

        assert_eq!(r.read_leftover(), &[1, 2, 3]);
        assert_eq!(r.remaining(), 0);
        assert!(r.read_leftover().is_empty());
    }
}
