//! The greeting frame Center sends the moment it accepts a socket.
//!
//! It is the only frame without an opcode. The IVs are random per
//! connection; this cluster does not encrypt IS traffic, but workers
//! still read them to stay compatible with the client-facing layout.

use rand::Rng;

use crate::{Packet, PacketReader, ProtocolError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub version: u16,
    pub patch: String,
    pub recv_iv: [u8; 4],
    pub send_iv: [u8; 4],
    pub locale: u8,
}

impl Handshake {
    /// Game version every process in this cluster is built for.
    pub const VERSION: u16 = 12;
    /// Locale byte of the global client.
    pub const LOCALE: u8 = 8;

    /// A greeting with fresh random IVs.
    pub fn random() -> Self {
        let mut rng = rand::rng();
        Self {
            version: Self::VERSION,
            patch: String::new(),
            recv_iv: rng.random(),
            send_iv: rng.random(),
            locale: Self::LOCALE,
        }
    }

    pub fn encode(&self) -> Packet {
        let mut p = Packet::headerless();
        p.write_u16(self.version)
            .write_string(&self.patch)
            .write_bytes(&self.recv_iv)
            .write_bytes(&self.send_iv)
            .write_u8(self.locale);
        p
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = PacketReader::new(bytes);
        Ok(Self {
            version: r.read_u16()?,
            patch: r.read_string()?,
            recv_iv: r.read_array()?,
            send_iv: r.read_array()?,
            locale: r.read_u8()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let hs = Handshake {
            version: 12,
            patch: String::new(),
            recv_iv: [1, 2, 3, 4],
            send_iv: [5, 6, 7, 8],
            locale: 8,
        };

        assert_eq!(
            hs.encode().as_bytes(),
            &[12, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8, 8]
        );
    }

    #[test]
    fn test_decode_reads_back_random_handshake() {
        let hs = Handshake::random();
        assert_eq!(Handshake::decode(hs.encode().as_bytes()).unwrap(), hs);
    }

    #[test]
    fn test_decode_short_frame_fails() {
        assert!(Handshake::decode(&[12, 0, 0]).is_err());
    }
}
