//! Error types for the protocol layer.
//!
//! Each crate in the cluster defines its own error enum. A
//! `ProtocolError` always means "these bytes could not be turned into
//! the message we expected", never a networking or game-rule problem.

/// Errors that can occur while decoding a packet.
///
/// Decoding is strict: the read cursor only moves forward, and asking
/// for more bytes than remain is a hard failure instead of a silent
/// zero. The handler that was parsing the packet aborts and the error
/// is logged at the dispatch boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The packet ended before a value could be read in full.
    ///
    /// `needed` is the width of the value being read, `remaining` is how
    /// many bytes were left after the cursor.
    #[error("unexpected end of packet: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEnd { needed: usize, remaining: usize },

    /// A flagged string did not contain valid UTF-8.
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,

    /// The packet was empty, so there was no opcode byte to read.
    #[error("packet has no opcode")]
    MissingOpcode,

    /// The opcode byte is not part of the expected namespace.
    #[error("unknown opcode 0x{0:02X}")]
    UnknownOpcode(u8),

    /// A field decoded fine but holds a value the protocol does not allow,
    /// e.g. a guild rank of 7.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}
