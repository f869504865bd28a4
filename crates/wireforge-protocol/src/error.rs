//! Error types for the protocol layer.

/// Errors that can occur while encoding, decoding, or framing packets.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A typed read ran past the end of the packet's buffer.
    ///
    /// Indicates a malformed or truncated frame reaching the codec —
    /// this should not happen when the [`Framer`](crate::Framer) is the
    /// one cutting frames out of the stream.
    #[error("not enough bytes to read value of type '{wanted}'")]
    Decode {
        /// The type that was being read when the buffer ran out.
        wanted: &'static str,
    },

    /// A frame declared a length larger than the maximum frame size.
    ///
    /// Fatal to the connection that produced it: the stream cursor can no
    /// longer be trusted, so the only safe reaction is to drop the peer.
    #[error("frame of {declared} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Total frame size the length prefix declared (prefix included).
        declared: usize,
        /// The maximum permitted frame size.
        max: usize,
    },

    /// A string field contained bytes outside the ASCII range.
    #[error("string field is not valid ASCII")]
    NonAsciiString,
}
