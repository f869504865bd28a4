//! Stream-to-frame reassembly.
//!
//! TCP delivers an unstructured byte stream: one `read` may return half a
//! packet, three packets glued together, or any split in between. The
//! [`Framer`] turns each arbitrary chunk, plus whatever partial frame was
//! carried over from previous chunks, into zero or more complete
//! [`Packet`]s in arrival order.
//!
//! Each framer belongs to exactly one connection; there is no
//! cross-connection state.

use crate::{Packet, ProtocolError};

/// The largest frame a peer may send, length prefix included.
///
/// A declared length pushing a frame past this limit is fatal to the
/// connection: the stream cursor can no longer be trusted.
pub const MAX_FRAME_SIZE: usize = 4096;

/// Per-connection reassembly state.
#[derive(Debug, Default)]
pub struct Framer {
    /// Bytes of an incomplete frame carried over from previous chunks.
    /// May hold fewer than the 4 bytes of the length prefix; the prefix is
    /// only read once at least 4 bytes have accumulated.
    carry: Vec<u8>,
}

impl Framer {
    /// Creates a framer with no carried-over state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one transport chunk and returns every packet it completes.
    ///
    /// An empty chunk is the closed-stream sentinel and yields the synthetic
    /// disconnect notification packet.
    ///
    /// # Errors
    /// - [`ProtocolError::FrameTooLarge`] — a length prefix declared a frame
    ///   beyond [`MAX_FRAME_SIZE`]. No partial packet is emitted.
    /// - [`ProtocolError::Decode`] — a completed frame was too short to hold
    ///   its own header.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Packet>, ProtocolError> {
        if chunk.is_empty() {
            return Ok(vec![Packet::from_bytes(&[])?]);
        }

        self.carry.extend_from_slice(chunk);

        let mut packets = Vec::new();
        let mut cursor = 0;
        while self.carry.len() - cursor >= 4 {
            let prefix: [u8; 4] =
                self.carry[cursor..cursor + 4].try_into().expect("4 bytes");
            let frame_size = i32::from_le_bytes(prefix) as usize + 4;
            if frame_size > MAX_FRAME_SIZE {
                self.carry.clear();
                return Err(ProtocolError::FrameTooLarge {
                    declared: frame_size,
                    max: MAX_FRAME_SIZE,
                });
            }
            if self.carry.len() - cursor < frame_size {
                break;
            }
            packets.push(Packet::from_bytes(
                &self.carry[cursor..cursor + frame_size],
            )?);
            cursor += frame_size;
        }
        self.carry.drain(..cursor);

        Ok(packets)
    }

    /// Returns `true` while a partial frame is waiting for more bytes.
    pub fn has_partial(&self) -> bool {
        !self.carry.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClientId;

    fn frame(name: &str, text: &str) -> Vec<u8> {
        let mut packet = Packet::new(ClientId(1), ClientId::SERVER, name);
        packet.write_string(text);
        packet.write_length();
        packet.to_bytes().to_vec()
    }

    #[test]
    fn test_single_complete_frame() {
        let mut framer = Framer::new();
        let packets = framer.push(&frame("msg", "hi")).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].name(), "msg");
        assert!(!framer.has_partial());
    }

    #[test]
    fn test_coalesced_frames_come_out_in_order() {
        let mut stream = Vec::new();
        for text in ["one", "two", "three"] {
            stream.extend_from_slice(&frame("msg", text));
        }
        let mut framer = Framer::new();
        let mut packets = framer.push(&stream).unwrap();
        assert_eq!(packets.len(), 3);
        let texts: Vec<String> = packets
            .iter_mut()
            .map(|p| p.read_string().unwrap())
            .collect();
        assert_eq!(texts, ["one", "two", "three"]);
        assert!(!framer.has_partial());
    }

    #[test]
    fn test_split_frame_is_carried_over() {
        let bytes = frame("msg", "split me");
        let (head, tail) = bytes.split_at(bytes.len() / 2);

        let mut framer = Framer::new();
        assert!(framer.push(head).unwrap().is_empty());
        assert!(framer.has_partial());
        let packets = framer.push(tail).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].name(), "msg");
    }

    #[test]
    fn test_byte_at_a_time_delivery() {
        let bytes = frame("msg", "drip feed");
        let mut framer = Framer::new();
        let mut packets = Vec::new();
        for byte in &bytes {
            packets.extend(framer.push(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].read_string().unwrap(), "drip feed");
    }

    #[test]
    fn test_carry_shorter_than_length_prefix_keeps_accumulating() {
        // Splits inside the 4-byte length prefix itself, one byte per call.
        let bytes = frame("ping", "");
        let mut framer = Framer::new();
        assert!(framer.push(&bytes[..1]).unwrap().is_empty());
        assert!(framer.push(&bytes[1..2]).unwrap().is_empty());
        assert!(framer.push(&bytes[2..3]).unwrap().is_empty());
        let packets = framer.push(&bytes[3..]).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].name(), "ping");
    }

    #[test]
    fn test_any_split_yields_same_packets_as_whole_stream() {
        let mut stream = Vec::new();
        for i in 0..5 {
            stream.extend_from_slice(&frame("msg", &format!("line {i}")));
        }

        let mut whole = Framer::new();
        let reference: Vec<String> = whole
            .push(&stream)
            .unwrap()
            .iter_mut()
            .map(|p| p.read_string().unwrap())
            .collect();
        assert_eq!(reference.len(), 5);

        for split in 1..stream.len() {
            let mut framer = Framer::new();
            let mut packets = framer.push(&stream[..split]).unwrap();
            packets.extend(framer.push(&stream[split..]).unwrap());
            let texts: Vec<String> = packets
                .iter_mut()
                .map(|p| p.read_string().unwrap())
                .collect();
            assert_eq!(texts, reference, "split at byte {split}");
        }
    }

    #[test]
    fn test_oversize_frame_is_rejected() {
        let declared = (MAX_FRAME_SIZE as i32 + 1).to_le_bytes();
        let mut framer = Framer::new();
        let err = framer.push(&declared).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    }

    #[test]
    fn test_oversize_frame_spanning_chunks_is_rejected() {
        // The poisoned prefix arrives split across two chunks.
        let declared = (MAX_FRAME_SIZE as i32).to_le_bytes();
        let mut framer = Framer::new();
        assert!(framer.push(&declared[..2]).unwrap().is_empty());
        let err = framer.push(&declared[2..]).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    }

    #[test]
    fn test_empty_chunk_is_disconnect_sentinel() {
        let mut framer = Framer::new();
        let packets = framer.push(&[]).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].name(), "disconnect");
        assert_eq!(packets[0].target(), ClientId::SERVER);
    }

    #[test]
    fn test_max_size_frame_is_accepted() {
        let content = MAX_FRAME_SIZE - 4;
        // Header plus filler payload padding out to exactly the limit.
        let mut packet = Packet::new(ClientId(1), ClientId::SERVER, "spam");
        let filler = content - packet.len();
        packet.write_bytes(&vec![0u8; filler]);
        packet.write_length();
        let bytes = packet.to_bytes().to_vec();
        assert_eq!(bytes.len(), MAX_FRAME_SIZE);

        let mut framer = Framer::new();
        let packets = framer.push(&bytes).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].name(), "spam");
    }
}
