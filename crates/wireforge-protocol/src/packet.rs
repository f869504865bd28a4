//! The [`Packet`] type: typed sequential encode/decode over a byte buffer.
//!
//! A packet is either *outgoing* (built with [`Packet::new`], length prefix
//! not yet finalized) or *decoded* (built with [`Packet::from_bytes`], header
//! fields pre-populated and the read cursor parked at the payload start).
//! Finalizing the length prefix with [`Packet::write_length`] is a one-time,
//! idempotent operation.

use std::fmt;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// ClientId
// ---------------------------------------------------------------------------

/// A routable endpoint identifier carried in every packet header.
///
/// Three values are reserved and never assigned to a live connection:
/// [`ClientId::SERVER`], [`ClientId::BROADCAST`], and [`ClientId::NULL`].
/// Real clients receive ids from `1` up to the server's capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u16);

impl ClientId {
    /// The server endpoint itself.
    pub const SERVER: ClientId = ClientId(0);
    /// Fan-out to every connected client.
    pub const BROADCAST: ClientId = ClientId(u16::MAX);
    /// Sentinel meaning "no id assigned (yet)".
    pub const NULL: ClientId = ClientId(u16::MAX - 1);

    /// Returns `true` for the three reserved values.
    pub fn is_reserved(self) -> bool {
        matches!(self, Self::SERVER | Self::BROADCAST | Self::NULL)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SERVER => write!(f, "server"),
            Self::BROADCAST => write!(f, "everyone"),
            Self::NULL => write!(f, "nobody"),
            ClientId(id) => write!(f, "#{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// One named, routable protocol message.
///
/// Header order is fixed: length prefix (added last, read first), sender id,
/// target id, name. Typed writers append little-endian encodings and return
/// `&mut Self` so writes chain:
///
/// ```
/// use wireforge_protocol::{ClientId, Packet};
///
/// let mut packet = Packet::new(ClientId(3), ClientId::SERVER, "query");
/// packet.write_u16(7).write_string("carol");
/// ```
#[derive(Debug, Clone)]
pub struct Packet {
    sender: ClientId,
    target: ClientId,
    name: String,
    buffer: Vec<u8>,
    read_pos: usize,
    /// Byte offset where the payload begins, for [`Packet::rewind`].
    payload_start: usize,
    length_written: bool,
}

impl Packet {
    /// Creates an outgoing packet, immediately writing the sender, target,
    /// and name header fields into the buffer.
    pub fn new(sender: ClientId, target: ClientId, name: &str) -> Self {
        let mut packet = Self {
            sender,
            target,
            name: name.to_string(),
            buffer: Vec::new(),
            read_pos: 0,
            payload_start: 0,
            length_written: false,
        };
        packet.write_u16(sender.0).write_u16(target.0).write_string(name);
        packet.payload_start = packet.buffer.len();
        packet
    }

    /// Decodes a packet from one complete frame.
    ///
    /// Reads and discards the length prefix (a framing artifact), then the
    /// sender id, target id, and name, leaving the read cursor at the start
    /// of the payload.
    ///
    /// An empty input is not a decode failure: it is the sentinel a closed
    /// stream produces, and yields a zero-length `(NULL → SERVER,
    /// "disconnect")` notification packet.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the frame is too short to hold
    /// its own header.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.is_empty() {
            let mut packet =
                Self::new(ClientId::NULL, ClientId::SERVER, crate::names::DISCONNECT);
            // Finalize for real so the header-patching offsets hold and the
            // packet stays a sendable, decodable frame.
            packet.write_length();
            packet.read_pos = packet.payload_start;
            return Ok(packet);
        }

        let mut packet = Self {
            sender: ClientId::NULL,
            target: ClientId::NULL,
            name: String::new(),
            buffer: data.to_vec(),
            read_pos: 0,
            payload_start: 0,
            length_written: true,
        };
        let _length = packet.read_i32()?;
        packet.sender = ClientId(packet.read_u16()?);
        packet.target = ClientId(packet.read_u16()?);
        packet.name = packet.read_string()?;
        packet.payload_start = packet.read_pos;
        Ok(packet)
    }

    // -- Accessors ----------------------------------------------------------

    /// The sender's id.
    pub fn sender(&self) -> ClientId {
        self.sender
    }

    /// The target's id.
    pub fn target(&self) -> ClientId {
        self.target
    }

    /// The name this packet is dispatched under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total byte length of the packet's content so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `true` if the buffer holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of bytes left unread after the cursor.
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// The packet's content as raw bytes, ready for the transport.
    pub fn to_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Moves the read cursor back to the start of the payload.
    pub fn rewind(&mut self) {
        self.read_pos = self.payload_start;
    }

    // -- Header maintenance -------------------------------------------------

    /// Overwrites the sender id, patching the header bytes in place.
    pub fn set_sender(&mut self, sender: ClientId) {
        let offset = if self.length_written { 4 } else { 0 };
        self.buffer[offset..offset + 2].copy_from_slice(&sender.0.to_le_bytes());
        self.sender = sender;
    }

    /// Overwrites the target id, patching the header bytes in place.
    pub fn set_target(&mut self, target: ClientId) {
        let offset = 2 + if self.length_written { 4 } else { 0 };
        self.buffer[offset..offset + 2].copy_from_slice(&target.0.to_le_bytes());
        self.target = target;
    }

    /// Prepends the content length to the buffer. Must run exactly once
    /// before the packet goes on the wire; repeated calls are no-ops.
    pub fn write_length(&mut self) {
        if !self.length_written {
            let length = self.buffer.len() as i32;
            self.buffer.splice(0..0, length.to_le_bytes());
            self.payload_start += 4;
            self.read_pos += 4;
            self.length_written = true;
        }
    }

    // -- Typed writers ------------------------------------------------------

    /// Appends a single byte.
    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buffer.push(value);
        self
    }

    /// Appends raw bytes verbatim.
    pub fn write_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(value);
        self
    }

    /// Appends a little-endian `i16`.
    pub fn write_i16(&mut self, value: i16) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Appends a little-endian `u16`.
    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Appends a little-endian `i32`.
    pub fn write_i32(&mut self, value: i32) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Appends a little-endian `i64`.
    pub fn write_i64(&mut self, value: i64) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Appends a little-endian `f32`.
    pub fn write_f32(&mut self, value: f32) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    /// Appends a bool as one byte, `0` or `1`.
    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u8(u8::from(value))
    }

    /// Appends an `i32` length prefix followed by the string's ASCII bytes.
    ///
    /// The wire format carries ASCII only; non-ASCII input is a caller bug.
    pub fn write_string(&mut self, value: &str) -> &mut Self {
        debug_assert!(value.is_ascii(), "wire strings must be ASCII");
        self.write_i32(value.len() as i32);
        self.write_bytes(value.as_bytes())
    }

    // -- Typed readers ------------------------------------------------------

    /// Copies `N` bytes from the cursor, advancing it only when `advance`.
    fn take<const N: usize>(
        &mut self,
        advance: bool,
        wanted: &'static str,
    ) -> Result<[u8; N], ProtocolError> {
        let end = self.read_pos + N;
        if end > self.buffer.len() {
            return Err(ProtocolError::Decode { wanted });
        }
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.buffer[self.read_pos..end]);
        if advance {
            self.read_pos = end;
        }
        Ok(bytes)
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take::<1>(true, "u8")?[0])
    }

    /// Reads `length` raw bytes.
    pub fn read_bytes(&mut self, length: usize) -> Result<Vec<u8>, ProtocolError> {
        let end = self.read_pos + length;
        if end > self.buffer.len() {
            return Err(ProtocolError::Decode { wanted: "bytes" });
        }
        let bytes = self.buffer[self.read_pos..end].to_vec();
        self.read_pos = end;
        Ok(bytes)
    }

    /// Reads a little-endian `i16`.
    pub fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        Ok(i16::from_le_bytes(self.take(true, "i16")?))
    }

    /// Reads a little-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_le_bytes(self.take(true, "u16")?))
    }

    /// Reads a little-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_le_bytes(self.take(true, "i32")?))
    }

    /// Reads a little-endian `i64`.
    pub fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        Ok(i64::from_le_bytes(self.take(true, "i64")?))
    }

    /// Reads a little-endian `f32`.
    pub fn read_f32(&mut self) -> Result<f32, ProtocolError> {
        Ok(f32::from_le_bytes(self.take(true, "f32")?))
    }

    /// Reads a bool: any non-zero byte is `true`.
    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a length-prefixed ASCII string.
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let length = self.read_i32()?;
        if length < 0 {
            return Err(ProtocolError::Decode { wanted: "string" });
        }
        let bytes = self.read_bytes(length as usize).map_err(|_| {
            ProtocolError::Decode { wanted: "string" }
        })?;
        if !bytes.is_ascii() {
            return Err(ProtocolError::NonAsciiString);
        }
        // ASCII is valid UTF-8.
        Ok(String::from_utf8(bytes).map_err(|_| ProtocolError::NonAsciiString)?)
    }

    /// Reads a single byte without advancing the cursor.
    pub fn peek_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take::<1>(false, "u8")?[0])
    }

    /// Reads a little-endian `u16` without advancing the cursor.
    pub fn peek_u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_le_bytes(self.take(false, "u16")?))
    }

    /// Reads a little-endian `i32` without advancing the cursor.
    pub fn peek_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_le_bytes(self.take(false, "i32")?))
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Packet(\"{}\" {} -> {}, {} bytes)",
            self.name,
            self.sender,
            self.target,
            self.buffer.len()
        )
    }
}
