//! Transport abstraction layer for Wireforge.
//!
//! Provides the [`Transport`] and [`Connection`] traits that abstract over
//! the byte stream under the protocol layer, plus the TCP implementation
//! ([`TcpTransport`], [`TcpConnection`]).
//!
//! The transport knows nothing about packets: it hands arbitrary byte
//! chunks upward and writes finished frames downward. Reconstructing
//! message boundaries is the protocol layer's job.

#![allow(async_fn_in_trait)]

mod error;
mod tcp;

pub use error::TransportError;
pub use tcp::{TcpConnection, TcpTransport, READ_CHUNK_SIZE};

use std::fmt;

/// Opaque identifier for a transport-level connection.
///
/// Used for log correlation only; protocol-level client ids are assigned
/// by the server after accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;
}

/// A single connection that can send and receive bytes.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends bytes to the remote peer.
    ///
    /// Writes are serialized internally: two tasks sending to the same
    /// connection can never interleave partial frames on the wire.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next chunk of bytes from the remote peer.
    ///
    /// Returns exactly the bytes one read produced — any slice of the
    /// stream. Returns `Ok(None)` when the stream is cleanly closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Closes the connection. The peer observes an end of stream.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
