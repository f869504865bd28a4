//! Unified error type for the Wireforge framework.

use wireforge_protocol::{ClientId, ProtocolError};
use wireforge_session::SessionError;
use wireforge_transport::TransportError;

use crate::Side;

/// Top-level error that wraps all crate-specific errors plus the routing
/// and lifecycle failures of the server and client themselves.
///
/// The `#[from]` attribute on each wrapping variant auto-generates `From`
/// impls, so the `?` operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum WireforgeError {
    /// A transport-level error (connect, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (decode, oversized frame).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (duplicate id registration).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A packet arrived whose name has no registered handler.
    ///
    /// Configuration gap, not a wire fault: the dispatching loop decides
    /// whether to drop the packet and continue or tear the connection down.
    #[error("no {side} handler registered for message \"{name}\"")]
    UnknownMessageName {
        /// Which side's table was consulted.
        side: Side,
        /// The unhandled message name.
        name: String,
    },

    /// A server operation was attempted while the server is not running.
    #[error("the server is not open")]
    ServerNotOpen,

    /// `start` was called on a server that is already running.
    #[error("the server is already running")]
    ServerAlreadyOpen,

    /// A packet was routed at the server's own id.
    #[error("cannot route a packet to the server: you are the server")]
    ServerTarget,

    /// A packet was routed at the null sentinel id.
    #[error("cannot route a packet to the null id")]
    NullTarget,

    /// A unicast target is not a currently assigned client id.
    #[error("no connected client with id {0}")]
    UnknownTarget(ClientId),

    /// An outgoing packet failed the per-connection consistency check:
    /// its target is neither this connection's id nor broadcast, and it
    /// does not originate from this connection either.
    #[error("packet target {target} does not match connection id {id}")]
    TargetMismatch {
        /// The packet's declared target.
        target: ClientId,
        /// The connection the send was attempted on.
        id: ClientId,
    },

    /// `connect` was called on a client that is already connected.
    #[error("the client is already connected to a server")]
    AlreadyConnected,

    /// An operation needing a live connection was called before `connect`
    /// or after a disconnect.
    #[error("the client is not connected to a server")]
    NotConnected,
}
