//! # Wireforge
//!
//! A many-client/one-server messaging framework speaking a length-prefixed
//! binary protocol of named, routable packets over TCP.
//!
//! The server assigns each accepted client the lowest free id in
//! `[1, max_clients]`, tracks id ↔ display-name identities, and routes
//! packets by target id — unicast, or broadcast to everyone but the sender.
//! Both sides dispatch inbound packets through a [`HandlerRegistry`] keyed
//! by `(side, message name)`; the built-in catalog covers the connection
//! handshake, chat relay, ping/RTT, and disconnect bookkeeping, and
//! embedders can register handlers for their own message names.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use wireforge::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), WireforgeError> {
//!     let server = Server::new(ServerConfig::default());
//!     let addr = server.start().await?;
//!
//!     let client = Client::new();
//!     client.connect(&addr.to_string(), "alice").await?;
//!     client.send_message(ClientId::BROADCAST, "hello everyone").await?;
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod handler;
mod peer;
mod server;

pub use client::{Client, ClientBuilder, ClientCtx, LinkState};
pub use config::ServerConfig;
pub use error::WireforgeError;
pub use handler::{Handler, HandlerRegistry, Side};
pub use peer::{Peer, PeerCtx};
pub use server::{Server, ServerBuilder};

/// Everything an embedder usually needs, in one import.
pub mod prelude {
    pub use crate::{
        Client, ClientBuilder, ClientCtx, Handler, HandlerRegistry, LinkState,
        Peer, PeerCtx, Server, ServerBuilder, ServerConfig, Side,
        WireforgeError,
    };
    pub use wireforge_protocol::{names, ClientId, Packet, ProtocolError};
    pub use wireforge_session::{IdentityRegistry, SessionError};
    pub use wireforge_transport::TransportError;
}
