//! Wire protocol for Wireforge: the packet format and stream framing.
//!
//! This crate defines everything that travels on the wire. A [`Packet`] is
//! one named, routable message:
//!
//! ```text
//! [i32 contentLength][u16 senderId][u16 targetId][i32 nameLength][name][payload...]
//! ```
//!
//! All integers are little-endian. `contentLength` counts every byte after
//! itself (sender id through payload). The [`Framer`] reassembles packets
//! from an unstructured TCP byte stream that may deliver them split or
//! coalesced arbitrarily.
//!
//! # How it fits in the stack
//!
//! ```text
//! Server / Client (above)  ← dispatches packets by name
//!     ↕
//! Protocol Layer (this crate)  ← packet encoding, framing
//!     ↕
//! Transport Layer (below)  ← raw byte chunks over TCP
//! ```

mod error;
mod framer;
pub mod names;
mod packet;

pub use error::ProtocolError;
pub use framer::{Framer, MAX_FRAME_SIZE};
pub use packet::{ClientId, Packet};
