//! The message catalog: every packet name the built-in handlers speak.
//!
//! Dispatch is keyed by these strings, so both sides must agree on them
//! exactly. Custom embedder messages can use any name that does not collide
//! with this catalog.

/// Peer announces it is starting its connection. Log only.
pub const CONNECTED: &str = "connected";
/// Carries a string reason; sent by either side to end the connection.
pub const DISCONNECT: &str = "disconnect";
/// A chat line: one string of display text.
pub const MSG: &str = "msg";
/// RTT probe. Empty payload.
pub const PING: &str = "ping";
/// Answer to [`PING`]. Empty payload.
pub const PING_RETURN: &str = "pingReturn";
/// Client sends its display name to finish the handshake.
pub const PSEUDO: &str = "pseudo";
/// Server tells a client its assigned id, carried in the target field.
pub const YOUR_ID: &str = "yourId";
/// One `(u16 id, string name)` identity pair.
pub const ID_NAME: &str = "idName";
/// Server has finished sending connection data to a new client.
pub const ALL_CONNECTION_DATA_SENT: &str = "allConnectionDataSent";
/// Client confirms reception of all connection data.
pub const ALL_CONNECTION_DATA_RECEIVED: &str = "allConnectionDataReceived";
/// Broadcast of a freed client id after a disconnect.
pub const CLIENT_DISCONNECT: &str = "clientDisconnect";
/// Empty packet sent in bulk to load-test the framing path.
pub const SPAM: &str = "spam";
/// Client asks the server to resolve an id or a name.
pub const QUERY: &str = "query";
