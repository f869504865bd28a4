//! The server-side view of one connected client.
//!
//! A [`Peer`] owns the transport connection, the per-connection [`Framer`],
//! the display name, and the single in-flight RTT stopwatch. Routing and
//! table bookkeeping live in the [`Server`](crate::Server); a peer only
//! knows how to talk to its own socket.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use wireforge_protocol::{names, ClientId, Framer, Packet};
use wireforge_transport::{Connection, TcpConnection};

use crate::server::ServerState;
use crate::WireforgeError;

/// One accepted client, as the server sees it.
pub struct Peer {
    id: ClientId,
    conn: TcpConnection,
    /// Display name; starts as the remote address until the handshake
    /// replaces it with the client's chosen pseudo.
    name: StdMutex<String>,
    pub(crate) framer: Mutex<Framer>,
    /// Start of the in-flight RTT measurement, if any. At most one ping
    /// is outstanding per connection.
    ping_started: StdMutex<Option<Instant>>,
    spam_count: AtomicU32,
    closed: AtomicBool,
}

impl Peer {
    pub(crate) fn new(conn: TcpConnection, id: ClientId) -> Self {
        let name = conn.peer_addr().to_string();
        Self {
            id,
            conn,
            name: StdMutex::new(name),
            framer: Mutex::new(Framer::new()),
            ping_started: StdMutex::new(None),
            spam_count: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// The id this peer was assigned at accept time.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// The peer's current display name.
    pub fn name(&self) -> String {
        self.name.lock().expect("name lock").clone()
    }

    pub(crate) fn set_name(&self, name: &str) {
        *self.name.lock().expect("name lock") = name.to_string();
    }

    /// Finalizes the packet's length prefix and writes it to the socket.
    ///
    /// A no-op once the connection has been closed. Rejects packets whose
    /// target is neither this peer nor broadcast, unless the packet
    /// originates from this peer (it is being relayed onward).
    ///
    /// # Errors
    /// [`WireforgeError::TargetMismatch`] on the consistency check;
    /// transport errors if the write itself fails.
    pub async fn send(&self, packet: &mut Packet) -> Result<(), WireforgeError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        if packet.target() != self.id
            && packet.target() != ClientId::BROADCAST
            && packet.sender() != self.id
        {
            return Err(WireforgeError::TargetMismatch {
                target: packet.target(),
                id: self.id,
            });
        }
        packet.write_length();
        tracing::trace!(peer = %self.id, %packet, "sending packet");
        self.conn.send(packet.to_bytes()).await?;
        Ok(())
    }

    /// Starts an RTT measurement by sending a `ping` packet.
    ///
    /// Refuses to start a second measurement while one is in flight; the
    /// stopwatch stops when the paired `pingReturn` arrives.
    pub async fn ping(&self) -> Result<(), WireforgeError> {
        {
            let mut started = self.ping_started.lock().expect("ping lock");
            if started.is_some() {
                return Ok(());
            }
            *started = Some(Instant::now());
        }
        let mut packet = Packet::new(ClientId::SERVER, self.id, names::PING);
        self.send(&mut packet).await
    }

    /// Stops the RTT stopwatch, returning the elapsed time.
    ///
    /// Returns `None` when no ping was in flight (an unsolicited
    /// `pingReturn`).
    pub fn end_ping(&self) -> Option<Duration> {
        self.ping_started
            .lock()
            .expect("ping lock")
            .take()
            .map(|started| started.elapsed())
    }

    pub(crate) fn count_spam(&self) -> u32 {
        self.spam_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _ = self.conn.close().await;
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) async fn recv(
        &self,
    ) -> Result<Option<Vec<u8>>, wireforge_transport::TransportError> {
        self.conn.recv().await
    }
}

/// Dispatch context handed to every server-side handler: the peer the
/// packet arrived on, plus the server it belongs to.
pub struct PeerCtx {
    pub(crate) server: Arc<ServerState>,
    pub(crate) peer: Arc<Peer>,
}

impl PeerCtx {
    /// The id of the client this packet arrived from.
    pub fn client_id(&self) -> ClientId {
        self.peer.id()
    }

    /// The display name of the client this packet arrived from.
    pub fn client_name(&self) -> String {
        self.peer.name()
    }

    /// The peer connection itself.
    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    /// Sends a packet back to the client this packet arrived from.
    pub async fn reply(&self, packet: &mut Packet) -> Result<(), WireforgeError> {
        self.peer.send(packet).await
    }

    /// Routes a packet through the server (unicast or broadcast).
    pub async fn send_packet(
        &self,
        target: ClientId,
        packet: &mut Packet,
    ) -> Result<(), WireforgeError> {
        self.server.send_packet(target, packet).await
    }

    /// Wraps `text` in `msg` packets for the given targets.
    pub async fn send_message(
        &self,
        targets: &[ClientId],
        text: &str,
    ) -> Result<(), WireforgeError> {
        self.server.send_message(targets, text).await
    }

    /// Disconnects this packet's sender with the given reason.
    pub async fn remove(&self, reason: &str) -> Result<(), WireforgeError> {
        self.server.remove_client(self.peer.id(), reason).await
    }
}
