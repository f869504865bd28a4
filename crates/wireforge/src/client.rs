//! The client: the local endpoint talking to a remote server.
//!
//! A [`Client`] dials the server, runs the connection handshake (send the
//! chosen display name, receive the assigned id and the identity dump,
//! confirm), and then keeps a local [`IdentityRegistry`] mirror up to date
//! from `idName` / `clientDisconnect` traffic.
//!
//! The original callback-chained design becomes plain async: `connect`
//! resolves once the handshake completes, driven by a dedicated receive
//! task.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use tokio::sync::{oneshot, Mutex};
use wireforge_protocol::{names, ClientId, Framer, Packet};
use wireforge_session::IdentityRegistry;
use wireforge_transport::{Connection, TcpConnection, TransportError};

use crate::handler::{Handler, HandlerRegistry, Side};
use crate::WireforgeError;

/// Connection lifecycle of a [`Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Never connected.
    Idle,
    /// Dialing and handshaking.
    Connecting,
    /// Handshake complete; packets flow.
    Connected,
    /// Closed, by either side. Terminal for this connection attempt.
    Disconnected,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a [`Client`] with custom message handlers.
pub struct ClientBuilder {
    handlers: HandlerRegistry<ClientCtx>,
}

impl ClientBuilder {
    /// Creates a builder pre-loaded with the built-in handlers.
    pub fn new() -> Self {
        let mut handlers = HandlerRegistry::new();
        register_default_handlers(&mut handlers);
        Self { handlers }
    }

    /// Registers (or overrides) a client-side handler for a message name.
    pub fn on(mut self, name: &str, handler: Handler<ClientCtx>) -> Self {
        self.handlers.register(Side::Client, name, handler);
        self
    }

    /// Builds the client.
    pub fn build(self) -> Client {
        Client {
            state: Arc::new(ClientState {
                id: StdMutex::new(ClientId::NULL),
                pseudo: StdMutex::new("Guest".to_string()),
                link: StdMutex::new(LinkState::Idle),
                conn: StdMutex::new(None),
                identities: StdMutex::new(IdentityRegistry::new()),
                handlers: self.handlers,
                framer: Mutex::new(Framer::new()),
                ping_started: StdMutex::new(None),
                last_rtt: StdMutex::new(None),
                spam_count: AtomicU32::new(0),
                messages: StdMutex::new(Vec::new()),
                last_disconnect_reason: StdMutex::new(None),
                handshake: StdMutex::new(None),
            }),
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// The client endpoint. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct Client {
    state: Arc<ClientState>,
}

pub(crate) struct ClientState {
    id: StdMutex<ClientId>,
    pseudo: StdMutex<String>,
    link: StdMutex<LinkState>,
    conn: StdMutex<Option<Arc<TcpConnection>>>,
    identities: StdMutex<IdentityRegistry>,
    handlers: HandlerRegistry<ClientCtx>,
    framer: Mutex<Framer>,
    ping_started: StdMutex<Option<Instant>>,
    last_rtt: StdMutex<Option<Duration>>,
    spam_count: AtomicU32,
    /// Chat lines received, oldest first.
    messages: StdMutex<Vec<String>>,
    last_disconnect_reason: StdMutex<Option<String>>,
    /// Pending `connect` waiter; completed by the handshake handler,
    /// dropped on teardown.
    handshake: StdMutex<Option<oneshot::Sender<()>>>,
}

impl Client {
    /// Creates a client with the built-in handlers.
    pub fn new() -> Self {
        ClientBuilder::new().build()
    }

    /// Returns a builder for customizing handlers.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connects to a server and completes the handshake.
    ///
    /// A blank `pseudo` falls back to `"Guest"`. Resolves once the server
    /// has sent the full connection data and this client has confirmed it;
    /// if the server refuses (full, or the name is taken), the error
    /// carries the server's stated reason.
    ///
    /// # Errors
    /// [`WireforgeError::AlreadyConnected`] when already connected;
    /// transport errors when the dial or the handshake fails.
    pub async fn connect(
        &self,
        addr: &str,
        pseudo: &str,
    ) -> Result<(), WireforgeError> {
        {
            let mut link = self.state.link.lock().expect("link lock");
            if *link == LinkState::Connected {
                return Err(WireforgeError::AlreadyConnected);
            }
            *link = LinkState::Connecting;
        }
        let pseudo = if pseudo.trim().is_empty() { "Guest" } else { pseudo };
        *self.state.pseudo.lock().expect("pseudo lock") = pseudo.to_string();

        tracing::info!("starting connection to {addr}...");
        let conn = match TcpConnection::connect(addr).await {
            Ok(conn) => Arc::new(conn),
            Err(e) => {
                *self.state.link.lock().expect("link lock") =
                    LinkState::Disconnected;
                return Err(e.into());
            }
        };
        *self.state.conn.lock().expect("conn lock") = Some(Arc::clone(&conn));

        // A reconnect is a fresh session: nothing learned from the previous
        // connection — assigned id, identity mirror, carried-over frame
        // bytes, an in-flight ping — may leak into this one.
        *self.state.id.lock().expect("id lock") = ClientId::NULL;
        *self.state.identities.lock().expect("identities lock") =
            IdentityRegistry::new();
        *self.state.framer.lock().await = Framer::new();
        *self.state.ping_started.lock().expect("ping lock") = None;
        *self.state.last_disconnect_reason.lock().expect("reason lock") = None;

        let (tx, rx) = oneshot::channel();
        *self.state.handshake.lock().expect("handshake lock") = Some(tx);
        tokio::spawn(receive_loop(Arc::clone(&self.state), conn));
        tracing::info!("connection to server established, waiting for data...");

        // Sending the pseudo finishes our half of the handshake.
        let mut packet =
            Packet::new(self.id(), ClientId::SERVER, names::PSEUDO);
        packet.write_string(pseudo);
        self.send_packet(&mut packet).await?;

        match rx.await {
            Ok(()) => Ok(()),
            Err(_) => {
                let reason = self
                    .last_disconnect_reason()
                    .unwrap_or_else(|| "connection closed during handshake".into());
                Err(TransportError::ConnectionClosed(reason).into())
            }
        }
    }

    /// Disconnects from the server. A no-op when not connected.
    pub async fn disconnect(&self) {
        self.state.teardown().await;
    }

    /// Returns `true` once the handshake has completed and until the
    /// connection closes.
    pub fn is_connected(&self) -> bool {
        self.link_state() == LinkState::Connected
    }

    /// The current lifecycle state.
    pub fn link_state(&self) -> LinkState {
        *self.state.link.lock().expect("link lock")
    }

    /// The id the server assigned; [`ClientId::NULL`] before `yourId`.
    pub fn id(&self) -> ClientId {
        *self.state.id.lock().expect("id lock")
    }

    /// This client's display name.
    pub fn pseudo(&self) -> String {
        self.state.pseudo.lock().expect("pseudo lock").clone()
    }

    /// Finalizes the packet's length prefix and writes it to the server.
    ///
    /// # Errors
    /// [`WireforgeError::NotConnected`] without a live connection.
    pub async fn send_packet(
        &self,
        packet: &mut Packet,
    ) -> Result<(), WireforgeError> {
        self.state.send_packet(packet).await
    }

    /// Sends a chat line, formatted `[pseudo] text`, to the given target.
    pub async fn send_message(
        &self,
        target: ClientId,
        text: &str,
    ) -> Result<(), WireforgeError> {
        let mut packet = Packet::new(self.id(), target, names::MSG);
        packet.write_string(&format!("[{}] {}", self.pseudo(), text));
        self.send_packet(&mut packet).await?;
        tracing::debug!(
            "message sent to {}",
            self.name_of(target).unwrap_or_else(|| target.to_string())
        );
        Ok(())
    }

    /// Asks the server to resolve an identity: by id when `id` is not
    /// [`ClientId::NULL`], otherwise by name. The answer arrives as an
    /// `idName` packet.
    pub async fn query(
        &self,
        id: ClientId,
        name: &str,
    ) -> Result<(), WireforgeError> {
        let mut packet = Packet::new(self.id(), ClientId::SERVER, names::QUERY);
        packet.write_u16(id.0).write_string(name);
        self.send_packet(&mut packet).await
    }

    /// Starts an RTT measurement towards the server.
    pub async fn ping(&self) -> Result<(), WireforgeError> {
        self.ping_to(ClientId::SERVER).await
    }

    /// Starts an RTT measurement towards another client, relayed by the
    /// server. Refuses a second measurement while one is in flight.
    pub async fn ping_to(&self, target: ClientId) -> Result<(), WireforgeError> {
        {
            let mut started =
                self.state.ping_started.lock().expect("ping lock");
            if started.is_some() {
                return Ok(());
            }
            *started = Some(Instant::now());
        }
        let mut packet = Packet::new(self.id(), target, names::PING);
        self.send_packet(&mut packet).await
    }

    /// The most recent round-trip time, if a ping has completed.
    pub fn last_rtt(&self) -> Option<Duration> {
        *self.state.last_rtt.lock().expect("rtt lock")
    }

    /// Every chat line received so far, oldest first.
    pub fn received_messages(&self) -> Vec<String> {
        self.state.messages.lock().expect("messages lock").clone()
    }

    /// The reason string from the last server-sent `disconnect`, if any.
    pub fn last_disconnect_reason(&self) -> Option<String> {
        self.state
            .last_disconnect_reason
            .lock()
            .expect("reason lock")
            .clone()
    }

    /// Looks up a display name in the local identity mirror.
    pub fn name_of(&self, id: ClientId) -> Option<String> {
        self.state
            .identities
            .lock()
            .expect("identities lock")
            .name_of(id)
            .map(str::to_string)
    }

    /// Looks up an id in the local identity mirror.
    pub fn id_of(&self, name: &str) -> Option<ClientId> {
        self.state.identities.lock().expect("identities lock").id_of(name)
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientState {
    fn set_id(&self, id: ClientId) {
        *self.id.lock().expect("id lock") = id;
    }

    fn current_id(&self) -> ClientId {
        *self.id.lock().expect("id lock")
    }

    fn conn(&self) -> Option<Arc<TcpConnection>> {
        self.conn.lock().expect("conn lock").clone()
    }

    fn is_down(&self) -> bool {
        *self.link.lock().expect("link lock") == LinkState::Disconnected
    }

    async fn send_packet(&self, packet: &mut Packet) -> Result<(), WireforgeError> {
        let conn = self.conn().ok_or(WireforgeError::NotConnected)?;
        packet.write_length();
        tracing::trace!(%packet, "sending packet");
        conn.send(packet.to_bytes()).await?;
        Ok(())
    }

    /// Closes the connection and fails any pending `connect` waiter.
    async fn teardown(&self) {
        {
            let mut link = self.link.lock().expect("link lock");
            if *link == LinkState::Disconnected {
                return;
            }
            *link = LinkState::Disconnected;
        }
        // Dropping the sender wakes the connect() waiter with an error.
        self.handshake.lock().expect("handshake lock").take();
        let conn = self.conn.lock().expect("conn lock").take();
        if let Some(conn) = conn {
            let _ = conn.close().await;
        }
    }

    fn end_ping(&self) -> Option<Duration> {
        let rtt = self
            .ping_started
            .lock()
            .expect("ping lock")
            .take()
            .map(|started| started.elapsed())?;
        *self.last_rtt.lock().expect("rtt lock") = Some(rtt);
        Some(rtt)
    }
}

// ---------------------------------------------------------------------------
// Receive loop
// ---------------------------------------------------------------------------

async fn receive_loop(state: Arc<ClientState>, conn: Arc<TcpConnection>) {
    let ctx = ClientCtx {
        client: Arc::clone(&state),
    };
    loop {
        match conn.recv().await {
            Ok(Some(chunk)) => {
                if !dispatch_chunk(&state, &ctx, &chunk).await {
                    break;
                }
                if state.is_down() {
                    break;
                }
            }
            Ok(None) => {
                dispatch_chunk(&state, &ctx, &[]).await;
                break;
            }
            Err(_) if state.is_down() => break,
            Err(e) => {
                tracing::error!(error = %e, "lost connection to server");
                state.teardown().await;
                break;
            }
        }
    }
    tracing::trace!("client receive loop ended");
}

async fn dispatch_chunk(
    state: &Arc<ClientState>,
    ctx: &ClientCtx,
    chunk: &[u8],
) -> bool {
    let packets = {
        let mut framer = state.framer.lock().await;
        match framer.push(chunk) {
            Ok(packets) => packets,
            Err(e) => {
                tracing::error!(error = %e, "framing failed");
                state.teardown().await;
                return false;
            }
        }
    };
    for mut packet in packets {
        tracing::trace!(%packet, "received packet from the server");
        if let Err(e) = state
            .handlers
            .dispatch(Side::Client, ctx, &mut packet)
            .await
        {
            tracing::warn!(error = %e, "packet handler failed");
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Dispatch context and built-in client-side handlers
// ---------------------------------------------------------------------------

/// Dispatch context handed to every client-side handler.
pub struct ClientCtx {
    pub(crate) client: Arc<ClientState>,
}

impl ClientCtx {
    /// This client's assigned id.
    pub fn id(&self) -> ClientId {
        self.client.current_id()
    }

    /// This client's display name.
    pub fn pseudo(&self) -> String {
        self.client.pseudo.lock().expect("pseudo lock").clone()
    }

    /// Sends a packet to the server.
    pub async fn send_packet(
        &self,
        packet: &mut Packet,
    ) -> Result<(), WireforgeError> {
        self.client.send_packet(packet).await
    }

    /// Looks up a display name in the local identity mirror.
    pub fn name_of(&self, id: ClientId) -> Option<String> {
        self.client
            .identities
            .lock()
            .expect("identities lock")
            .name_of(id)
            .map(str::to_string)
    }
}

fn register_default_handlers(registry: &mut HandlerRegistry<ClientCtx>) {
    registry.register(
        Side::Client,
        names::ALL_CONNECTION_DATA_SENT,
        Box::new(on_all_connection_data_sent),
    );
    registry.register(
        Side::Client,
        names::CLIENT_DISCONNECT,
        Box::new(on_client_disconnect),
    );
    registry.register(Side::Client, names::DISCONNECT, Box::new(on_disconnect));
    registry.register(Side::Client, names::ID_NAME, Box::new(on_id_name));
    registry.register(Side::Client, names::MSG, Box::new(on_msg));
    registry.register(Side::Client, names::PING, Box::new(on_ping));
    registry.register(Side::Client, names::PING_RETURN, Box::new(on_ping_return));
    registry.register(Side::Client, names::SPAM, Box::new(on_spam));
    registry.register(Side::Client, names::YOUR_ID, Box::new(on_your_id));
}

/// The server finished sending connection data: confirm, then report the
/// connection as established.
fn on_all_connection_data_sent<'a>(
    ctx: &'a ClientCtx,
    _packet: &'a mut Packet,
) -> BoxFuture<'a, Result<(), WireforgeError>> {
    Box::pin(async move {
        let mut confirm = Packet::new(
            ctx.id(),
            ClientId::SERVER,
            names::ALL_CONNECTION_DATA_RECEIVED,
        );
        ctx.send_packet(&mut confirm).await?;

        tracing::info!("connected successfully to server!");
        *ctx.client.link.lock().expect("link lock") = LinkState::Connected;
        if let Some(tx) =
            ctx.client.handshake.lock().expect("handshake lock").take()
        {
            let _ = tx.send(());
        }
        Ok(())
    })
}

fn on_client_disconnect<'a>(
    ctx: &'a ClientCtx,
    packet: &'a mut Packet,
) -> BoxFuture<'a, Result<(), WireforgeError>> {
    Box::pin(async move {
        let id = ClientId(packet.read_u16()?);
        let name = ctx.name_of(id).unwrap_or_else(|| id.to_string());
        tracing::info!("{name} disconnected.");
        ctx.client
            .identities
            .lock()
            .expect("identities lock")
            .remove_id(id);
        Ok(())
    })
}

fn on_disconnect<'a>(
    ctx: &'a ClientCtx,
    packet: &'a mut Packet,
) -> BoxFuture<'a, Result<(), WireforgeError>> {
    Box::pin(async move {
        // The synthetic end-of-stream packet carries no payload.
        let reason = packet
            .read_string()
            .unwrap_or_else(|_| "Connection closed.".to_string());
        tracing::error!("disconnected by server: {reason}");
        *ctx.client
            .last_disconnect_reason
            .lock()
            .expect("reason lock") = Some(reason);
        ctx.client.teardown().await;
        Ok(())
    })
}

fn on_id_name<'a>(
    ctx: &'a ClientCtx,
    packet: &'a mut Packet,
) -> BoxFuture<'a, Result<(), WireforgeError>> {
    Box::pin(async move {
        let id = ClientId(packet.read_u16()?);
        let name = packet.read_string()?;
        {
            let mut identities =
                ctx.client.identities.lock().expect("identities lock");
            if !identities.contains_id(id) {
                // A taken name here means our mirror is stale; the
                // registry refuses and we keep the older binding.
                let _ = identities.insert(id, &name);
            }
        }
        tracing::debug!("{name} is connected to server with id {id}");
        Ok(())
    })
}

fn on_msg<'a>(
    ctx: &'a ClientCtx,
    packet: &'a mut Packet,
) -> BoxFuture<'a, Result<(), WireforgeError>> {
    Box::pin(async move {
        let text = packet.read_string()?;
        tracing::info!("{text}");
        ctx.client.messages.lock().expect("messages lock").push(text);
        Ok(())
    })
}

/// Only the server may probe us directly.
fn on_ping<'a>(
    ctx: &'a ClientCtx,
    packet: &'a mut Packet,
) -> BoxFuture<'a, Result<(), WireforgeError>> {
    Box::pin(async move {
        if packet.sender() == ClientId::SERVER {
            let mut pong =
                Packet::new(ctx.id(), ClientId::SERVER, names::PING_RETURN);
            ctx.send_packet(&mut pong).await?;
        }
        Ok(())
    })
}

fn on_ping_return<'a>(
    ctx: &'a ClientCtx,
    _packet: &'a mut Packet,
) -> BoxFuture<'a, Result<(), WireforgeError>> {
    Box::pin(async move {
        if let Some(rtt) = ctx.client.end_ping() {
            tracing::info!("ping returned in {}ms", rtt.as_millis());
        }
        Ok(())
    })
}

fn on_spam<'a>(
    ctx: &'a ClientCtx,
    _packet: &'a mut Packet,
) -> BoxFuture<'a, Result<(), WireforgeError>> {
    Box::pin(async move {
        let count = ctx.client.spam_count.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!("spam count: {count}");
        Ok(())
    })
}

/// The id is carried in the target field: this packet was addressed to the
/// id we just became.
fn on_your_id<'a>(
    ctx: &'a ClientCtx,
    packet: &'a mut Packet,
) -> BoxFuture<'a, Result<(), WireforgeError>> {
    Box::pin(async move {
        ctx.client.set_id(packet.target());
        tracing::debug!("your assigned id: {}", packet.target());
        Ok(())
    })
}
