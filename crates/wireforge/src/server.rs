//! The server: accept loop, fixed-capacity connection table, id
//! assignment, and packet routing.
//!
//! Shared state — the slot table, the assigned-id set, and the identity
//! registry — is mutated from whichever task services an accept or a
//! per-peer dispatch, so all three live under one mutex and can never
//! diverge from each other.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use futures_util::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use wireforge_protocol::{names, ClientId, Packet};
use wireforge_session::IdentityRegistry;
use wireforge_transport::{TcpConnection, TcpTransport, Transport, TransportError};

use crate::handler::{Handler, HandlerRegistry, Side};
use crate::peer::{Peer, PeerCtx};
use crate::{ServerConfig, WireforgeError};

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring a [`Server`] before it starts.
///
/// Comes pre-loaded with the built-in message catalog; `on` registrations
/// are last-writer-wins, so an embedder can override any built-in handler.
pub struct ServerBuilder {
    config: ServerConfig,
    handlers: HandlerRegistry<PeerCtx>,
}

impl ServerBuilder {
    /// Creates a builder with default config and the built-in handlers.
    pub fn new() -> Self {
        let mut handlers = HandlerRegistry::new();
        register_default_handlers(&mut handlers);
        Self {
            config: ServerConfig::default(),
            handlers,
        }
    }

    /// Sets the server configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers (or overrides) a server-side handler for a message name.
    pub fn on(mut self, name: &str, handler: Handler<PeerCtx>) -> Self {
        self.handlers.register(Side::Server, name, handler);
        self
    }

    /// Builds the server. Call [`Server::start`] to begin listening.
    pub fn build(self) -> Server {
        let capacity = self.config.max_clients as usize;
        Server {
            state: Arc::new(ServerState {
                config: self.config,
                open: AtomicBool::new(false),
                local_addr: StdMutex::new(None),
                accept_task: StdMutex::new(None),
                tables: Mutex::new(Tables {
                    // Slot 0 stays empty: ids start at 1.
                    slots: (0..=capacity).map(|_| None).collect(),
                    identities: IdentityRegistry::new(),
                }),
                handlers: self.handlers,
            }),
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// The server: owns the listener, the connection table, and routing.
///
/// Cheap to clone conceptually — all state sits behind an `Arc` — but the
/// public type is deliberately not `Clone`; one owner starts and stops it.
pub struct Server {
    state: Arc<ServerState>,
}

/// Everything the accept loop, receive loops, and handlers share.
pub(crate) struct ServerState {
    pub(crate) config: ServerConfig,
    open: AtomicBool,
    local_addr: StdMutex<Option<SocketAddr>>,
    accept_task: StdMutex<Option<JoinHandle<()>>>,
    pub(crate) tables: Mutex<Tables>,
    handlers: HandlerRegistry<PeerCtx>,
}

/// The mutable tables, guarded together so slot, id, and identity state
/// move in lockstep.
pub(crate) struct Tables {
    /// `slots[id]` holds the peer assigned that id; index 0 is never used.
    slots: Vec<Option<Arc<Peer>>>,
    pub(crate) identities: IdentityRegistry,
}

impl Tables {
    fn occupied(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Every assigned peer, in ascending id order.
    fn assigned_peers(&self) -> Vec<Arc<Peer>> {
        self.slots.iter().flatten().cloned().collect()
    }

    fn peer_by_id(&self, id: ClientId) -> Option<Arc<Peer>> {
        self.slots.get(id.0 as usize)?.clone()
    }
}

impl Server {
    /// Creates a server with the built-in handlers and the given config.
    pub fn new(config: ServerConfig) -> Self {
        ServerBuilder::new().config(config).build()
    }

    /// Returns a builder for customizing handlers before start.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Starts listening and spawns the accept loop.
    ///
    /// Returns the bound address (useful with port `0`).
    ///
    /// # Errors
    /// [`WireforgeError::ServerAlreadyOpen`] if already running; transport
    /// errors if the bind fails.
    pub async fn start(&self) -> Result<SocketAddr, WireforgeError> {
        if self.state.open.swap(true, Ordering::SeqCst) {
            return Err(WireforgeError::ServerAlreadyOpen);
        }
        tracing::info!("starting server...");

        let transport = match TcpTransport::bind(&self.state.config.addr).await {
            Ok(transport) => transport,
            Err(e) => {
                self.state.open.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        let addr = match transport.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                self.state.open.store(false, Ordering::SeqCst);
                return Err(TransportError::AcceptFailed(e).into());
            }
        };

        *self.state.local_addr.lock().expect("addr lock") = Some(addr);
        let task = tokio::spawn(accept_loop(Arc::clone(&self.state), transport));
        *self.state.accept_task.lock().expect("task lock") = Some(task);

        tracing::info!(
            %addr,
            max_clients = self.state.config.max_clients,
            name = %self.state.config.name,
            "server started"
        );
        Ok(addr)
    }

    /// Stops the server: disconnects every client, then closes the
    /// listener.
    pub async fn stop(&self) -> Result<(), WireforgeError> {
        self.state.open_check()?;
        let ids = self.connected_ids().await;
        for id in ids {
            if let Err(e) = self.state.remove_client(id, "The server closed.").await {
                tracing::warn!(%id, error = %e, "failed to disconnect client on stop");
            }
        }
        if let Some(task) = self.state.accept_task.lock().expect("task lock").take() {
            task.abort();
        }
        self.state.open.store(false, Ordering::SeqCst);
        tracing::info!("server stopped");
        Ok(())
    }

    /// Returns `true` while the server is accepting and routing.
    pub fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }

    /// The address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.state.local_addr.lock().expect("addr lock")
    }

    /// The ids of every connected client, ascending.
    pub async fn connected_ids(&self) -> Vec<ClientId> {
        let tables = self.state.tables.lock().await;
        tables.assigned_peers().iter().map(|p| p.id()).collect()
    }

    /// The display name of a connected client.
    pub async fn client_name(&self, id: ClientId) -> Option<String> {
        let tables = self.state.tables.lock().await;
        tables.peer_by_id(id).map(|peer| peer.name())
    }

    /// Disconnects a client: sends it a `disconnect` packet carrying
    /// `reason`, closes its socket, frees its slot, id, and identity, and
    /// broadcasts `clientDisconnect` to everyone remaining.
    pub async fn remove_client(
        &self,
        id: ClientId,
        reason: &str,
    ) -> Result<(), WireforgeError> {
        self.state.remove_client(id, reason).await
    }

    /// Routes a packet to `target`: unicast to an assigned id, or
    /// broadcast to every assigned client except the packet's sender.
    ///
    /// # Errors
    /// [`WireforgeError::ServerTarget`], [`WireforgeError::NullTarget`],
    /// or [`WireforgeError::UnknownTarget`] for unroutable targets.
    pub async fn send_packet(
        &self,
        target: ClientId,
        packet: &mut Packet,
    ) -> Result<(), WireforgeError> {
        self.state.send_packet(target, packet).await
    }

    /// Wraps `text` in a `msg` packet per resolved target.
    pub async fn send_message(
        &self,
        targets: &[ClientId],
        text: &str,
    ) -> Result<(), WireforgeError> {
        self.state.send_message(targets, text).await
    }

    /// Starts an RTT measurement towards every connected client.
    pub async fn ping_all(&self) -> Result<(), WireforgeError> {
        self.state.open_check()?;
        let peers = {
            let tables = self.state.tables.lock().await;
            tables.assigned_peers()
        };
        for peer in peers {
            peer.ping().await?;
        }
        Ok(())
    }
}

impl ServerState {
    fn open_check(&self) -> Result<(), WireforgeError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(WireforgeError::ServerNotOpen)
        }
    }

    pub(crate) async fn remove_client(
        self: &Arc<Self>,
        id: ClientId,
        reason: &str,
    ) -> Result<(), WireforgeError> {
        self.open_check()?;
        let idx = id.0 as usize;
        if idx == 0 || idx >= self.config.max_clients as usize + 1 {
            return Err(WireforgeError::UnknownTarget(id));
        }

        let peer = {
            let mut tables = self.tables.lock().await;
            let Some(peer) = tables.slots[idx].take() else {
                // Already removed: the teardown paths may race (a read
                // failure on a peer we are disconnecting anyway).
                return Ok(());
            };
            tables.identities.remove_id(id);
            peer
        };

        let mut packet = Packet::new(ClientId::SERVER, id, names::DISCONNECT);
        packet.write_string(reason);
        if let Err(e) = peer.send(&mut packet).await {
            tracing::debug!(%id, error = %e, "disconnect notice not delivered");
        }
        peer.close().await;
        tracing::info!(name = %peer.name(), %id, reason, "client removed");

        let mut packet =
            Packet::new(ClientId::SERVER, ClientId::BROADCAST, names::CLIENT_DISCONNECT);
        packet.write_u16(id.0);
        self.send_packet(ClientId::BROADCAST, &mut packet).await
    }

    pub(crate) async fn send_packet(
        &self,
        target: ClientId,
        packet: &mut Packet,
    ) -> Result<(), WireforgeError> {
        match target {
            ClientId::SERVER => Err(WireforgeError::ServerTarget),
            ClientId::NULL => Err(WireforgeError::NullTarget),
            ClientId::BROADCAST => {
                let sender = packet.sender();
                let peers = {
                    let tables = self.tables.lock().await;
                    tables.assigned_peers()
                };
                for peer in peers {
                    if peer.id() == sender {
                        continue;
                    }
                    peer.send(packet).await?;
                }
                Ok(())
            }
            target => {
                let peer = {
                    let tables = self.tables.lock().await;
                    tables.peer_by_id(target)
                }
                .ok_or(WireforgeError::UnknownTarget(target))?;
                peer.send(packet).await
            }
        }
    }

    pub(crate) async fn send_message(
        &self,
        targets: &[ClientId],
        text: &str,
    ) -> Result<(), WireforgeError> {
        self.open_check()?;
        tracing::info!("{text}");
        for &target in targets {
            match target {
                ClientId::NULL => {
                    tracing::error!("the message \"{text}\" targets no client");
                }
                // The server does not message itself.
                ClientId::SERVER => {}
                ClientId::BROADCAST => {
                    let peers = {
                        let tables = self.tables.lock().await;
                        tables.assigned_peers()
                    };
                    for peer in peers {
                        let mut packet =
                            Packet::new(ClientId::SERVER, peer.id(), names::MSG);
                        packet.write_string(text);
                        peer.send(&mut packet).await?;
                    }
                }
                target => {
                    let peer = {
                        let tables = self.tables.lock().await;
                        tables.peer_by_id(target)
                    }
                    .ok_or(WireforgeError::UnknownTarget(target))?;
                    let mut packet = Packet::new(ClientId::SERVER, target, names::MSG);
                    packet.write_string(text);
                    peer.send(&mut packet).await?;
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Accept and receive loops
// ---------------------------------------------------------------------------

async fn accept_loop(state: Arc<ServerState>, mut transport: TcpTransport) {
    loop {
        match transport.accept().await {
            Ok(conn) => {
                tracing::debug!("incoming connection...");
                if let Err(e) = admit(&state, conn).await {
                    tracing::warn!(error = %e, "failed to admit connection");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
            }
        }
    }
}

/// Slots a new connection in, or refuses it when the table is full.
///
/// A refused connection never receives a real id: it exists only long
/// enough to be told why it is being dropped.
async fn admit(
    state: &Arc<ServerState>,
    conn: TcpConnection,
) -> Result<(), WireforgeError> {
    let peer_addr = conn.peer_addr();
    let capacity = state.config.max_clients as usize;

    let mut tables = state.tables.lock().await;
    if tables.occupied() >= capacity {
        drop(tables);
        let reject = Peer::new(conn, ClientId::NULL);
        let mut packet =
            Packet::new(ClientId::SERVER, ClientId::NULL, names::DISCONNECT);
        packet.write_string("Server is already full !");
        reject.send(&mut packet).await?;
        reject.close().await;
        tracing::debug!(%peer_addr, "connection refused: server is already full");
        return Ok(());
    }

    // Lowest free id in [1, capacity]; the occupancy check above
    // guarantees one exists.
    let free = (1..=capacity)
        .find(|&i| tables.slots[i].is_none())
        .expect("occupancy below capacity");
    let id = ClientId(free as u16);
    let peer = Arc::new(Peer::new(conn, id));
    tables.slots[free] = Some(Arc::clone(&peer));
    drop(tables);

    tracing::debug!(%peer_addr, %id, "connected");
    tokio::spawn(receive_loop(Arc::clone(state), peer));
    Ok(())
}

/// One task per peer: read chunks, reassemble frames, dispatch packets.
///
/// The next read is only issued after every packet from the previous chunk
/// has been dispatched, so per-peer handling is strictly sequential.
async fn receive_loop(state: Arc<ServerState>, peer: Arc<Peer>) {
    let ctx = PeerCtx {
        server: Arc::clone(&state),
        peer: Arc::clone(&peer),
    };
    loop {
        match peer.recv().await {
            Ok(Some(chunk)) => {
                if !dispatch_chunk(&state, &ctx, &peer, &chunk).await {
                    break;
                }
                if peer.is_closed() {
                    break;
                }
            }
            Ok(None) => {
                // Clean end of stream: the empty chunk is the disconnect
                // sentinel, so the normal disconnect handler runs.
                dispatch_chunk(&state, &ctx, &peer, &[]).await;
                break;
            }
            Err(_) if peer.is_closed() => break,
            Err(e) => {
                tracing::error!(name = %peer.name(), error = %e, "lost connection");
                if let Err(e) =
                    state.remove_client(peer.id(), "Lost connection.").await
                {
                    tracing::debug!(error = %e, "removal after lost connection failed");
                }
                break;
            }
        }
    }
    tracing::trace!(id = %peer.id(), "receive loop ended");
}

/// Feeds one chunk through the framer and dispatches every completed
/// packet. Returns `false` when the connection must be torn down.
async fn dispatch_chunk(
    state: &Arc<ServerState>,
    ctx: &PeerCtx,
    peer: &Arc<Peer>,
    chunk: &[u8],
) -> bool {
    let packets = {
        let mut framer = peer.framer.lock().await;
        match framer.push(chunk) {
            Ok(packets) => packets,
            Err(e) => {
                // FrameTooLarge or a malformed header: the stream cursor
                // is untrustworthy from here on.
                tracing::error!(name = %peer.name(), error = %e, "framing failed");
                if let Err(e) =
                    state.remove_client(peer.id(), "Malformed data.").await
                {
                    tracing::debug!(error = %e, "removal after framing failure failed");
                }
                return false;
            }
        }
    };
    for mut packet in packets {
        tracing::trace!(name = %peer.name(), %packet, "received packet");
        if let Err(e) =
            state.handlers.dispatch(Side::Server, ctx, &mut packet).await
        {
            // Drop-and-log policy: one bad message does not cost the
            // connection.
            tracing::warn!(name = %peer.name(), error = %e, "packet handler failed");
        }
    }
    true
}

// ---------------------------------------------------------------------------
// Built-in server-side handlers
// ---------------------------------------------------------------------------

fn register_default_handlers(registry: &mut HandlerRegistry<PeerCtx>) {
    registry.register(Side::Server, names::CONNECTED, Box::new(on_connected));
    registry.register(Side::Server, names::DISCONNECT, Box::new(on_disconnect));
    registry.register(Side::Server, names::MSG, Box::new(on_msg));
    registry.register(Side::Server, names::PING, Box::new(on_ping));
    registry.register(Side::Server, names::PING_RETURN, Box::new(on_ping_return));
    registry.register(Side::Server, names::PSEUDO, Box::new(on_pseudo));
    registry.register(
        Side::Server,
        names::ALL_CONNECTION_DATA_RECEIVED,
        Box::new(on_all_connection_data_received),
    );
    registry.register(Side::Server, names::SPAM, Box::new(on_spam));
    registry.register(Side::Server, names::QUERY, Box::new(on_query));
}

fn on_connected<'a>(
    ctx: &'a PeerCtx,
    _packet: &'a mut Packet,
) -> BoxFuture<'a, Result<(), WireforgeError>> {
    Box::pin(async move {
        tracing::debug!(
            "{} connecting to the server with id {}...",
            ctx.client_name(),
            ctx.client_id()
        );
        Ok(())
    })
}

fn on_disconnect<'a>(
    ctx: &'a PeerCtx,
    _packet: &'a mut Packet,
) -> BoxFuture<'a, Result<(), WireforgeError>> {
    Box::pin(async move {
        tracing::info!("{} disconnected.", ctx.client_name());
        ctx.remove(
            "Well it's you who disconnected but if you see this this is not normal :(",
        )
        .await
    })
}

/// Relays a chat line. Broadcasts go to everyone; a unicast is delivered
/// to its target and echoed back to the sender.
fn on_msg<'a>(
    ctx: &'a PeerCtx,
    packet: &'a mut Packet,
) -> BoxFuture<'a, Result<(), WireforgeError>> {
    Box::pin(async move {
        let text = packet.read_string()?;
        if packet.target() == ClientId::BROADCAST {
            ctx.send_message(&[ClientId::BROADCAST], &text).await
        } else {
            ctx.send_message(&[packet.target(), packet.sender()], &text).await
        }
    })
}

/// Answers the prober and forwards peer-to-peer pings onward.
fn on_ping<'a>(
    ctx: &'a PeerCtx,
    packet: &'a mut Packet,
) -> BoxFuture<'a, Result<(), WireforgeError>> {
    Box::pin(async move {
        let mut pong =
            Packet::new(ClientId::SERVER, ctx.client_id(), names::PING_RETURN);
        ctx.reply(&mut pong).await?;
        if packet.target() != ClientId::SERVER {
            ctx.send_packet(packet.target(), packet).await?;
        }
        Ok(())
    })
}

fn on_ping_return<'a>(
    ctx: &'a PeerCtx,
    _packet: &'a mut Packet,
) -> BoxFuture<'a, Result<(), WireforgeError>> {
    Box::pin(async move {
        if let Some(rtt) = ctx.peer().end_ping() {
            tracing::info!(
                "ping to {} returned in {}ms",
                ctx.client_name(),
                rtt.as_millis()
            );
        }
        Ok(())
    })
}

/// The handshake: registers the client's chosen name, then sends it its
/// id, every other client's identity, and the end-of-data marker.
fn on_pseudo<'a>(
    ctx: &'a PeerCtx,
    packet: &'a mut Packet,
) -> BoxFuture<'a, Result<(), WireforgeError>> {
    Box::pin(async move {
        let pseudo = packet.read_string()?;
        let id = ctx.client_id();
        ctx.peer().set_name(&pseudo);

        let accepted = {
            let mut tables = ctx.server.tables.lock().await;
            tables.identities.insert(id, &pseudo)?
        };
        if !accepted {
            tracing::info!(
                "connection of {pseudo} failed: another client with the same name already exist"
            );
            return ctx
                .remove("Another client with the same name already exist.")
                .await;
        }

        let mut your_id = Packet::new(ClientId::SERVER, id, names::YOUR_ID);
        ctx.reply(&mut your_id).await?;

        let others: Vec<(ClientId, String)> = {
            let tables = ctx.server.tables.lock().await;
            tables
                .assigned_peers()
                .iter()
                .filter(|peer| peer.id() != id)
                .map(|peer| (peer.id(), peer.name()))
                .collect()
        };
        for (other_id, other_name) in others {
            let mut id_name = Packet::new(ClientId::SERVER, id, names::ID_NAME);
            id_name.write_u16(other_id.0).write_string(&other_name);
            ctx.reply(&mut id_name).await?;
        }

        let mut done =
            Packet::new(ClientId::SERVER, id, names::ALL_CONNECTION_DATA_SENT);
        ctx.reply(&mut done).await
    })
}

/// The client confirmed the handshake: announce it to everyone.
fn on_all_connection_data_received<'a>(
    ctx: &'a PeerCtx,
    _packet: &'a mut Packet,
) -> BoxFuture<'a, Result<(), WireforgeError>> {
    Box::pin(async move {
        let id = ctx.client_id();
        let name = ctx.client_name();

        let mut id_name =
            Packet::new(ClientId::SERVER, ClientId::BROADCAST, names::ID_NAME);
        id_name.write_u16(id.0).write_string(&name);
        ctx.send_packet(ClientId::BROADCAST, &mut id_name).await?;

        ctx.send_message(
            &[ClientId::BROADCAST],
            &format!("{name} join the Server."),
        )
        .await
    })
}

fn on_spam<'a>(
    ctx: &'a PeerCtx,
    _packet: &'a mut Packet,
) -> BoxFuture<'a, Result<(), WireforgeError>> {
    Box::pin(async move {
        tracing::debug!("spam count: {}", ctx.peer().count_spam());
        Ok(())
    })
}

/// Resolves an id ↔ name query against the identity registry and answers
/// with an `idName` packet, or a diagnostic `msg` when nothing matches.
fn on_query<'a>(
    ctx: &'a PeerCtx,
    packet: &'a mut Packet,
) -> BoxFuture<'a, Result<(), WireforgeError>> {
    Box::pin(async move {
        let id = ClientId(packet.read_u16()?);
        let name = packet.read_string()?;

        let resolved = {
            let tables = ctx.server.tables.lock().await;
            if id != ClientId::NULL {
                tables
                    .identities
                    .name_of(id)
                    .map(|found| (id, found.to_string()))
            } else {
                tables.identities.id_of(&name).map(|found| (found, name.clone()))
            }
        };

        match resolved {
            Some((id, name)) => {
                let mut reply =
                    Packet::new(ClientId::SERVER, ctx.client_id(), names::ID_NAME);
                reply.write_u16(id.0).write_string(&name);
                ctx.reply(&mut reply).await
            }
            None => {
                ctx.send_message(
                    &[ctx.client_id()],
                    &format!("No client matches the query ({id}, \"{name}\")."),
                )
                .await
            }
        }
    })
}
