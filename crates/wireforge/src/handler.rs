//! Name-keyed handler dispatch.
//!
//! Inbound packets are routed by `(side, message name)` to an async handler.
//! The registry is an explicit value owned by the server or client that uses
//! it — never a process-global table — so several independent endpoints can
//! run in one process with different catalogs.

use std::collections::HashMap;
use std::fmt;

use futures_util::future::BoxFuture;
use wireforge_protocol::Packet;

use crate::WireforgeError;

/// Which role a handler table (or a dispatch) applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Handlers run by the server for packets from its peers.
    Server,
    /// Handlers run by a client for packets from the server.
    Client,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Server => write!(f, "server"),
            Side::Client => write!(f, "client"),
        }
    }
}

/// An async packet handler over some dispatch context `Ctx`.
///
/// Handlers are written as plain functions returning a [`BoxFuture`]:
///
/// ```rust,ignore
/// fn on_ping<'a>(
///     ctx: &'a PeerCtx,
///     packet: &'a mut Packet,
/// ) -> BoxFuture<'a, Result<(), WireforgeError>> {
///     Box::pin(async move { ctx.reply(&mut pong(ctx)).await })
/// }
/// ```
pub type Handler<Ctx> = Box<
    dyn for<'a> Fn(
            &'a Ctx,
            &'a mut Packet,
        ) -> BoxFuture<'a, Result<(), WireforgeError>>
        + Send
        + Sync,
>;

/// Two independently keyed tables, one per [`Side`], each mapping message
/// name → handler.
///
/// Registration is last-writer-wins: registering a name twice replaces the
/// earlier handler, which lets embedders override any built-in behavior at
/// startup.
pub struct HandlerRegistry<Ctx> {
    tables: HashMap<Side, HashMap<String, Handler<Ctx>>>,
}

impl<Ctx> HandlerRegistry<Ctx> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        let mut tables = HashMap::new();
        tables.insert(Side::Server, HashMap::new());
        tables.insert(Side::Client, HashMap::new());
        Self { tables }
    }

    /// Registers (or replaces) the handler for `(side, name)`.
    pub fn register(&mut self, side: Side, name: &str, handler: Handler<Ctx>) {
        self.tables
            .entry(side)
            .or_default()
            .insert(name.to_string(), handler);
    }

    /// Returns `true` if a handler is registered for `(side, name)`.
    pub fn contains(&self, side: Side, name: &str) -> bool {
        self.tables
            .get(&side)
            .is_some_and(|table| table.contains_key(name))
    }

    /// Dispatches a decoded packet to its handler.
    ///
    /// # Errors
    /// Returns [`WireforgeError::UnknownMessageName`] when no handler is
    /// registered — a configuration gap. The registry does not retry or
    /// fall back; the caller decides between drop-and-log and teardown.
    pub async fn dispatch(
        &self,
        side: Side,
        ctx: &Ctx,
        packet: &mut Packet,
    ) -> Result<(), WireforgeError> {
        let name = packet.name().to_string();
        match self.tables.get(&side).and_then(|table| table.get(&name)) {
            Some(handler) => handler(ctx, packet).await,
            None => Err(WireforgeError::UnknownMessageName { side, name }),
        }
    }
}

impl<Ctx> Default for HandlerRegistry<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wireforge_protocol::ClientId;

    struct Counters {
        hits: AtomicU32,
    }

    fn add_one<'a>(
        ctx: &'a Counters,
        _packet: &'a mut Packet,
    ) -> BoxFuture<'a, Result<(), WireforgeError>> {
        Box::pin(async move {
            ctx.hits.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }

    fn add_ten<'a>(
        ctx: &'a Counters,
        _packet: &'a mut Packet,
    ) -> BoxFuture<'a, Result<(), WireforgeError>> {
        Box::pin(async move {
            ctx.hits.fetch_add(10, Ordering::Relaxed);
            Ok(())
        })
    }

    fn packet(name: &str) -> Packet {
        Packet::new(ClientId(1), ClientId::SERVER, name)
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_side_and_name() {
        let mut registry = HandlerRegistry::new();
        registry.register(Side::Server, "ping", Box::new(add_one));
        let ctx = Counters {
            hits: AtomicU32::new(0),
        };

        registry
            .dispatch(Side::Server, &ctx, &mut packet("ping"))
            .await
            .unwrap();
        assert_eq!(ctx.hits.load(Ordering::Relaxed), 1);

        // Same name on the other side is not registered.
        let err = registry
            .dispatch(Side::Client, &ctx, &mut packet("ping"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WireforgeError::UnknownMessageName {
                side: Side::Client,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_registration_is_last_writer_wins() {
        let mut registry = HandlerRegistry::new();
        registry.register(Side::Server, "ping", Box::new(add_one));
        registry.register(Side::Server, "ping", Box::new(add_ten));
        let ctx = Counters {
            hits: AtomicU32::new(0),
        };

        registry
            .dispatch(Side::Server, &ctx, &mut packet("ping"))
            .await
            .unwrap();
        assert_eq!(ctx.hits.load(Ordering::Relaxed), 10);
    }

    #[tokio::test]
    async fn test_unknown_name_is_an_error() {
        let registry: HandlerRegistry<Counters> = HandlerRegistry::new();
        let ctx = Counters {
            hits: AtomicU32::new(0),
        };
        let err = registry
            .dispatch(Side::Server, &ctx, &mut packet("mystery"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, WireforgeError::UnknownMessageName { name, .. } if name == "mystery")
        );
    }

    #[test]
    fn test_contains() {
        let mut registry: HandlerRegistry<Counters> = HandlerRegistry::new();
        registry.register(Side::Client, "msg", Box::new(add_one));
        assert!(registry.contains(Side::Client, "msg"));
        assert!(!registry.contains(Side::Server, "msg"));
    }
}
