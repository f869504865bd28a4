//! Static server configuration.

use serde::{Deserialize, Serialize};

/// Immutable configuration supplied to [`Server::new`](crate::Server::new)
/// at startup.
///
/// Derives serde so embedders can load it from a config file; the defaults
/// match the reference deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on. Port `0` picks a free port (useful in tests;
    /// read the actual address back from [`Server::start`](crate::Server::start)).
    pub addr: String,
    /// Maximum number of concurrently connected clients. Ids are assigned
    /// from `[1, max_clients]`.
    pub max_clients: u16,
    /// The server's display name, reported at startup.
    pub name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:26950".to_string(),
            max_clients: 4,
            name: "Server Test".to_string(),
        }
    }
}
