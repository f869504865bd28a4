use wireforge_protocol::ClientId;

/// Errors that can occur in the session layer.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// An id was registered twice.
    ///
    /// Ids are handed out by the server from a free list, so a collision
    /// is a programming error, not a recoverable user condition. Name
    /// collisions, by contrast, are user input and reported as a plain
    /// `false` from [`IdentityRegistry::insert`](crate::IdentityRegistry::insert).
    #[error("a client with id {0} is already registered")]
    DuplicateId(ClientId),
}
