//! Client identity bookkeeping for Wireforge.
//!
//! This crate owns the mapping between numeric client ids and display
//! names. Both the server (authoritative copy) and each client (a mirror
//! kept up to date by `idName`/`clientDisconnect` messages) hold their own
//! [`IdentityRegistry`] instance — there is no process-global table.

mod error;
mod registry;

pub use error::SessionError;
pub use registry::IdentityRegistry;
