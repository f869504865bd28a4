//! The [`IdentityRegistry`]: id ↔ display-name pairs kept in lockstep.

use std::collections::HashMap;

use wireforge_protocol::ClientId;

use crate::SessionError;

/// Bidirectional map between client ids and display names.
///
/// Invariants:
/// - every entry in one direction has its counterpart in the other,
/// - names are unique,
/// - the reserved pairs `BROADCAST → "everyone"` and `SERVER → "server"`
///   are pre-seeded and never removed.
///
/// # Concurrency note
///
/// The registry is plain data — not thread-safe by itself. The server keeps
/// it under the same mutex as its connection table so identity and slot
/// state can never diverge; a client wraps its mirror in its own lock.
#[derive(Debug)]
pub struct IdentityRegistry {
    id_to_name: HashMap<ClientId, String>,
    name_to_id: HashMap<String, ClientId>,
}

impl IdentityRegistry {
    /// Creates a registry seeded with the reserved identities.
    pub fn new() -> Self {
        let mut registry = Self {
            id_to_name: HashMap::new(),
            name_to_id: HashMap::new(),
        };
        registry.link(ClientId::BROADCAST, "everyone");
        registry.link(ClientId::SERVER, "server");
        registry
    }

    fn link(&mut self, id: ClientId, name: &str) {
        self.id_to_name.insert(id, name.to_string());
        self.name_to_id.insert(name.to_string(), id);
    }

    /// Registers an id/name pair.
    ///
    /// Returns `Ok(false)` — leaving both maps untouched — when the name is
    /// already bound to a different id, so the caller can reject the peer
    /// gracefully.
    ///
    /// # Errors
    /// Returns [`SessionError::DuplicateId`] if the id is already
    /// registered. Ids come from the server's free list, so this indicates
    /// a bug in the caller rather than bad user input.
    pub fn insert(
        &mut self,
        id: ClientId,
        name: &str,
    ) -> Result<bool, SessionError> {
        if self.id_to_name.contains_key(&id) {
            return Err(SessionError::DuplicateId(id));
        }
        if self.name_to_id.contains_key(name) {
            return Ok(false);
        }
        self.link(id, name);
        tracing::debug!(%id, name, "identity registered");
        Ok(true)
    }

    /// Removes a pair by id. Removing an unknown id is a no-op.
    pub fn remove_id(&mut self, id: ClientId) {
        if let Some(name) = self.id_to_name.remove(&id) {
            self.name_to_id.remove(&name);
        }
    }

    /// Removes a pair by name. Removing an unknown name is a no-op.
    pub fn remove_name(&mut self, name: &str) {
        if let Some(id) = self.name_to_id.remove(name) {
            self.id_to_name.remove(&id);
        }
    }

    /// Looks up the display name bound to an id.
    pub fn name_of(&self, id: ClientId) -> Option<&str> {
        self.id_to_name.get(&id).map(String::as_str)
    }

    /// Looks up the id bound to a display name.
    pub fn id_of(&self, name: &str) -> Option<ClientId> {
        self.name_to_id.get(name).copied()
    }

    /// Returns `true` if the id is registered.
    pub fn contains_id(&self, id: ClientId) -> bool {
        self.id_to_name.contains_key(&id)
    }

    /// Returns `true` if the name is registered.
    pub fn contains_name(&self, name: &str) -> bool {
        self.name_to_id.contains_key(name)
    }

    /// Number of registered pairs, reserved entries included.
    pub fn len(&self) -> usize {
        self.id_to_name.len()
    }

    /// Never true: the reserved entries are always present.
    pub fn is_empty(&self) -> bool {
        self.id_to_name.is_empty()
    }
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_entries_are_seeded() {
        let registry = IdentityRegistry::new();
        assert_eq!(registry.name_of(ClientId::BROADCAST), Some("everyone"));
        assert_eq!(registry.name_of(ClientId::SERVER), Some("server"));
        assert_eq!(registry.id_of("everyone"), Some(ClientId::BROADCAST));
        assert_eq!(registry.id_of("server"), Some(ClientId::SERVER));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_insert_and_lookup_both_ways() {
        let mut registry = IdentityRegistry::new();
        assert!(registry.insert(ClientId(1), "alice").unwrap());
        assert_eq!(registry.name_of(ClientId(1)), Some("alice"));
        assert_eq!(registry.id_of("alice"), Some(ClientId(1)));
    }

    #[test]
    fn test_duplicate_id_is_an_error() {
        let mut registry = IdentityRegistry::new();
        registry.insert(ClientId(1), "alice").unwrap();
        assert!(matches!(
            registry.insert(ClientId(1), "bob"),
            Err(SessionError::DuplicateId(ClientId(1)))
        ));
    }

    #[test]
    fn test_taken_name_returns_false_and_changes_nothing() {
        let mut registry = IdentityRegistry::new();
        registry.insert(ClientId(1), "alice").unwrap();
        assert!(!registry.insert(ClientId(2), "alice").unwrap());
        // Both maps unchanged: id 2 unknown, "alice" still bound to 1.
        assert!(!registry.contains_id(ClientId(2)));
        assert_eq!(registry.id_of("alice"), Some(ClientId(1)));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_remove_by_either_key_unlinks_both_sides() {
        let mut registry = IdentityRegistry::new();
        registry.insert(ClientId(1), "alice").unwrap();
        registry.insert(ClientId(2), "bob").unwrap();

        registry.remove_id(ClientId(1));
        assert!(!registry.contains_id(ClientId(1)));
        assert!(!registry.contains_name("alice"));

        registry.remove_name("bob");
        assert!(!registry.contains_id(ClientId(2)));
        assert!(!registry.contains_name("bob"));
    }

    #[test]
    fn test_removing_missing_keys_is_a_no_op() {
        let mut registry = IdentityRegistry::new();
        registry.remove_id(ClientId(9));
        registry.remove_name("ghost");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_name_freed_by_removal_can_be_reused() {
        let mut registry = IdentityRegistry::new();
        registry.insert(ClientId(1), "alice").unwrap();
        registry.remove_id(ClientId(1));
        assert!(registry.insert(ClientId(2), "alice").unwrap());
        assert_eq!(registry.id_of("alice"), Some(ClientId(2)));
    }
}
