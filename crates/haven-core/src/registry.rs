//! Connection registry.
//!
//! Maps an ephemeral connection handle to the durable identity currently
//! occupying it. Entries exist only while the transport is connected;
//! resolving an unknown handle is a normal miss, never an error, because
//! events routinely race disconnects.

use std::collections::HashMap;

use tracing::debug;

use haven_shared::types::{ConnectionId, UserId};

/// Live connection ↔ identity mapping. One connection per identity:
/// a later login for the same identity displaces the earlier handle.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    by_connection: HashMap<ConnectionId, UserId>,
    by_user: HashMap<UserId, ConnectionId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a connection to an identity.
    ///
    /// Returns the previous handle for this identity, if any; the caller
    /// must close it so a stale handle never keeps receiving events.
    pub fn register(&mut self, conn: ConnectionId, user_id: UserId) -> Option<ConnectionId> {
        let displaced = match self.by_user.insert(user_id.clone(), conn) {
            Some(old) if old != conn => {
                self.by_connection.remove(&old);
                debug!(user = %user_id, old = %old, new = %conn, "displacing previous session");
                Some(old)
            }
            _ => None,
        };
        // A handle re-logging-in as a different identity releases the one
        // it held.
        if let Some(previous) = self.by_connection.insert(conn, user_id.clone()) {
            if previous != user_id && self.by_user.get(&previous) == Some(&conn) {
                self.by_user.remove(&previous);
            }
        }
        displaced
    }

    pub fn resolve(&self, conn: &ConnectionId) -> Option<&UserId> {
        self.by_connection.get(conn)
    }

    pub fn connection_for(&self, user_id: &UserId) -> Option<ConnectionId> {
        self.by_user.get(user_id).copied()
    }

    pub fn is_registered(&self, conn: &ConnectionId) -> bool {
        self.by_connection.contains_key(conn)
    }

    /// Unbind a connection, returning the identity that occupied it.
    pub fn unregister(&mut self, conn: &ConnectionId) -> Option<UserId> {
        let user_id = self.by_connection.remove(conn)?;
        // Only clear the reverse mapping if it still points at this handle;
        // a replacement login may already own it.
        if self.by_user.get(&user_id) == Some(conn) {
            self.by_user.remove(&user_id);
        }
        debug!(user = %user_id, conn = %conn, "connection unregistered");
        Some(user_id)
    }

    /// All currently registered connection handles (broadcast set).
    pub fn connections(&self) -> impl Iterator<Item = &ConnectionId> {
        self.by_connection.keys()
    }

    pub fn len(&self) -> usize {
        self.by_connection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_connection.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_unknown_handle_is_a_miss() {
        let registry = ConnectionRegistry::new();
        assert!(registry.resolve(&ConnectionId::new()).is_none());
    }

    #[test]
    fn relogin_displaces_previous_handle() {
        let mut registry = ConnectionRegistry::new();
        let uid = UserId("u1".into());
        let first = ConnectionId::new();
        let second = ConnectionId::new();

        assert_eq!(registry.register(first, uid.clone()), None);
        assert_eq!(registry.register(second, uid.clone()), Some(first));

        // The stale handle no longer resolves.
        assert!(registry.resolve(&first).is_none());
        assert_eq!(registry.resolve(&second), Some(&uid));
        assert_eq!(registry.connection_for(&uid), Some(second));
    }

    #[test]
    fn reregister_same_handle_is_idempotent() {
        let mut registry = ConnectionRegistry::new();
        let uid = UserId("u1".into());
        let conn = ConnectionId::new();

        assert_eq!(registry.register(conn, uid.clone()), None);
        assert_eq!(registry.register(conn, uid.clone()), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_after_displacement_keeps_new_session() {
        let mut registry = ConnectionRegistry::new();
        let uid = UserId("u1".into());
        let first = ConnectionId::new();
        let second = ConnectionId::new();

        registry.register(first, uid.clone());
        registry.register(second, uid.clone());

        // A late disconnect of the displaced handle must not evict the
        // replacement session.
        assert_eq!(registry.unregister(&first), None);
        assert_eq!(registry.connection_for(&uid), Some(second));
    }

    #[test]
    fn handle_switching_identity_releases_the_old_one() {
        let mut registry = ConnectionRegistry::new();
        let conn = ConnectionId::new();
        let alice = UserId("u1".into());
        let bob = UserId("u2".into());

        registry.register(conn, alice.clone());
        registry.register(conn, bob.clone());

        assert_eq!(registry.connection_for(&alice), None);
        assert_eq!(registry.connection_for(&bob), Some(conn));
        assert_eq!(registry.resolve(&conn), Some(&bob));
    }
}
