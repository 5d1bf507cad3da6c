//! Identity directory.
//!
//! Maps a durable user id to profile and presence state. Identities are
//! created on first login, updated on every connect/disconnect, and never
//! deleted, so the directory is also the source of the "full identity
//! list" pushed during the session bootstrap.

use std::collections::HashMap;

use chrono::Utc;
use tracing::debug;

use haven_shared::protocol::UserSummary;
use haven_shared::types::{Identity, Presence, UserId};

/// Durable identity state, keyed by user id with a secondary index by
/// display name. Lookups by username go through the index rather than
/// ambient string comparison.
#[derive(Debug, Default)]
pub struct IdentityDirectory {
    identities: HashMap<UserId, Identity>,
    by_username: HashMap<String, UserId>,
}

impl IdentityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore identities from a persisted snapshot, marking everyone
    /// offline (no connection survives a restart).
    pub fn from_identities(identities: Vec<Identity>) -> Self {
        let mut dir = Self::new();
        for mut identity in identities {
            identity.status = Presence::Offline;
            dir.by_username
                .insert(identity.username.clone(), identity.user_id.clone());
            dir.identities.insert(identity.user_id.clone(), identity);
        }
        dir
    }

    /// Create or update an identity on login: presence flips to online,
    /// the display name is refreshed, and `last_seen` is stamped.
    pub fn mark_online(&mut self, user_id: &UserId, username: &str) -> &Identity {
        let entry = self
            .identities
            .entry(user_id.clone())
            .or_insert_with(|| Identity {
                user_id: user_id.clone(),
                username: username.to_string(),
                status: Presence::Online,
                last_seen: Utc::now(),
            });

        if entry.username != username {
            self.by_username.remove(&entry.username);
            entry.username = username.to_string();
        }
        entry.status = Presence::Online;
        entry.last_seen = Utc::now();

        self.by_username
            .insert(username.to_string(), user_id.clone());

        debug!(user = %user_id, username, "identity online");
        &self.identities[user_id]
    }

    /// Flip an identity offline and stamp `last_seen`. Unknown ids are a
    /// no-op (a disconnect may race the first login).
    pub fn mark_offline(&mut self, user_id: &UserId) {
        if let Some(identity) = self.identities.get_mut(user_id) {
            identity.status = Presence::Offline;
            identity.last_seen = Utc::now();
            debug!(user = %user_id, "identity offline");
        }
    }

    pub fn get(&self, user_id: &UserId) -> Option<&Identity> {
        self.identities.get(user_id)
    }

    pub fn find_by_username(&self, username: &str) -> Option<&Identity> {
        self.by_username
            .get(username)
            .and_then(|id| self.identities.get(id))
    }

    /// Full identity list, online and offline, for the bootstrap push.
    pub fn summaries(&self) -> Vec<UserSummary> {
        let mut list: Vec<UserSummary> = self
            .identities
            .values()
            .map(|identity| UserSummary {
                id: identity.user_id.clone(),
                username: identity.username.clone(),
                status: identity.status,
            })
            .collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.identities.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_online_creates_and_updates() {
        let mut dir = IdentityDirectory::new();
        let uid = UserId("u1".into());

        let identity = dir.mark_online(&uid, "alice");
        assert_eq!(identity.status, Presence::Online);

        dir.mark_offline(&uid);
        assert_eq!(dir.get(&uid).unwrap().status, Presence::Offline);

        // Reconnecting with a new display name re-points the username index.
        dir.mark_online(&uid, "alice2");
        assert!(dir.find_by_username("alice").is_none());
        assert_eq!(dir.find_by_username("alice2").unwrap().user_id, uid);
    }

    #[test]
    fn identities_survive_disconnect() {
        let mut dir = IdentityDirectory::new();
        let uid = UserId("u1".into());
        dir.mark_online(&uid, "alice");
        dir.mark_offline(&uid);

        assert_eq!(dir.summaries().len(), 1);
        assert!(dir.get(&uid).is_some());
    }

    #[test]
    fn snapshot_restore_marks_everyone_offline() {
        let mut dir = IdentityDirectory::new();
        dir.mark_online(&UserId("u1".into()), "alice");

        let identities: Vec<Identity> = dir.identities().cloned().collect();
        let restored = IdentityDirectory::from_identities(identities);
        assert_eq!(
            restored.get(&UserId("u1".into())).unwrap().status,
            Presence::Offline
        );
    }
}
