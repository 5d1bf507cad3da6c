//! Core domain types.
//!
//! The central distinction in Haven is between a *durable identity* (the
//! `uid` handed in by the external identity provider, stable across
//! reconnects) and a *connection handle* (one live transport session).
//! Everything presence-related hangs off the identity; everything
//! delivery-related hangs off the connection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable user identifier, issued by the external identity provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ephemeral handle for one live transport session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommunityId(pub String);

impl std::fmt::Display for CommunityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub String);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Two-party direct-message scope. The identifier is a deterministic
/// function of the sorted participant pair, so creation is idempotent:
/// requesting the conversation for (A, B) and (B, A) yields the same id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn for_pair(a: &UserId, b: &UserId) -> Self {
        let mut pair = [a.as_str(), b.as_str()];
        pair.sort_unstable();
        Self(format!("{}-{}", pair[0], pair[1]))
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Presence status of a durable identity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Offline,
    Away,
}

/// A durable identity. Created on first login, updated on every
/// connect/disconnect, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: UserId,
    /// Mutable display name, distinct from the durable id.
    pub username: String,
    pub status: Presence,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Text,
    Voice,
}

/// A text or voice sub-scope within a community. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    pub server_id: CommunityId,
}

/// A community (server): a named group of channels plus a member set.
///
/// Members are kept in insertion order but behave as a set: adding an
/// existing member is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Community {
    pub id: CommunityId,
    pub name: String,
    pub owner_id: UserId,
    pub invite_code: String,
    pub channels: Vec<Channel>,
    pub members: Vec<UserId>,
}

impl Community {
    pub fn is_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }

    /// Idempotent member insert. Returns true if the member was added.
    pub fn add_member(&mut self, user: UserId) -> bool {
        if self.members.contains(&user) {
            false
        } else {
            self.members.push(user);
            true
        }
    }

    /// Returns true if the member was present.
    pub fn remove_member(&mut self, user: &UserId) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m != user);
        self.members.len() != before
    }
}

/// Message identifier: wall-clock millis, bumped past the previous id of
/// the scope on collision so insertion order is strictly increasing.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Dm,
}

/// A single chat message. Append-only; never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    /// Display name of the author at send time.
    pub author: String,
    pub author_id: UserId,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<CommunityId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
}

/// History scope: per-community channel history or a two-party conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase", tag = "kind", content = "id")]
pub enum Scope {
    Community(CommunityId),
    Conversation(ConversationId),
}

/// A pending friend request, keyed by its recipient. At most one exists
/// per ordered (from, to) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequest {
    pub from_id: UserId,
    pub from_username: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    FriendRequest,
}

/// A notification held for an identity until explicitly acknowledged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    /// Display names of the two participants (wire compatibility).
    pub participants: Vec<String>,
    /// Durable ids of the two participants.
    pub participant_ids: Vec<UserId>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_id_is_order_independent() {
        let a = UserId("uid-alpha".into());
        let b = UserId("uid-beta".into());
        assert_eq!(
            ConversationId::for_pair(&a, &b),
            ConversationId::for_pair(&b, &a)
        );
        assert_eq!(ConversationId::for_pair(&a, &b).0, "uid-alpha-uid-beta");
    }

    #[test]
    fn community_members_behave_as_a_set() {
        let mut community = Community {
            id: CommunityId("c1".into()),
            name: "Test".into(),
            owner_id: UserId("u1".into()),
            invite_code: "ABC123".into(),
            channels: vec![],
            members: vec![],
        };

        assert!(community.add_member(UserId("u1".into())));
        assert!(!community.add_member(UserId("u1".into())));
        assert_eq!(community.members.len(), 1);

        assert!(community.remove_member(&UserId("u1".into())));
        assert!(!community.remove_member(&UserId("u1".into())));
        assert!(community.members.is_empty());
    }
}
