//! Persisted snapshot documents.
//!
//! The durable layout mirrors the live registries as three whole-document
//! JSON collections: communities, message history, and identity/social
//! state. Documents are read in full at process start and written in full
//! on mutation; the in-memory state stays the source of truth and writes
//! are best-effort.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::{
    Community, CommunityId, Conversation, ConversationId, FriendRequest, Identity, Message,
    Notification, UserId,
};

/// The `servers` collection: communities by id. Invite codes ride along
/// so the used-code set can be re-seeded on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CommunitiesDoc {
    pub communities: BTreeMap<CommunityId, Community>,
}

/// The `messages` collection: history by scope, split into channel
/// history (keyed by community) and conversation history.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MessagesDoc {
    pub channels: BTreeMap<CommunityId, Vec<Message>>,
    pub conversations: BTreeMap<ConversationId, Vec<Message>>,
}

/// The identity-store collection: durable identities plus the social
/// graph (friendships, pending requests, notifications, conversations).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IdentityDoc {
    pub users: Vec<Identity>,
    pub friends: BTreeMap<UserId, HashSet<UserId>>,
    pub friend_requests: BTreeMap<UserId, Vec<FriendRequest>>,
    pub notifications: BTreeMap<UserId, Vec<Notification>>,
    pub conversations: BTreeMap<ConversationId, Conversation>,
}

/// Everything the router needs to restore its registries at startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub communities: CommunitiesDoc,
    pub messages: MessagesDoc,
    pub identity: IdentityDoc,
}
