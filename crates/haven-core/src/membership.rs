//! Membership index.
//!
//! Maps communities and two-party conversations to their member
//! identities. This is the authorization boundary for all fan-out: the
//! router never delivers a scoped event to an identity this index does
//! not list.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use tracing::{debug, info};

use haven_shared::types::{
    Channel, ChannelId, ChannelKind, Community, CommunityId, Conversation, ConversationId, UserId,
};

/// Outcome of removing a member from a community.
#[derive(Debug, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// Member removed; the community still has members.
    Removed,
    /// Member removed and the community became empty and was deleted.
    CommunityDeleted,
    /// The identity was not a member.
    NotAMember,
}

/// Communities and conversations, plus the set of invite codes in use.
///
/// BTreeMaps keep iteration deterministic, which keeps snapshot documents
/// and bootstrap pushes stable.
#[derive(Debug, Default)]
pub struct MembershipIndex {
    communities: BTreeMap<CommunityId, Community>,
    conversations: BTreeMap<ConversationId, Conversation>,
    used_invite_codes: HashSet<String>,
    last_community_id: u64,
}

impl MembershipIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from persisted snapshot documents, re-seeding the used
    /// invite code set from the loaded communities.
    pub fn from_snapshot(
        communities: BTreeMap<CommunityId, Community>,
        conversations: BTreeMap<ConversationId, Conversation>,
    ) -> Self {
        let used_invite_codes = communities
            .values()
            .map(|c| c.invite_code.clone())
            .collect();
        let last_community_id = communities
            .keys()
            .filter_map(|id| id.0.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Self {
            communities,
            conversations,
            used_invite_codes,
            last_community_id,
        }
    }

    // -- communities ---------------------------------------------------

    /// Mint a community id: wall-clock millis, bumped past the last id so
    /// two communities created in the same millisecond stay distinct.
    pub fn next_community_id(&mut self) -> CommunityId {
        let now = Utc::now().timestamp_millis() as u64;
        self.last_community_id = now.max(self.last_community_id + 1);
        CommunityId(self.last_community_id.to_string())
    }

    /// Create a community with the default channel pair (one text, one
    /// voice) and the creator as sole member.
    pub fn create_community(
        &mut self,
        id: CommunityId,
        name: String,
        owner_id: UserId,
        invite_code: String,
        creator: UserId,
    ) -> &Community {
        let channels = vec![
            Channel {
                id: ChannelId(format!("{}-general", id.0)),
                name: "general".to_string(),
                kind: ChannelKind::Text,
                server_id: id.clone(),
            },
            Channel {
                id: ChannelId(format!("{}-voice", id.0)),
                name: "Voice Chat".to_string(),
                kind: ChannelKind::Voice,
                server_id: id.clone(),
            },
        ];

        self.used_invite_codes.insert(invite_code.clone());
        let community = Community {
            id: id.clone(),
            name,
            owner_id,
            invite_code,
            channels,
            members: vec![creator],
        };

        info!(community = %id, name = %community.name, "community created");
        self.communities.entry(id).or_insert(community)
    }

    /// Insert a pre-built community (snapshot load, default seeding).
    pub fn insert_community(&mut self, community: Community) {
        self.used_invite_codes.insert(community.invite_code.clone());
        self.communities.insert(community.id.clone(), community);
    }

    pub fn community(&self, id: &CommunityId) -> Option<&Community> {
        self.communities.get(id)
    }

    pub fn find_by_invite_code(&self, code: &str) -> Option<&Community> {
        self.communities.values().find(|c| c.invite_code == code)
    }

    pub fn communities_of(&self, user_id: &UserId) -> Vec<&Community> {
        self.communities
            .values()
            .filter(|c| c.is_member(user_id))
            .collect()
    }

    pub fn is_member(&self, community_id: &CommunityId, user_id: &UserId) -> bool {
        self.communities
            .get(community_id)
            .map(|c| c.is_member(user_id))
            .unwrap_or(false)
    }

    /// Idempotent membership add. Returns false for an unknown community.
    pub fn add_member(&mut self, community_id: &CommunityId, user_id: UserId) -> bool {
        match self.communities.get_mut(community_id) {
            Some(community) => {
                if community.add_member(user_id.clone()) {
                    debug!(community = %community_id, user = %user_id, "member added");
                }
                true
            }
            None => false,
        }
    }

    /// Remove a member; deletes the community once its member set is
    /// empty. The invite code stays reserved so it is never reissued.
    pub fn remove_member(&mut self, community_id: &CommunityId, user_id: &UserId) -> RemoveOutcome {
        let Some(community) = self.communities.get_mut(community_id) else {
            return RemoveOutcome::NotAMember;
        };
        if !community.remove_member(user_id) {
            return RemoveOutcome::NotAMember;
        }
        if community.members.is_empty() {
            self.communities.remove(community_id);
            info!(community = %community_id, "community emptied and deleted");
            RemoveOutcome::CommunityDeleted
        } else {
            RemoveOutcome::Removed
        }
    }

    pub fn used_invite_codes(&self) -> &HashSet<String> {
        &self.used_invite_codes
    }

    pub fn communities(&self) -> &BTreeMap<CommunityId, Community> {
        &self.communities
    }

    pub fn community_count(&self) -> usize {
        self.communities.len()
    }

    // -- conversations ---------------------------------------------------

    /// Idempotent conversation creation: the id is deterministic in the
    /// participant pair, so re-requesting yields the existing entry.
    pub fn ensure_conversation(
        &mut self,
        a: (&UserId, &str),
        b: (&UserId, &str),
    ) -> &Conversation {
        let id = ConversationId::for_pair(a.0, b.0);
        self.conversations.entry(id.clone()).or_insert_with(|| {
            debug!(conversation = %id, "conversation created");
            Conversation {
                id,
                participants: vec![a.1.to_string(), b.1.to_string()],
                participant_ids: vec![a.0.clone(), b.0.clone()],
                created_at: Utc::now(),
            }
        })
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    pub fn conversations_of(&self, user_id: &UserId) -> Vec<&Conversation> {
        self.conversations
            .values()
            .filter(|c| c.participant_ids.contains(user_id))
            .collect()
    }

    pub fn conversations(&self) -> &BTreeMap<ConversationId, Conversation> {
        &self.conversations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with_community(members: &[&str]) -> (MembershipIndex, CommunityId) {
        let mut index = MembershipIndex::new();
        let id = index.next_community_id();
        index.create_community(
            id.clone(),
            "Test".into(),
            UserId(members[0].into()),
            "ABC123".into(),
            UserId(members[0].into()),
        );
        for member in &members[1..] {
            index.add_member(&id, UserId((*member).into()));
        }
        (index, id)
    }

    #[test]
    fn add_member_is_idempotent() {
        let (mut index, id) = index_with_community(&["u1"]);
        index.add_member(&id, UserId("u2".into()));
        index.add_member(&id, UserId("u2".into()));
        assert_eq!(index.community(&id).unwrap().members.len(), 2);
    }

    #[test]
    fn community_deleted_when_last_member_leaves() {
        let (mut index, id) = index_with_community(&["u1", "u2"]);

        assert_eq!(
            index.remove_member(&id, &UserId("u1".into())),
            RemoveOutcome::Removed
        );
        assert_eq!(
            index.remove_member(&id, &UserId("u2".into())),
            RemoveOutcome::CommunityDeleted
        );
        assert!(index.community(&id).is_none());

        // The invite code stays reserved after deletion.
        assert!(index.used_invite_codes().contains("ABC123"));
    }

    #[test]
    fn remove_unknown_member_is_reported() {
        let (mut index, id) = index_with_community(&["u1"]);
        assert_eq!(
            index.remove_member(&id, &UserId("nobody".into())),
            RemoveOutcome::NotAMember
        );
    }

    #[test]
    fn community_ids_are_strictly_increasing() {
        let mut index = MembershipIndex::new();
        let a = index.next_community_id();
        let b = index.next_community_id();
        assert!(b.0.parse::<u64>().unwrap() > a.0.parse::<u64>().unwrap());
    }

    #[test]
    fn conversation_creation_is_idempotent() {
        let mut index = MembershipIndex::new();
        let u1 = UserId("u1".into());
        let u2 = UserId("u2".into());

        let id = index.ensure_conversation((&u1, "alice"), (&u2, "bob")).id.clone();
        let again = index.ensure_conversation((&u2, "bob"), (&u1, "alice")).id.clone();
        assert_eq!(id, again);
        assert_eq!(index.conversations().len(), 1);
    }

    #[test]
    fn snapshot_restore_reseeds_invite_codes() {
        let (index, _) = index_with_community(&["u1"]);
        let restored = MembershipIndex::from_snapshot(
            index.communities().clone(),
            index.conversations().clone(),
        );
        assert!(restored.used_invite_codes().contains("ABC123"));
    }
}
