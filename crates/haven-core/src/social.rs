//! Social graph manager.
//!
//! Friend requests, friendships, and notifications. A friendship is a
//! symmetric relation held as a pair of adjacency sets; every accept
//! inserts both sides in the same event so the symmetry invariant can
//! never be observed broken.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use haven_shared::types::{FriendRequest, Identity, Notification, NotificationKind, UserId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SocialError {
    #[error("Cannot send friend request to yourself")]
    SelfRequest,

    #[error("Already friends")]
    AlreadyFriends,

    #[error("Friend request already sent")]
    DuplicateRequest,

    #[error("Friend request not found")]
    RequestNotFound,

    #[error("User not found")]
    UserNotFound,
}

/// Outcome of responding to a friend request.
#[derive(Debug)]
pub struct RequestResponse {
    pub request: FriendRequest,
    pub accepted: bool,
}

/// Pending requests and notifications keyed by recipient, plus the
/// friendship adjacency sets.
#[derive(Debug, Default)]
pub struct SocialGraph {
    requests: BTreeMap<UserId, Vec<FriendRequest>>,
    friends: BTreeMap<UserId, HashSet<UserId>>,
    notifications: BTreeMap<UserId, Vec<Notification>>,
}

impl SocialGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(
        requests: BTreeMap<UserId, Vec<FriendRequest>>,
        friends: BTreeMap<UserId, HashSet<UserId>>,
        notifications: BTreeMap<UserId, Vec<Notification>>,
    ) -> Self {
        Self {
            requests,
            friends,
            notifications,
        }
    }

    /// Enqueue a friend request from `from` to `to`, plus a notification
    /// for the recipient. At most one request may be pending per ordered
    /// (from, to) pair.
    pub fn request_friendship(
        &mut self,
        from: &Identity,
        to: &Identity,
    ) -> Result<(FriendRequest, Notification), SocialError> {
        if from.user_id == to.user_id {
            return Err(SocialError::SelfRequest);
        }
        if self.are_friends(&from.user_id, &to.user_id) {
            return Err(SocialError::AlreadyFriends);
        }

        let pending = self.requests.entry(to.user_id.clone()).or_default();
        if pending.iter().any(|r| r.from_id == from.user_id) {
            return Err(SocialError::DuplicateRequest);
        }

        let request = FriendRequest {
            from_id: from.user_id.clone(),
            from_username: from.username.clone(),
            timestamp: Utc::now(),
        };
        pending.push(request.clone());

        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            kind: NotificationKind::FriendRequest,
            content: format!("{} sent you a friend request", from.username),
            timestamp: Utc::now(),
            data: serde_json::json!({
                "fromId": from.user_id,
                "fromUsername": from.username,
            }),
        };
        self.notifications
            .entry(to.user_id.clone())
            .or_default()
            .push(notification.clone());

        info!(from = %from.user_id, to = %to.user_id, "friend request enqueued");
        Ok((request, notification))
    }

    /// Accept or decline the pending request from `from` to `to`.
    ///
    /// On accept, both adjacency-set entries are inserted before this
    /// method returns; on decline only the request is removed.
    pub fn respond(
        &mut self,
        to: &UserId,
        from: &UserId,
        accepted: bool,
    ) -> Result<RequestResponse, SocialError> {
        let pending = self.requests.entry(to.clone()).or_default();
        let position = pending
            .iter()
            .position(|r| &r.from_id == from)
            .ok_or(SocialError::RequestNotFound)?;
        let request = pending.remove(position);

        if accepted {
            self.friends
                .entry(to.clone())
                .or_default()
                .insert(from.clone());
            self.friends
                .entry(from.clone())
                .or_default()
                .insert(to.clone());
            info!(a = %to, b = %from, "friendship established");
        } else {
            debug!(to = %to, from = %from, "friend request declined");
        }

        Ok(RequestResponse { request, accepted })
    }

    pub fn are_friends(&self, a: &UserId, b: &UserId) -> bool {
        self.friends.get(a).map(|s| s.contains(b)).unwrap_or(false)
    }

    pub fn friends_of(&self, user_id: &UserId) -> impl Iterator<Item = &UserId> {
        self.friends.get(user_id).into_iter().flatten()
    }

    pub fn requests_for(&self, user_id: &UserId) -> &[FriendRequest] {
        self.requests
            .get(user_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn notifications_for(&self, user_id: &UserId) -> &[Notification] {
        self.notifications
            .get(user_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Acknowledge (remove) one notification by id.
    pub fn acknowledge_notification(&mut self, user_id: &UserId, notification_id: &str) {
        if let Some(list) = self.notifications.get_mut(user_id) {
            list.retain(|n| n.id != notification_id);
        }
    }

    pub fn requests(&self) -> &BTreeMap<UserId, Vec<FriendRequest>> {
        &self.requests
    }

    pub fn friends(&self) -> &BTreeMap<UserId, HashSet<UserId>> {
        &self.friends
    }

    pub fn notifications(&self) -> &BTreeMap<UserId, Vec<Notification>> {
        &self.notifications
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_shared::types::Presence;

    fn identity(uid: &str, name: &str) -> Identity {
        Identity {
            user_id: UserId(uid.into()),
            username: name.into(),
            status: Presence::Online,
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn accept_establishes_a_symmetric_friendship() {
        let mut graph = SocialGraph::new();
        let alice = identity("u1", "alice");
        let bob = identity("u2", "bob");

        graph.request_friendship(&alice, &bob).unwrap();
        let response = graph
            .respond(&bob.user_id, &alice.user_id, true)
            .unwrap();
        assert!(response.accepted);

        assert!(graph.are_friends(&alice.user_id, &bob.user_id));
        assert!(graph.are_friends(&bob.user_id, &alice.user_id));
        assert!(graph.requests_for(&bob.user_id).is_empty());
    }

    #[test]
    fn decline_removes_the_request_without_relation() {
        let mut graph = SocialGraph::new();
        let alice = identity("u1", "alice");
        let bob = identity("u2", "bob");

        graph.request_friendship(&alice, &bob).unwrap();
        graph.respond(&bob.user_id, &alice.user_id, false).unwrap();

        assert!(!graph.are_friends(&alice.user_id, &bob.user_id));
        assert!(graph.requests_for(&bob.user_id).is_empty());
    }

    #[test]
    fn self_request_is_rejected() {
        let mut graph = SocialGraph::new();
        let alice = identity("u1", "alice");
        assert_eq!(
            graph.request_friendship(&alice, &alice).unwrap_err(),
            SocialError::SelfRequest
        );
    }

    #[test]
    fn duplicate_request_is_rejected() {
        let mut graph = SocialGraph::new();
        let alice = identity("u1", "alice");
        let bob = identity("u2", "bob");

        graph.request_friendship(&alice, &bob).unwrap();
        assert_eq!(
            graph.request_friendship(&alice, &bob).unwrap_err(),
            SocialError::DuplicateRequest
        );
    }

    #[test]
    fn request_between_friends_is_rejected() {
        let mut graph = SocialGraph::new();
        let alice = identity("u1", "alice");
        let bob = identity("u2", "bob");

        graph.request_friendship(&alice, &bob).unwrap();
        graph.respond(&bob.user_id, &alice.user_id, true).unwrap();

        assert_eq!(
            graph.request_friendship(&bob, &alice).unwrap_err(),
            SocialError::AlreadyFriends
        );
    }

    #[test]
    fn responding_to_a_missing_request_fails() {
        let mut graph = SocialGraph::new();
        assert_eq!(
            graph
                .respond(&UserId("u1".into()), &UserId("u2".into()), true)
                .unwrap_err(),
            SocialError::RequestNotFound
        );
    }

    #[test]
    fn notifications_are_removed_on_acknowledgement() {
        let mut graph = SocialGraph::new();
        let alice = identity("u1", "alice");
        let bob = identity("u2", "bob");

        let (_, notification) = graph.request_friendship(&alice, &bob).unwrap();
        assert_eq!(graph.notifications_for(&bob.user_id).len(), 1);

        graph.acknowledge_notification(&bob.user_id, &notification.id);
        assert!(graph.notifications_for(&bob.user_id).is_empty());
    }
}
