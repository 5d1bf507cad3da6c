//! History store.
//!
//! Append-only per-scope message sequences, replayed on join/select.
//! Append is the only mutation; there is no compaction or deletion.

use std::collections::BTreeMap;

use chrono::Utc;

use haven_shared::types::{Message, MessageId, Scope};

/// Per-scope ordered message history.
#[derive(Debug, Default)]
pub struct HistoryStore {
    scopes: BTreeMap<Scope, Vec<Message>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_scopes(scopes: BTreeMap<Scope, Vec<Message>>) -> Self {
        Self { scopes }
    }

    /// Append a message, assigning its id.
    ///
    /// Ids are wall-clock millis bumped past the scope's previous id, so
    /// they stay unique and strictly increasing within the scope even for
    /// same-millisecond sends.
    pub fn append(&mut self, scope: Scope, mut message: Message) -> Message {
        let entries = self.scopes.entry(scope).or_default();
        let now = Utc::now().timestamp_millis() as u64;
        let next = match entries.last() {
            Some(last) => now.max(last.id.0 + 1),
            None => now,
        };
        message.id = MessageId(next);
        entries.push(message.clone());
        message
    }

    /// Messages of one scope in insertion order. Unknown scopes read as
    /// empty, not as an error.
    pub fn read(&self, scope: &Scope) -> &[Message] {
        self.scopes.get(scope).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn scopes(&self) -> &BTreeMap<Scope, Vec<Message>> {
        &self.scopes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haven_shared::types::{CommunityId, MessageKind, UserId};

    fn draft(content: &str) -> Message {
        Message {
            id: MessageId::default(),
            content: content.into(),
            author: "alice".into(),
            author_id: UserId("u1".into()),
            timestamp: Utc::now(),
            kind: MessageKind::Text,
            channel_id: None,
            server_id: None,
            conversation_id: None,
        }
    }

    #[test]
    fn append_then_read_preserves_insertion_order() {
        let mut history = HistoryStore::new();
        let scope = Scope::Community(CommunityId("c1".into()));

        for i in 0..10 {
            history.append(scope.clone(), draft(&format!("m{i}")));
        }

        let read = history.read(&scope);
        assert_eq!(read.len(), 10);
        for (i, message) in read.iter().enumerate() {
            assert_eq!(message.content, format!("m{i}"));
        }
    }

    #[test]
    fn ids_are_strictly_increasing_within_a_scope() {
        let mut history = HistoryStore::new();
        let scope = Scope::Community(CommunityId("c1".into()));

        // Same-millisecond appends must not collide.
        let ids: Vec<MessageId> = (0..100)
            .map(|_| history.append(scope.clone(), draft("x")).id)
            .collect();
        for pair in ids.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn unknown_scope_reads_empty() {
        let history = HistoryStore::new();
        let scope = Scope::Community(CommunityId("missing".into()));
        assert!(history.read(&scope).is_empty());
    }
}
