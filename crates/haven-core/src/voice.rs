//! Voice presence tracker.
//!
//! Tracks which connections are joined to which voice channel, decoupled
//! from the media transport: the router only relays opaque signaling
//! payloads between handles, and this module only answers "who is in the
//! room". On join, both sides of the full-mesh discovery handshake are
//! derived from the peer list returned here.

use std::collections::BTreeMap;

use tracing::{debug, info};

use haven_shared::protocol::VoiceParticipantSummary;
use haven_shared::types::{ChannelId, ConnectionId, UserId};

/// One connection's presence in a voice channel.
#[derive(Debug, Clone)]
pub struct VoiceParticipant {
    pub connection: ConnectionId,
    pub user_id: UserId,
    pub username: String,
    pub channel_id: ChannelId,
}

/// Result of a voice channel join.
#[derive(Debug)]
pub struct JoinOutcome {
    /// Peers already present in the joined channel (the discovery set).
    pub peers: Vec<ConnectionId>,
    /// Channel implicitly left by this join, with the participants that
    /// remain there and must be told about the departure.
    pub departed: Option<(ChannelId, Vec<ConnectionId>)>,
}

/// Per-voice-channel participant sets. A connection may occupy at most
/// one voice channel at a time; empty channel entries are dropped.
#[derive(Debug, Default)]
pub struct VoicePresence {
    channels: BTreeMap<ChannelId, Vec<ConnectionId>>,
    participants: BTreeMap<ConnectionId, VoiceParticipant>,
}

impl VoicePresence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a voice channel. Joining a second channel
    /// implicitly leaves the first; the outcome carries the old channel's
    /// remaining participants so the departure can be announced.
    pub fn join(
        &mut self,
        channel_id: ChannelId,
        connection: ConnectionId,
        user_id: UserId,
        username: String,
    ) -> JoinOutcome {
        let departed = match self.participants.get(&connection) {
            Some(p) if p.channel_id != channel_id => self.leave(&connection),
            _ => None,
        };

        let members = self.channels.entry(channel_id.clone()).or_default();
        let existing: Vec<ConnectionId> = members
            .iter()
            .filter(|c| **c != connection)
            .copied()
            .collect();
        if !members.contains(&connection) {
            members.push(connection);
        }

        self.participants.insert(
            connection,
            VoiceParticipant {
                connection,
                user_id,
                username: username.clone(),
                channel_id: channel_id.clone(),
            },
        );

        info!(channel = %channel_id, conn = %connection, username, "joined voice channel");
        JoinOutcome {
            peers: existing,
            departed,
        }
    }

    /// Remove a connection from its voice channel, returning the channel
    /// and the peers that remain (to be notified of the departure).
    pub fn leave(&mut self, connection: &ConnectionId) -> Option<(ChannelId, Vec<ConnectionId>)> {
        let participant = self.participants.remove(connection)?;
        let channel_id = participant.channel_id;

        let remaining = match self.channels.get_mut(&channel_id) {
            Some(members) => {
                members.retain(|c| c != connection);
                if members.is_empty() {
                    self.channels.remove(&channel_id);
                    debug!(channel = %channel_id, "voice channel emptied");
                    Vec::new()
                } else {
                    members.clone()
                }
            }
            None => Vec::new(),
        };

        info!(channel = %channel_id, conn = %connection, "left voice channel");
        Some((channel_id, remaining))
    }

    /// Everyone currently in a channel, including the handle given.
    pub fn participants_of(&self, channel_id: &ChannelId) -> Vec<VoiceParticipantSummary> {
        self.channels
            .get(channel_id)
            .into_iter()
            .flatten()
            .filter_map(|conn| self.participants.get(conn))
            .map(|p| VoiceParticipantSummary {
                id: p.connection,
                username: p.username.clone(),
            })
            .collect()
    }

    pub fn participant(&self, connection: &ConnectionId) -> Option<&VoiceParticipant> {
        self.participants.get(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join(presence: &mut VoicePresence, channel: &str, name: &str) -> ConnectionId {
        let conn = ConnectionId::new();
        presence.join(
            ChannelId(channel.into()),
            conn,
            UserId(format!("uid-{name}")),
            name.into(),
        );
        conn
    }

    #[test]
    fn join_returns_preexisting_peers() {
        let mut presence = VoicePresence::new();
        let first = join(&mut presence, "voice", "alice");

        let second = ConnectionId::new();
        let outcome = presence.join(
            ChannelId("voice".into()),
            second,
            UserId("uid-bob".into()),
            "bob".into(),
        );
        assert_eq!(outcome.peers, vec![first]);
        assert!(outcome.departed.is_none());
        assert_eq!(presence.participants_of(&ChannelId("voice".into())).len(), 2);
    }

    #[test]
    fn empty_channel_entry_is_dropped_on_leave() {
        let mut presence = VoicePresence::new();
        let conn = join(&mut presence, "voice", "alice");

        let (channel, remaining) = presence.leave(&conn).unwrap();
        assert_eq!(channel, ChannelId("voice".into()));
        assert!(remaining.is_empty());
        assert!(presence.participants_of(&ChannelId("voice".into())).is_empty());
    }

    #[test]
    fn leave_notifies_remaining_peers() {
        let mut presence = VoicePresence::new();
        let alice = join(&mut presence, "voice", "alice");
        let bob = join(&mut presence, "voice", "bob");

        let (_, remaining) = presence.leave(&alice).unwrap();
        assert_eq!(remaining, vec![bob]);
    }

    #[test]
    fn joining_a_second_channel_leaves_the_first() {
        let mut presence = VoicePresence::new();
        let conn = join(&mut presence, "voice-a", "alice");

        presence.join(
            ChannelId("voice-b".into()),
            conn,
            UserId("uid-alice".into()),
            "alice".into(),
        );
        assert!(presence.participants_of(&ChannelId("voice-a".into())).is_empty());
        assert_eq!(presence.participants_of(&ChannelId("voice-b".into())).len(), 1);
    }

    #[test]
    fn channel_switch_reports_the_departed_channel() {
        let mut presence = VoicePresence::new();
        let stayer = join(&mut presence, "voice-a", "alice");
        let switcher = join(&mut presence, "voice-a", "bob");

        let outcome = presence.join(
            ChannelId("voice-b".into()),
            switcher,
            UserId("uid-bob".into()),
            "bob".into(),
        );
        let (channel, remaining) = outcome.departed.expect("switch reports the old channel");
        assert_eq!(channel, ChannelId("voice-a".into()));
        assert_eq!(remaining, vec![stayer]);

        // Re-joining the current channel is not a switch.
        let outcome = presence.join(
            ChannelId("voice-b".into()),
            switcher,
            UserId("uid-bob".into()),
            "bob".into(),
        );
        assert!(outcome.departed.is_none());
    }

    #[test]
    fn leave_of_unknown_connection_is_a_miss() {
        let mut presence = VoicePresence::new();
        assert!(presence.leave(&ConnectionId::new()).is_none());
    }
}
