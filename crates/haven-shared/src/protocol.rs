//! Wire protocol between clients and the relay.
//!
//! Frames are JSON objects of the shape `{"event": <name>, "data": <payload>}`
//! in both directions, expressed here as adjacently tagged enums. Event and
//! field names are camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{
    ChannelId, CommunityId, Community, ConnectionId, ConversationId, FriendRequest, Message,
    Notification, Presence, UserId,
};

/// Inbound intents: every event a client may send to the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Login handshake. The `uid` is the durable identity issued by the
    /// external identity provider and is trusted as-is.
    #[serde(rename = "login", rename_all = "camelCase")]
    Login { username: String, uid: UserId },

    /// Channel message (default) or direct message (`type: "dm"`).
    #[serde(rename = "message")]
    Message(MessagePayload),

    #[serde(rename = "createServer", rename_all = "camelCase")]
    CreateServer { name: String, owner_id: UserId },

    #[serde(rename = "joinServer", rename_all = "camelCase")]
    JoinServer { invite_code: String },

    #[serde(rename = "leaveServer", rename_all = "camelCase")]
    LeaveServer { server_id: CommunityId },

    /// History + member-list replay for one community.
    #[serde(rename = "selectServer", rename_all = "camelCase")]
    SelectServer { server_id: CommunityId },

    /// Deterministic conversation creation/lookup. `participant_id` is the
    /// other party's display name, resolved through the username index.
    #[serde(rename = "createConversation", rename_all = "camelCase")]
    CreateConversation { participant_id: String },

    #[serde(rename = "getDirectMessageHistory", rename_all = "camelCase")]
    GetDirectMessageHistory { conversation_id: ConversationId },

    #[serde(rename = "sendFriendRequest", rename_all = "camelCase")]
    SendFriendRequest { target_username: String },

    #[serde(rename = "respondToFriendRequest", rename_all = "camelCase")]
    RespondToFriendRequest { from_id: UserId, accepted: bool },

    #[serde(rename = "joinVoiceChannel", rename_all = "camelCase")]
    JoinVoiceChannel {
        channel_id: ChannelId,
        username: String,
        server_id: CommunityId,
    },

    #[serde(rename = "leaveVoiceChannel", rename_all = "camelCase")]
    LeaveVoiceChannel {
        channel_id: ChannelId,
        username: String,
        server_id: CommunityId,
    },

    /// Opaque signaling relay for the peer-to-peer media overlay. Only `to`
    /// is interpreted; everything else passes through verbatim.
    #[serde(rename = "voice-signal")]
    VoiceSignal {
        to: ConnectionId,
        #[serde(flatten)]
        payload: Map<String, Value>,
    },

    #[serde(rename = "getServers")]
    GetServers,

    #[serde(rename = "getFriendRequests")]
    GetFriendRequests,

    #[serde(rename = "getFriends")]
    GetFriends,

    #[serde(rename = "getNotifications")]
    GetNotifications,

    #[serde(rename = "markNotificationRead", rename_all = "camelCase")]
    MarkNotificationRead { notification_id: String },
}

/// Payload of the `message` intent. Channel messages require `channelId` +
/// `serverId`; direct messages (`type: "dm"`) require `conversationId`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub content: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<CommunityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
}

impl MessagePayload {
    pub fn is_dm(&self) -> bool {
        self.kind.as_deref() == Some("dm")
    }
}

/// One entry of a user list pushed to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub status: Presence,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FriendSummary {
    pub uid: UserId,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub participants: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceParticipantSummary {
    pub id: ConnectionId,
    pub username: String,
}

/// Outbound events: everything the relay may push to a connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Full identity list, online and offline.
    #[serde(rename = "userList")]
    UserList(Vec<UserSummary>),

    #[serde(rename = "userJoined")]
    UserJoined(UserSummary),

    #[serde(rename = "userLeft")]
    UserLeft(UserId),

    #[serde(rename = "messageHistory")]
    MessageHistory(Vec<Message>),

    #[serde(rename = "message")]
    Message(Message),

    #[serde(rename = "servers")]
    Servers(Vec<Community>),

    #[serde(rename = "serverCreated")]
    ServerCreated(Community),

    #[serde(rename = "serverJoined", rename_all = "camelCase")]
    ServerJoined { server: Community, message: String },

    #[serde(rename = "serverLeft", rename_all = "camelCase")]
    ServerLeft { server_id: CommunityId },

    /// Scoped error report; delivered only to the originating connection.
    #[serde(rename = "serverError")]
    ServerError(String),

    /// Members of one community, online and offline.
    #[serde(rename = "serverUserList")]
    ServerUserList(Vec<UserSummary>),

    #[serde(rename = "friendRequests")]
    FriendRequests(Vec<FriendRequest>),

    #[serde(rename = "friendRequestSent", rename_all = "camelCase")]
    FriendRequestSent { target_username: String },

    #[serde(rename = "friendRequestError")]
    FriendRequestError(String),

    #[serde(rename = "friendRequestAccepted", rename_all = "camelCase")]
    FriendRequestAccepted {
        by_username: String,
        conversation_id: ConversationId,
        participants: Vec<String>,
    },

    #[serde(rename = "notifications")]
    Notifications(Vec<Notification>),

    #[serde(rename = "newNotification")]
    NewNotification(Notification),

    #[serde(rename = "conversations")]
    Conversations(Vec<ConversationSummary>),

    #[serde(rename = "conversationCreated", rename_all = "camelCase")]
    ConversationCreated {
        conversation_id: ConversationId,
        participants: Vec<String>,
    },

    #[serde(rename = "friendsList")]
    FriendsList(Vec<FriendSummary>),

    #[serde(rename = "directMessageHistory", rename_all = "camelCase")]
    DirectMessageHistory {
        conversation_id: ConversationId,
        messages: Vec<Message>,
    },

    #[serde(rename = "voiceParticipants")]
    VoiceParticipants(Vec<VoiceParticipantSummary>),

    #[serde(rename = "voice-user-joined")]
    VoiceUserJoined(ConnectionId),

    #[serde(rename = "voice-user-left")]
    VoiceUserLeft(ConnectionId),

    #[serde(rename = "voice-signal")]
    VoiceSignal {
        from: ConnectionId,
        to: ConnectionId,
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_event_roundtrip() {
        let event = ClientEvent::Message(MessagePayload {
            content: "hello".into(),
            kind: None,
            channel_id: Some(ChannelId("general".into())),
            server_id: Some(CommunityId("default".into())),
            conversation_id: None,
        });

        let json = serde_json::to_string(&event).unwrap();
        let restored: ClientEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, restored);
    }

    #[test]
    fn login_frame_uses_wire_names() {
        let frame = r#"{"event":"login","data":{"username":"alice","uid":"uid-1"}}"#;
        let event: ClientEvent = serde_json::from_str(frame).unwrap();
        assert_eq!(
            event,
            ClientEvent::Login {
                username: "alice".into(),
                uid: UserId("uid-1".into()),
            }
        );
    }

    #[test]
    fn dm_payload_is_detected() {
        let frame = r#"{"event":"message","data":{"content":"hi","type":"dm","conversationId":"a-b"}}"#;
        let event: ClientEvent = serde_json::from_str(frame).unwrap();
        let ClientEvent::Message(payload) = event else {
            panic!("expected message event");
        };
        assert!(payload.is_dm());
        assert_eq!(payload.conversation_id, Some(ConversationId("a-b".into())));
    }

    #[test]
    fn voice_signal_payload_passes_through() {
        let target = ConnectionId::new();
        let frame = format!(
            r#"{{"event":"voice-signal","data":{{"to":"{target}","sdp":"v=0","kind":"offer"}}}}"#
        );
        let event: ClientEvent = serde_json::from_str(&frame).unwrap();
        let ClientEvent::VoiceSignal { to, payload } = event else {
            panic!("expected voice-signal event");
        };
        assert_eq!(to, target);
        assert_eq!(payload.get("sdp").and_then(Value::as_str), Some("v=0"));
        assert_eq!(payload.get("kind").and_then(Value::as_str), Some("offer"));
    }

    #[test]
    fn intent_only_frames_have_no_data() {
        let event: ClientEvent = serde_json::from_str(r#"{"event":"getServers"}"#).unwrap();
        assert_eq!(event, ClientEvent::GetServers);
    }

    #[test]
    fn server_error_stays_scoped_to_a_string() {
        let event = ServerEvent::ServerError("Invalid invite code".into());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "serverError");
        assert_eq!(json["data"], "Invalid invite code");
    }
}
