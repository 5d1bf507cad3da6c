//! Event router.
//!
//! The core of the relay: resolves the acting identity of every inbound
//! event, dispatches it to an intent handler, and fans outbound events out
//! to exactly the recipient set the membership index authorizes. All state
//! lives here behind a single owner; the [`run`] loop processes one
//! command at a time to completion, so every mutation is atomic with
//! respect to every other inbound event.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use haven_shared::protocol::{
    ClientEvent, ConversationSummary, FriendSummary, MessagePayload, ServerEvent, UserSummary,
};
use haven_shared::snapshot::{CommunitiesDoc, IdentityDoc, MessagesDoc, Snapshot};
use haven_shared::types::{
    Channel, ChannelId, ChannelKind, Community, CommunityId, ConnectionId, Identity, Message,
    MessageId, MessageKind, Scope, UserId,
};
use haven_shared::RouterError;

use crate::directory::IdentityDirectory;
use crate::history::HistoryStore;
use crate::invite::InviteCodeGenerator;
use crate::membership::MembershipIndex;
use crate::persist::Persist;
use crate::registry::ConnectionRegistry;
use crate::social::SocialError;
use crate::social::SocialGraph;
use crate::voice::VoicePresence;

/// Outbound channel of one connection. Dropping it closes the transport.
pub type Outbound = mpsc::UnboundedSender<ServerEvent>;

/// Commands fed to the router task by the transport layer.
#[derive(Debug)]
pub enum RouterCommand {
    /// A transport connected; not yet authenticated.
    Connect {
        conn: ConnectionId,
        outbound: Outbound,
    },
    /// An inbound event bound to a connection handle.
    Event { conn: ConnectionId, event: ClientEvent },
    /// The transport signalled disconnect.
    Disconnect { conn: ConnectionId },
    /// Health probe: reply with current counters.
    Stats { reply: oneshot::Sender<RouterStats> },
}

/// Counters exposed on the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    pub connections: usize,
    pub communities: usize,
    pub identities: usize,
}

/// The event-routing core. Owns every registry; must be driven by a
/// single task (see [`run`]).
pub struct Router {
    directory: IdentityDirectory,
    registry: ConnectionRegistry,
    membership: MembershipIndex,
    history: HistoryStore,
    social: SocialGraph,
    voice: VoicePresence,
    invites: InviteCodeGenerator,
    /// Live transports, authenticated or not. Delivery always goes
    /// through here; the registry only decides who qualifies.
    sockets: HashMap<ConnectionId, Outbound>,
    persist: Box<dyn Persist>,
}

impl Router {
    pub fn new(persist: Box<dyn Persist>) -> Self {
        Self::from_snapshot(Snapshot::default(), persist)
    }

    /// Restore the registries from persisted snapshot documents.
    pub fn from_snapshot(snapshot: Snapshot, persist: Box<dyn Persist>) -> Self {
        let mut scopes: BTreeMap<Scope, Vec<Message>> = BTreeMap::new();
        for (id, messages) in snapshot.messages.channels {
            scopes.insert(Scope::Community(id), messages);
        }
        for (id, messages) in snapshot.messages.conversations {
            scopes.insert(Scope::Conversation(id), messages);
        }

        Self {
            directory: IdentityDirectory::from_identities(snapshot.identity.users),
            registry: ConnectionRegistry::new(),
            membership: MembershipIndex::from_snapshot(
                snapshot.communities.communities,
                snapshot.identity.conversations,
            ),
            history: HistoryStore::from_scopes(scopes),
            social: SocialGraph::from_snapshot(
                snapshot.identity.friend_requests,
                snapshot.identity.friends,
                snapshot.identity.notifications,
            ),
            voice: VoicePresence::new(),
            invites: InviteCodeGenerator::default(),
            sockets: HashMap::new(),
            persist,
        }
    }

    /// Replace the invite generator (tests inject tiny code spaces).
    pub fn with_invite_generator(mut self, invites: InviteCodeGenerator) -> Self {
        self.invites = invites;
        self
    }

    /// Seed the default community when none exists yet.
    pub fn ensure_default_community(&mut self) {
        if self.membership.community_count() > 0 {
            return;
        }
        let id = CommunityId("default".to_string());
        self.membership.insert_community(Community {
            id: id.clone(),
            name: "General Chat".to_string(),
            owner_id: UserId("system".to_string()),
            invite_code: "WELCOME".to_string(),
            channels: vec![
                Channel {
                    id: ChannelId("general".to_string()),
                    name: "general".to_string(),
                    kind: ChannelKind::Text,
                    server_id: id.clone(),
                },
                Channel {
                    id: ChannelId("voice".to_string()),
                    name: "Voice Chat".to_string(),
                    kind: ChannelKind::Voice,
                    server_id: id.clone(),
                },
            ],
            members: Vec::new(),
        });
        info!("seeded default community");
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            connections: self.sockets.len(),
            communities: self.membership.community_count(),
            identities: self.directory.summaries().len(),
        }
    }

    // -- lifecycle -------------------------------------------------------

    /// A transport connected. The connection stays unauthenticated until
    /// its `login` intent arrives.
    pub fn connect(&mut self, conn: ConnectionId, outbound: Outbound) {
        debug!(conn = %conn, total = self.sockets.len() + 1, "transport connected");
        self.sockets.insert(conn, outbound);
    }

    /// The transport signalled disconnect: voice cleanup, presence flip,
    /// departure broadcast.
    pub fn disconnect(&mut self, conn: ConnectionId) {
        if let Some((channel, remaining)) = self.voice.leave(&conn) {
            debug!(conn = %conn, channel = %channel, "voice cleanup on disconnect");
            for peer in remaining {
                self.send(&peer, ServerEvent::VoiceUserLeft(conn));
            }
        }

        self.sockets.remove(&conn);

        if let Some(user_id) = self.registry.unregister(&conn) {
            self.directory.mark_offline(&user_id);
            self.broadcast(ServerEvent::UserLeft(user_id.clone()));
            self.broadcast(ServerEvent::UserList(self.directory.summaries()));
            self.persist_identity();
            info!(conn = %conn, user = %user_id, "user disconnected");
        }
    }

    /// Dispatch one inbound event. Errors are reported back to the
    /// originating connection only; nothing here is fatal.
    pub fn handle_event(&mut self, conn: ConnectionId, event: ClientEvent) {
        let friend_intent = matches!(
            event,
            ClientEvent::SendFriendRequest { .. } | ClientEvent::RespondToFriendRequest { .. }
        );

        let result = match event {
            ClientEvent::Login { username, uid } => self.on_login(conn, username, uid),
            ClientEvent::Message(payload) => self.on_message(conn, payload),
            ClientEvent::CreateServer { name, owner_id } => {
                self.on_create_server(conn, name, owner_id)
            }
            ClientEvent::JoinServer { invite_code } => self.on_join_server(conn, invite_code),
            ClientEvent::LeaveServer { server_id } => self.on_leave_server(conn, server_id),
            ClientEvent::SelectServer { server_id } => self.on_select_server(conn, server_id),
            ClientEvent::CreateConversation { participant_id } => {
                self.on_create_conversation(conn, participant_id)
            }
            ClientEvent::GetDirectMessageHistory { conversation_id } => {
                self.on_dm_history(conn, conversation_id)
            }
            ClientEvent::SendFriendRequest { target_username } => {
                self.on_send_friend_request(conn, target_username)
            }
            ClientEvent::RespondToFriendRequest { from_id, accepted } => {
                self.on_respond_to_friend_request(conn, from_id, accepted)
            }
            ClientEvent::JoinVoiceChannel {
                channel_id,
                username,
                server_id,
            } => self.on_join_voice(conn, channel_id, username, server_id),
            ClientEvent::LeaveVoiceChannel { channel_id, .. } => {
                self.on_leave_voice(conn, channel_id)
            }
            ClientEvent::VoiceSignal { to, payload } => self.on_voice_signal(conn, to, payload),
            ClientEvent::GetServers => self.on_get_servers(conn),
            ClientEvent::GetFriendRequests => self.on_get_friend_requests(conn),
            ClientEvent::GetFriends => self.on_get_friends(conn),
            ClientEvent::GetNotifications => self.on_get_notifications(conn),
            ClientEvent::MarkNotificationRead { notification_id } => {
                self.on_mark_notification_read(conn, notification_id)
            }
        };

        match result {
            Ok(()) => {}
            // Unresolved connections likely raced a disconnect; drop quietly.
            Err(RouterError::NotAuthenticated) => {
                debug!(conn = %conn, "dropping event from unauthenticated connection");
            }
            Err(err) => {
                warn!(conn = %conn, error = %err, "rejecting event");
                let message = err.to_string();
                let report = if friend_intent {
                    ServerEvent::FriendRequestError(message)
                } else {
                    ServerEvent::ServerError(message)
                };
                self.send(&conn, report);
            }
        }
    }

    // -- intent handlers ---------------------------------------------------

    /// Session bootstrap. Idempotent: a repeated login on the same handle
    /// replays the same full-state push.
    fn on_login(&mut self, conn: ConnectionId, username: String, uid: UserId) -> Result<(), RouterError> {
        if username.trim().is_empty() || uid.as_str().is_empty() {
            return Err(RouterError::Validation(
                "login requires username and uid".to_string(),
            ));
        }

        // Single-session policy: a fresh login displaces (and closes) any
        // previous handle for this identity.
        if let Some(displaced) = self.registry.register(conn, uid.clone()) {
            info!(user = %uid, old = %displaced, "closing displaced session");
            self.sockets.remove(&displaced);
        }

        let identity = self.directory.mark_online(&uid, &username).clone();
        info!(conn = %conn, user = %uid, username = %identity.username, "user logged in");

        // Presence is globally visible: broadcast to every registered
        // connection.
        self.broadcast_except(
            &conn,
            ServerEvent::UserJoined(UserSummary {
                id: identity.user_id.clone(),
                username: identity.username.clone(),
                status: identity.status,
            }),
        );
        self.broadcast(ServerEvent::UserList(self.directory.summaries()));

        // Full-state push to the new connection, in bootstrap order.
        self.send(&conn, ServerEvent::ServerUserList(self.peer_list(&uid)));

        let mut backlog = Vec::new();
        for community in self.membership.communities_of(&uid) {
            backlog.extend_from_slice(self.history.read(&Scope::Community(community.id.clone())));
        }
        self.send(&conn, ServerEvent::MessageHistory(backlog));

        self.send(&conn, ServerEvent::Servers(self.servers_of(&uid)));
        self.send(
            &conn,
            ServerEvent::FriendRequests(self.social.requests_for(&uid).to_vec()),
        );
        self.send(
            &conn,
            ServerEvent::Notifications(self.social.notifications_for(&uid).to_vec()),
        );
        self.send(
            &conn,
            ServerEvent::Conversations(
                self.membership
                    .conversations_of(&uid)
                    .into_iter()
                    .map(|c| ConversationSummary {
                        id: c.id.clone(),
                        participants: c.participants.clone(),
                    })
                    .collect(),
            ),
        );
        self.send(&conn, ServerEvent::FriendsList(self.friend_list(&uid)));

        self.persist_identity();
        Ok(())
    }

    fn on_message(&mut self, conn: ConnectionId, payload: MessagePayload) -> Result<(), RouterError> {
        let identity = self.resolve(&conn)?;
        if payload.is_dm() {
            self.route_direct_message(&identity, payload)
        } else {
            self.route_channel_message(&identity, payload)
        }
    }

    /// Direct message: append to the conversation scope, then deliver to
    /// exactly the two participants that are currently connected.
    fn route_direct_message(
        &mut self,
        author: &Identity,
        payload: MessagePayload,
    ) -> Result<(), RouterError> {
        let conversation_id = payload.conversation_id.ok_or_else(|| {
            RouterError::Validation("direct message requires conversationId".to_string())
        })?;
        let participants = self
            .membership
            .conversation(&conversation_id)
            .ok_or_else(|| RouterError::NotFound("Conversation not found".to_string()))?
            .participant_ids
            .clone();

        let message = self.history.append(
            Scope::Conversation(conversation_id.clone()),
            Message {
                id: MessageId::default(),
                content: payload.content,
                author: author.username.clone(),
                author_id: author.user_id.clone(),
                timestamp: Utc::now(),
                kind: MessageKind::Dm,
                channel_id: None,
                server_id: None,
                conversation_id: Some(conversation_id),
            },
        );
        self.persist_messages();

        for participant in &participants {
            self.send_to_user(participant, ServerEvent::Message(message.clone()));
        }
        Ok(())
    }

    /// Channel message: append to the community scope, then deliver to
    /// community members intersected with registered connections. Members
    /// that are offline still see the message on their next replay.
    fn route_channel_message(
        &mut self,
        author: &Identity,
        payload: MessagePayload,
    ) -> Result<(), RouterError> {
        let channel_id = payload
            .channel_id
            .ok_or_else(|| RouterError::Validation("message requires channelId".to_string()))?;
        let server_id = payload
            .server_id
            .ok_or_else(|| RouterError::Validation("message requires serverId".to_string()))?;
        let members = self
            .membership
            .community(&server_id)
            .ok_or_else(|| RouterError::NotFound("Server not found".to_string()))?
            .members
            .clone();

        let message = self.history.append(
            Scope::Community(server_id.clone()),
            Message {
                id: MessageId::default(),
                content: payload.content,
                author: author.username.clone(),
                author_id: author.user_id.clone(),
                timestamp: Utc::now(),
                kind: MessageKind::Text,
                channel_id: Some(channel_id),
                server_id: Some(server_id),
                conversation_id: None,
            },
        );
        self.persist_messages();

        for member in &members {
            self.send_to_user(member, ServerEvent::Message(message.clone()));
        }
        Ok(())
    }

    fn on_create_server(
        &mut self,
        conn: ConnectionId,
        name: String,
        owner_id: UserId,
    ) -> Result<(), RouterError> {
        let identity = self.resolve(&conn)?;
        if name.trim().is_empty() {
            return Err(RouterError::Validation("server name is required".to_string()));
        }

        let invite_code = self
            .invites
            .generate(self.membership.used_invite_codes())
            .map_err(|_| {
                RouterError::ResourceExhausted(
                    "Failed to create server - please try again".to_string(),
                )
            })?;

        let id = self.membership.next_community_id();
        let community = self
            .membership
            .create_community(id, name, owner_id, invite_code, identity.user_id.clone())
            .clone();
        self.persist_communities();

        // Only the creator learns about the new community; other members
        // arrive via the invite code.
        self.send(&conn, ServerEvent::ServerCreated(community.clone()));
        self.send(&conn, ServerEvent::Servers(self.servers_of(&identity.user_id)));
        self.send(
            &conn,
            ServerEvent::ServerUserList(self.member_summaries(&community)),
        );
        Ok(())
    }

    fn on_join_server(&mut self, conn: ConnectionId, invite_code: String) -> Result<(), RouterError> {
        let identity = self.resolve(&conn)?;
        let community_id = self
            .membership
            .find_by_invite_code(&invite_code)
            .ok_or_else(|| RouterError::NotFound("Invalid invite code".to_string()))?
            .id
            .clone();

        // Idempotent: joining twice leaves the member set unchanged.
        self.membership
            .add_member(&community_id, identity.user_id.clone());
        let community = self
            .membership
            .community(&community_id)
            .ok_or_else(|| RouterError::NotFound("Invalid invite code".to_string()))?
            .clone();
        self.persist_communities();

        self.send(&conn, ServerEvent::Servers(self.servers_of(&identity.user_id)));
        self.send(
            &conn,
            ServerEvent::ServerUserList(self.member_summaries(&community)),
        );
        let message = format!("Successfully joined {}", community.name);
        self.send(
            &conn,
            ServerEvent::ServerJoined {
                server: community,
                message,
            },
        );
        Ok(())
    }

    fn on_leave_server(&mut self, conn: ConnectionId, server_id: CommunityId) -> Result<(), RouterError> {
        let identity = self.resolve(&conn)?;
        if self.membership.community(&server_id).is_none() {
            return Err(RouterError::NotFound("Server not found".to_string()));
        }

        self.membership.remove_member(&server_id, &identity.user_id);
        self.persist_communities();

        self.send(&conn, ServerEvent::Servers(self.servers_of(&identity.user_id)));
        self.send(&conn, ServerEvent::ServerLeft { server_id });
        Ok(())
    }

    /// History + member-list replay for one community.
    fn on_select_server(&mut self, conn: ConnectionId, server_id: CommunityId) -> Result<(), RouterError> {
        self.resolve(&conn)?;
        let community = self
            .membership
            .community(&server_id)
            .ok_or_else(|| RouterError::NotFound("Server not found".to_string()))?
            .clone();

        self.send(
            &conn,
            ServerEvent::MessageHistory(
                self.history.read(&Scope::Community(server_id)).to_vec(),
            ),
        );
        self.send(
            &conn,
            ServerEvent::ServerUserList(self.member_summaries(&community)),
        );
        Ok(())
    }

    fn on_create_conversation(
        &mut self,
        conn: ConnectionId,
        participant_username: String,
    ) -> Result<(), RouterError> {
        let identity = self.resolve(&conn)?;
        let target = self
            .directory
            .find_by_username(&participant_username)
            .cloned()
            .ok_or_else(|| RouterError::NotFound("User not found".to_string()))?;

        let conversation = self
            .membership
            .ensure_conversation(
                (&identity.user_id, &identity.username),
                (&target.user_id, &target.username),
            )
            .clone();
        self.persist_identity();

        let created = ServerEvent::ConversationCreated {
            conversation_id: conversation.id.clone(),
            participants: conversation.participants.clone(),
        };
        self.send(&conn, created.clone());
        if target.user_id != identity.user_id {
            self.send_to_user(&target.user_id, created);
        }
        Ok(())
    }

    fn on_dm_history(
        &mut self,
        conn: ConnectionId,
        conversation_id: haven_shared::types::ConversationId,
    ) -> Result<(), RouterError> {
        self.resolve(&conn)?;
        if self.membership.conversation(&conversation_id).is_none() {
            return Err(RouterError::NotFound("Conversation not found".to_string()));
        }

        let messages = self
            .history
            .read(&Scope::Conversation(conversation_id.clone()))
            .to_vec();
        self.send(
            &conn,
            ServerEvent::DirectMessageHistory {
                conversation_id,
                messages,
            },
        );
        Ok(())
    }

    fn on_send_friend_request(
        &mut self,
        conn: ConnectionId,
        target_username: String,
    ) -> Result<(), RouterError> {
        let identity = self.resolve(&conn)?;
        let target = self
            .directory
            .find_by_username(&target_username)
            .cloned()
            .ok_or_else(|| map_social(SocialError::UserNotFound))?;

        let (_, notification) = self
            .social
            .request_friendship(&identity, &target)
            .map_err(map_social)?;
        self.persist_identity();

        // If the target is online it learns immediately; otherwise the
        // request waits in its pending inbox for the next login replay.
        self.send_to_user(&target.user_id, ServerEvent::NewNotification(notification));
        self.send_to_user(
            &target.user_id,
            ServerEvent::FriendRequests(self.social.requests_for(&target.user_id).to_vec()),
        );
        self.send(&conn, ServerEvent::FriendRequestSent { target_username });
        Ok(())
    }

    fn on_respond_to_friend_request(
        &mut self,
        conn: ConnectionId,
        from_id: UserId,
        accepted: bool,
    ) -> Result<(), RouterError> {
        let identity = self.resolve(&conn)?;
        let response = self
            .social
            .respond(&identity.user_id, &from_id, accepted)
            .map_err(map_social)?;

        if response.accepted {
            let conversation = self
                .membership
                .ensure_conversation(
                    (&identity.user_id, &identity.username),
                    (&from_id, &response.request.from_username),
                )
                .clone();

            self.send_to_user(
                &from_id,
                ServerEvent::FriendRequestAccepted {
                    by_username: identity.username.clone(),
                    conversation_id: conversation.id.clone(),
                    participants: conversation.participants.clone(),
                },
            );
            self.send(
                &conn,
                ServerEvent::FriendRequestAccepted {
                    by_username: response.request.from_username.clone(),
                    conversation_id: conversation.id.clone(),
                    participants: conversation.participants.clone(),
                },
            );

            let created = ServerEvent::ConversationCreated {
                conversation_id: conversation.id.clone(),
                participants: conversation.participants.clone(),
            };
            self.send(&conn, created.clone());
            self.send_to_user(&from_id, created);
        }

        // Both sides see their refreshed pending lists.
        self.send_to_user(
            &from_id,
            ServerEvent::FriendRequests(self.social.requests_for(&from_id).to_vec()),
        );
        self.send(
            &conn,
            ServerEvent::FriendRequests(self.social.requests_for(&identity.user_id).to_vec()),
        );

        self.persist_identity();
        Ok(())
    }

    /// Voice join: full-mesh discovery handshake. Every existing
    /// participant learns the newcomer's handle, the newcomer learns every
    /// existing handle, then receives the full participant list.
    fn on_join_voice(
        &mut self,
        conn: ConnectionId,
        channel_id: ChannelId,
        username: String,
        server_id: CommunityId,
    ) -> Result<(), RouterError> {
        let identity = self.resolve(&conn)?;
        debug!(conn = %conn, channel = %channel_id, server = %server_id, "voice join");

        let outcome = self
            .voice
            .join(channel_id.clone(), conn, identity.user_id, username);
        if let Some((previous, remaining)) = outcome.departed {
            debug!(conn = %conn, from = %previous, to = %channel_id, "voice channel switch");
            for peer in remaining {
                self.send(&peer, ServerEvent::VoiceUserLeft(conn));
            }
        }
        for peer in outcome.peers {
            self.send(&peer, ServerEvent::VoiceUserJoined(conn));
            self.send(&conn, ServerEvent::VoiceUserJoined(peer));
        }
        self.send(
            &conn,
            ServerEvent::VoiceParticipants(self.voice.participants_of(&channel_id)),
        );
        Ok(())
    }

    fn on_leave_voice(&mut self, conn: ConnectionId, channel_id: ChannelId) -> Result<(), RouterError> {
        self.resolve(&conn)?;
        if let Some((channel, remaining)) = self.voice.leave(&conn) {
            debug!(conn = %conn, requested = %channel_id, actual = %channel, "voice leave");
            for peer in remaining {
                self.send(&peer, ServerEvent::VoiceUserLeft(conn));
            }
        }
        Ok(())
    }

    /// Pure pass-through: deliver the opaque payload to the target handle
    /// if it is registered, silently drop otherwise.
    fn on_voice_signal(
        &mut self,
        conn: ConnectionId,
        to: ConnectionId,
        payload: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), RouterError> {
        self.resolve(&conn)?;
        if self.registry.is_registered(&to) {
            self.send(&to, ServerEvent::VoiceSignal { from: conn, to, payload });
        } else {
            debug!(from = %conn, to = %to, "dropping signal for unregistered target");
        }
        Ok(())
    }

    fn on_get_servers(&mut self, conn: ConnectionId) -> Result<(), RouterError> {
        let identity = self.resolve(&conn)?;
        self.send(&conn, ServerEvent::Servers(self.servers_of(&identity.user_id)));
        Ok(())
    }

    fn on_get_friend_requests(&mut self, conn: ConnectionId) -> Result<(), RouterError> {
        let identity = self.resolve(&conn)?;
        self.send(
            &conn,
            ServerEvent::FriendRequests(self.social.requests_for(&identity.user_id).to_vec()),
        );
        Ok(())
    }

    fn on_get_friends(&mut self, conn: ConnectionId) -> Result<(), RouterError> {
        let identity = self.resolve(&conn)?;
        self.send(&conn, ServerEvent::FriendsList(self.friend_list(&identity.user_id)));
        Ok(())
    }

    fn on_get_notifications(&mut self, conn: ConnectionId) -> Result<(), RouterError> {
        let identity = self.resolve(&conn)?;
        self.send(
            &conn,
            ServerEvent::Notifications(self.social.notifications_for(&identity.user_id).to_vec()),
        );
        Ok(())
    }

    fn on_mark_notification_read(
        &mut self,
        conn: ConnectionId,
        notification_id: String,
    ) -> Result<(), RouterError> {
        let identity = self.resolve(&conn)?;
        self.social
            .acknowledge_notification(&identity.user_id, &notification_id);
        self.persist_identity();
        self.send(
            &conn,
            ServerEvent::Notifications(self.social.notifications_for(&identity.user_id).to_vec()),
        );
        Ok(())
    }

    // -- recipient resolution & delivery ---------------------------------

    fn resolve(&self, conn: &ConnectionId) -> Result<Identity, RouterError> {
        let user_id = self
            .registry
            .resolve(conn)
            .ok_or(RouterError::NotAuthenticated)?;
        self.directory
            .get(user_id)
            .cloned()
            .ok_or(RouterError::NotAuthenticated)
    }

    fn send(&self, conn: &ConnectionId, event: ServerEvent) {
        if let Some(outbound) = self.sockets.get(conn) {
            // A closed receiver means the transport is going away; the
            // disconnect command will clean up.
            let _ = outbound.send(event);
        }
    }

    /// Deliver to the connection currently registered for an identity, if
    /// any. Offline identities are skipped; durable state already carries
    /// whatever they missed.
    fn send_to_user(&self, user_id: &UserId, event: ServerEvent) {
        if let Some(conn) = self.registry.connection_for(user_id) {
            self.send(&conn, event);
        }
    }

    /// Broadcast to every currently registered connection.
    fn broadcast(&self, event: ServerEvent) {
        for conn in self.registry.connections() {
            self.send(conn, event.clone());
        }
    }

    fn broadcast_except(&self, skip: &ConnectionId, event: ServerEvent) {
        for conn in self.registry.connections() {
            if conn != skip {
                self.send(conn, event.clone());
            }
        }
    }

    fn member_summaries(&self, community: &Community) -> Vec<UserSummary> {
        community
            .members
            .iter()
            .filter_map(|uid| self.directory.get(uid))
            .map(|identity| UserSummary {
                id: identity.user_id.clone(),
                username: identity.username.clone(),
                status: identity.status,
            })
            .collect()
    }

    /// Combined member list across every community the identity belongs
    /// to (the community-scoped peer list of the bootstrap).
    fn peer_list(&self, user_id: &UserId) -> Vec<UserSummary> {
        let mut peers: BTreeSet<UserId> = BTreeSet::new();
        for community in self.membership.communities_of(user_id) {
            peers.extend(community.members.iter().cloned());
        }
        peers
            .iter()
            .filter_map(|uid| self.directory.get(uid))
            .map(|identity| UserSummary {
                id: identity.user_id.clone(),
                username: identity.username.clone(),
                status: identity.status,
            })
            .collect()
    }

    fn servers_of(&self, user_id: &UserId) -> Vec<Community> {
        self.membership
            .communities_of(user_id)
            .into_iter()
            .cloned()
            .collect()
    }

    fn friend_list(&self, user_id: &UserId) -> Vec<FriendSummary> {
        self.social
            .friends_of(user_id)
            .filter_map(|uid| self.directory.get(uid))
            .map(|identity| FriendSummary {
                uid: identity.user_id.clone(),
                username: identity.username.clone(),
            })
            .collect()
    }

    // -- persistence (fire-and-forget) ------------------------------------

    fn persist_communities(&self) {
        self.persist.save_communities(CommunitiesDoc {
            communities: self.membership.communities().clone(),
        });
    }

    fn persist_messages(&self) {
        let mut doc = MessagesDoc::default();
        for (scope, messages) in self.history.scopes() {
            match scope {
                Scope::Community(id) => {
                    doc.channels.insert(id.clone(), messages.clone());
                }
                Scope::Conversation(id) => {
                    doc.conversations.insert(id.clone(), messages.clone());
                }
            }
        }
        self.persist.save_messages(doc);
    }

    fn persist_identity(&self) {
        self.persist.save_identity(IdentityDoc {
            users: self.directory.identities().cloned().collect(),
            friends: self.social.friends().clone(),
            friend_requests: self.social.requests().clone(),
            notifications: self.social.notifications().clone(),
            conversations: self.membership.conversations().clone(),
        });
    }
}

fn map_social(err: SocialError) -> RouterError {
    match err {
        SocialError::UserNotFound | SocialError::RequestNotFound => {
            RouterError::NotFound(err.to_string())
        }
        other => RouterError::Conflict(other.to_string()),
    }
}

/// Drive the router from a command channel. This is the single-writer
/// loop: commands are processed strictly one at a time, which is what
/// makes the lock-free registries sound.
pub async fn run(mut router: Router, mut commands: mpsc::UnboundedReceiver<RouterCommand>) {
    while let Some(command) = commands.recv().await {
        match command {
            RouterCommand::Connect { conn, outbound } => router.connect(conn, outbound),
            RouterCommand::Event { conn, event } => router.handle_event(conn, event),
            RouterCommand::Disconnect { conn } => router.disconnect(conn),
            RouterCommand::Stats { reply } => {
                let _ = reply.send(router.stats());
            }
        }
    }
    info!("router command channel closed, shutting down");
}
