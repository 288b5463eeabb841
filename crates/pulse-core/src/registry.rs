// Connection registry
// Decision: Three DashMaps (connections, channel members, user connections) instead of one lock
// Decision: Each connection owns a bounded mpsc queue; delivery uses try_send and never awaits
// Decision: Channel membership is computed once at connect time; a role change needs a reconnect
//
// Lock discipline: never hold a DashMap guard while touching another entry of
// the same map, and never await while holding any guard. Teardown walks only
// the closing connection's own channel list.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::error::{PulseError, Result};
use crate::identity::{Identity, UserRole};
use crate::messages::{ConnectedPayload, ServerMessage};
use crate::traits::{AuthVerifier, RecipientDirectory};

/// A broadcast group
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    User(String),
    Role(UserRole),
    Company(String),
    Admin,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::User(id) => write!(f, "user:{}", id),
            Channel::Role(role) => write!(f, "role:{}", role),
            Channel::Company(id) => write!(f, "company:{}", id),
            Channel::Admin => f.write_str("admin"),
        }
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s == "admin" {
            return Ok(Channel::Admin);
        }
        match s.split_once(':') {
            Some(("user", id)) if !id.is_empty() => Ok(Channel::User(id.to_string())),
            Some(("company", id)) if !id.is_empty() => Ok(Channel::Company(id.to_string())),
            Some(("role", role)) => role.parse().map(Channel::Role),
            _ => Err(format!("unknown channel: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle of one physical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    Subscribed,
    Closed,
}

/// Outbound frame shared by every recipient of one push
pub type Frame = Arc<ServerMessage>;

struct ConnectionEntry {
    identity: Identity,
    channels: Vec<Channel>,
    sender: mpsc::Sender<Frame>,
    connected_at: DateTime<Utc>,
}

/// What the transport layer holds for a live connection
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub identity: Identity,
    pub channels: Vec<Channel>,
    pub receiver: mpsc::Receiver<Frame>,
}

/// Summary of a live connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub identity: Identity,
    pub channels: Vec<Channel>,
    pub connected_at: DateTime<Utc>,
}

enum Delivery {
    Sent,
    Full,
    Closed,
}

pub struct ConnectionRegistry {
    verifier: Arc<dyn AuthVerifier>,
    directory: Arc<dyn RecipientDirectory>,
    outbound_buffer: usize,
    next_id: AtomicU64,
    connections: DashMap<ConnectionId, ConnectionEntry>,
    channels: DashMap<Channel, HashSet<ConnectionId>>,
    users: DashMap<String, HashSet<ConnectionId>>,
    dropped_frames: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new(
        verifier: Arc<dyn AuthVerifier>,
        directory: Arc<dyn RecipientDirectory>,
        outbound_buffer: usize,
    ) -> Self {
        Self {
            verifier,
            directory,
            outbound_buffer: outbound_buffer.max(1),
            next_id: AtomicU64::new(1),
            connections: DashMap::new(),
            channels: DashMap::new(),
            users: DashMap::new(),
            dropped_frames: AtomicU64::new(0),
        }
    }

    // ========================================================================
    // Connect / disconnect
    // ========================================================================

    /// Authenticate a credential and subscribe the new connection to its channels.
    /// Fails with `PulseError::Authentication` without creating any membership.
    pub async fn connect(&self, credential: &str) -> Result<ConnectionHandle> {
        debug!(state = ?ConnectionState::Connecting, "Connection attempt");

        let identity = match self.verifier.verify(credential).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                info!("Connection rejected: unknown or expired credential");
                return Err(PulseError::auth("unknown or expired credential"));
            }
            Err(e) => {
                warn!("Connection rejected: verifier error: {}", e);
                return Err(PulseError::auth(e.to_string()));
            }
        };
        debug!(user_id = %identity.user_id, state = ?ConnectionState::Authenticated, "Credential verified");

        let channels = self.channels_for(&identity).await;
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.outbound_buffer);

        self.connections.insert(
            id,
            ConnectionEntry {
                identity: identity.clone(),
                channels: channels.clone(),
                sender,
                connected_at: Utc::now(),
            },
        );
        for channel in &channels {
            self.channels.entry(channel.clone()).or_default().insert(id);
        }
        self.users
            .entry(identity.user_id.clone())
            .or_default()
            .insert(id);

        info!(
            connection_id = %id,
            user_id = %identity.user_id,
            role = %identity.role,
            channels = channels.len(),
            state = ?ConnectionState::Subscribed,
            "Connection subscribed"
        );

        let connected = ServerMessage::Connected(ConnectedPayload {
            message: "Connected to real-time notifications".to_string(),
            connection_id: id.as_u64(),
            user_id: identity.user_id.clone(),
            role: identity.role,
            user_room: Channel::User(identity.user_id.clone()).to_string(),
            channels: channels.iter().map(ToString::to_string).collect(),
            timestamp: Utc::now(),
        });
        self.send_to_connection(id, connected);

        Ok(ConnectionHandle {
            id,
            identity,
            channels,
            receiver,
        })
    }

    async fn channels_for(&self, identity: &Identity) -> Vec<Channel> {
        let mut channels = vec![
            Channel::User(identity.user_id.clone()),
            Channel::Role(identity.role),
        ];
        match identity.role {
            UserRole::Employer => match self.directory.companies_for_user(&identity.user_id).await {
                Ok(companies) => channels.extend(companies.into_iter().map(Channel::Company)),
                Err(e) => warn!(
                    user_id = %identity.user_id,
                    "Company lookup failed, skipping company channels: {}", e
                ),
            },
            UserRole::Admin => channels.push(Channel::Admin),
            UserRole::Jobseeker => {}
        }
        channels
    }

    /// Remove a connection and its memberships. Sibling connections of the
    /// same user are untouched. Returns false if it was already gone.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let Some((_, entry)) = self.connections.remove(&id) else {
            return false;
        };

        for channel in &entry.channels {
            if let Some(mut members) = self.channels.get_mut(channel) {
                members.remove(&id);
            }
            self.channels.remove_if(channel, |_, members| members.is_empty());
        }

        let user_id = &entry.identity.user_id;
        if let Some(mut conns) = self.users.get_mut(user_id) {
            conns.remove(&id);
        }
        self.users.remove_if(user_id, |_, conns| conns.is_empty());

        info!(
            connection_id = %id,
            user_id = %user_id,
            state = ?ConnectionState::Closed,
            "Connection closed"
        );
        true
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    fn deliver(&self, id: ConnectionId, frame: &Frame) -> Delivery {
        let Some(entry) = self.connections.get(&id) else {
            return Delivery::Closed;
        };
        match entry.sender.try_send(Arc::clone(frame)) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    fn deliver_all(&self, ids: impl IntoIterator<Item = ConnectionId>, frame: Frame) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        for id in ids {
            match self.deliver(id, &frame) {
                Delivery::Sent => delivered += 1,
                Delivery::Full => {
                    self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                    warn!(connection_id = %id, event = frame.kind(), "Outbound queue full, frame dropped");
                }
                Delivery::Closed => closed.push(id),
            }
        }
        for id in closed {
            self.disconnect(id);
        }
        delivered
    }

    fn members(&self, channel: &Channel) -> Vec<ConnectionId> {
        self.channels
            .get(channel)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn send_to_connection(&self, id: ConnectionId, message: ServerMessage) -> bool {
        self.deliver_all([id], Arc::new(message)) == 1
    }

    /// Push to every connection in `channel`. Returns how many accepted the frame.
    pub fn send_to_channel(&self, channel: &Channel, message: ServerMessage) -> usize {
        let members = self.members(channel);
        if members.is_empty() {
            debug!(channel = %channel, event = message.kind(), "No live members, push skipped");
            return 0;
        }
        self.deliver_all(members, Arc::new(message))
    }

    /// Push to the live members of `channel` whose user is in `users`.
    /// Members outside the set get nothing.
    pub fn send_to_channel_filtered(
        &self,
        channel: &Channel,
        users: &HashSet<String>,
        message: ServerMessage,
    ) -> usize {
        let members: Vec<ConnectionId> = self
            .members(channel)
            .into_iter()
            .filter(|id| {
                self.connections
                    .get(id)
                    .is_some_and(|entry| users.contains(&entry.identity.user_id))
            })
            .collect();
        if members.is_empty() {
            debug!(channel = %channel, event = message.kind(), "No eligible members, push skipped");
            return 0;
        }
        self.deliver_all(members, Arc::new(message))
    }

    /// Push once to the union of several channels
    pub fn send_to_channels(&self, channels: &[Channel], message: ServerMessage) -> usize {
        let mut ids: Vec<ConnectionId> = channels.iter().flat_map(|c| self.members(c)).collect();
        ids.sort_unstable();
        ids.dedup();
        self.deliver_all(ids, Arc::new(message))
    }

    /// Push to every live connection
    pub fn broadcast_all(&self, message: ServerMessage) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
        self.deliver_all(ids, Arc::new(message))
    }

    // ========================================================================
    // Presence
    // ========================================================================

    pub fn state(&self, id: ConnectionId) -> ConnectionState {
        if self.connections.contains_key(&id) {
            ConnectionState::Subscribed
        } else {
            ConnectionState::Closed
        }
    }

    pub fn is_user_online(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn online_user_count(&self) -> usize {
        self.users.len()
    }

    pub fn user_connection_count(&self, user_id: &str) -> usize {
        self.users.get(user_id).map(|c| c.len()).unwrap_or(0)
    }

    pub fn channel_size(&self, channel: &Channel) -> usize {
        self.channels.get(channel).map(|m| m.len()).unwrap_or(0)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Distinct online users holding `role`
    pub fn connected_users_by_role(&self, role: UserRole) -> Vec<String> {
        let mut users: Vec<String> = self
            .members(&Channel::Role(role))
            .into_iter()
            .filter_map(|id| self.connections.get(&id).map(|e| e.identity.user_id.clone()))
            .collect();
        users.sort();
        users.dedup();
        users
    }

    pub fn connection_info(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.connections.get(&id).map(|entry| ConnectionInfo {
            id,
            identity: entry.identity.clone(),
            channels: entry.channels.clone(),
            connected_at: entry.connected_at,
        })
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryJobBoard, StaticVerifier};
    use crate::messages::{NotificationCount, PongPayload};

    fn registry(buffer: usize) -> ConnectionRegistry {
        let verifier = StaticVerifier::new()
            .with("tok-j1", Identity::new("j1", UserRole::Jobseeker, "Jo"))
            .with("tok-e1", Identity::new("e1", UserRole::Employer, "Em"))
            .with("tok-a1", Identity::new("a1", UserRole::Admin, "Ad"));
        let board = InMemoryJobBoard::new();
        board.add_company_member("c1", "e1");
        ConnectionRegistry::new(Arc::new(verifier), Arc::new(board), buffer)
    }

    fn count(user_id: &str, n: u64) -> ServerMessage {
        ServerMessage::NotificationCount(NotificationCount {
            count: n,
            user_id: user_id.to_string(),
        })
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(Channel::User("u1".into()).to_string(), "user:u1");
        assert_eq!(Channel::Role(UserRole::Employer).to_string(), "role:employer");
        assert_eq!(Channel::Company("c9".into()).to_string(), "company:c9");
        assert_eq!("admin".parse::<Channel>().unwrap(), Channel::Admin);
        assert_eq!("role:admin".parse::<Channel>().unwrap(), Channel::Role(UserRole::Admin));
        assert!("user:".parse::<Channel>().is_err());
    }

    #[tokio::test]
    async fn test_connect_assigns_role_channels() {
        let registry = registry(8);

        let j = registry.connect("tok-j1").await.unwrap();
        assert_eq!(
            j.channels,
            vec![Channel::User("j1".into()), Channel::Role(UserRole::Jobseeker)]
        );

        let e = registry.connect("tok-e1").await.unwrap();
        assert!(e.channels.contains(&Channel::Company("c1".into())));

        let a = registry.connect("tok-a1").await.unwrap();
        assert!(a.channels.contains(&Channel::Admin));
        assert_eq!(registry.connection_count(), 3);
    }

    #[tokio::test]
    async fn test_connected_frame_is_first() {
        let registry = registry(8);
        let mut handle = registry.connect("tok-j1").await.unwrap();
        let frame = handle.receiver.recv().await.unwrap();
        match frame.as_ref() {
            ServerMessage::Connected(payload) => {
                assert_eq!(payload.user_id, "j1");
                assert_eq!(payload.user_room, "user:j1");
            }
            other => panic!("expected connected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_credential_creates_no_membership() {
        let registry = registry(8);
        let err = registry.connect("nope").await.unwrap_err();
        assert!(err.is_auth());
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_keeps_siblings_and_collects_empty_sets() {
        let registry = registry(8);
        let phone = registry.connect("tok-j1").await.unwrap();
        let laptop = registry.connect("tok-j1").await.unwrap();
        assert_eq!(registry.user_connection_count("j1"), 2);

        assert!(registry.disconnect(phone.id));
        assert!(!registry.disconnect(phone.id));
        assert!(registry.is_user_online("j1"));
        assert_eq!(registry.channel_size(&Channel::User("j1".into())), 1);

        registry.disconnect(laptop.id);
        assert!(!registry.is_user_online("j1"));
        assert_eq!(registry.channel_count(), 0);
        assert_eq!(registry.online_user_count(), 0);
        assert_eq!(registry.state(laptop.id), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_full_queue_drops_frame_but_keeps_connection() {
        let registry = registry(1);
        // the connected frame fills the single slot
        let handle = registry.connect("tok-j1").await.unwrap();
        let delivered = registry.send_to_channel(&Channel::User("j1".into()), count("j1", 1));
        assert_eq!(delivered, 0);
        assert_eq!(registry.dropped_frames(), 1);
        assert_eq!(registry.state(handle.id), ConnectionState::Subscribed);
    }

    #[tokio::test]
    async fn test_closed_receiver_is_reaped() {
        let registry = registry(8);
        let handle = registry.connect("tok-j1").await.unwrap();
        drop(handle.receiver);
        registry.broadcast_all(ServerMessage::Pong(PongPayload { timestamp: Utc::now() }));
        assert_eq!(registry.connection_count(), 0);
        assert!(!registry.is_user_online("j1"));
    }

    #[tokio::test]
    async fn test_send_to_channels_dedupes() {
        let registry = registry(8);
        let mut admin = registry.connect("tok-a1").await.unwrap();
        admin.receiver.recv().await.unwrap();

        let delivered = registry.send_to_channels(
            &[
                Channel::User("a1".into()),
                Channel::Role(UserRole::Admin),
                Channel::Admin,
            ],
            count("a1", 0),
        );
        assert_eq!(delivered, 1);
        assert!(admin.receiver.try_recv().is_ok());
        assert!(admin.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_connect_disconnect() {
        let registry = Arc::new(registry(8));
        let mut tasks = Vec::new();
        for i in 0..64 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let token = if i % 2 == 0 { "tok-j1" } else { "tok-e1" };
                let handle = registry.connect(token).await.unwrap();
                tokio::task::yield_now().await;
                registry.disconnect(handle.id);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.channel_count(), 0);
        assert_eq!(registry.online_user_count(), 0);
    }

    #[tokio::test]
    async fn test_connected_users_by_role() {
        let registry = registry(8);
        let _a = registry.connect("tok-j1").await.unwrap();
        let _b = registry.connect("tok-j1").await.unwrap();
        let _c = registry.connect("tok-e1").await.unwrap();
        assert_eq!(registry.connected_users_by_role(UserRole::Jobseeker), vec!["j1"]);
        assert!(registry.connected_users_by_role(UserRole::Admin).is_empty());
    }
}
