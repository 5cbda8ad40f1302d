// Channel registry and fan-out engine.
// Connections register an outbound sender under a channel name; a broadcast
// clones the member snapshot under the lock and delivers outside it, so a
// slow or dead member never stalls the rest.
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, HubError>;

#[derive(thiserror::Error, Debug)]
pub enum HubError {
    #[error("channel name must be non-empty")]
    EmptyChannel,
}

/// Opaque per-connection identity, generated at accept time.
///
/// Uniqueness for the process lifetime is the only requirement; the value
/// carries no secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

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

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One channel member: connection identity plus its outbound queue.
#[derive(Debug, Clone)]
pub struct Member {
    id: ConnectionId,
    sender: mpsc::Sender<Bytes>,
}

impl Member {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Channel registry plus broadcaster.
///
/// Maps channel names to their members in subscription order. Channel
/// entries are created lazily on first subscribe and kept once created,
/// even after every member has left; memory grows with distinct channel
/// names ever seen.
///
/// ```
/// use hub_broker::{ConnectionId, Hub};
///
/// let hub = Hub::new();
/// let (tx, mut rx) = tokio::sync::mpsc::channel(8);
/// let id = ConnectionId::new();
/// hub.register("room1", id, tx).expect("register");
/// let delivered = hub.broadcast("room1", bytes::Bytes::from_static(b"hi"));
/// assert_eq!(delivered, 1);
/// assert_eq!(rx.try_recv().expect("recv"), bytes::Bytes::from_static(b"hi"));
/// ```
#[derive(Debug, Default)]
pub struct Hub {
    channels: Mutex<HashMap<String, Vec<Member>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a channel. Idempotent: a connection appears at
    /// most once per channel.
    pub fn register(
        &self,
        channel: &str,
        id: ConnectionId,
        sender: mpsc::Sender<Bytes>,
    ) -> Result<()> {
        if channel.is_empty() {
            return Err(HubError::EmptyChannel);
        }
        let mut channels = self.channels.lock();
        let members = channels.entry(channel.to_string()).or_default();
        if members.iter().all(|member| member.id != id) {
            members.push(Member { id, sender });
        }
        Ok(())
    }

    /// Remove a connection from a channel. No-op when the channel or the
    /// member is absent, so close racing close is harmless.
    pub fn deregister(&self, channel: &str, id: ConnectionId) {
        let mut channels = self.channels.lock();
        if let Some(members) = channels.get_mut(channel) {
            members.retain(|member| member.id != id);
        }
    }

    /// Snapshot of a channel's members in subscription order, consistent
    /// with every registration serialized before the call.
    pub fn members(&self, channel: &str) -> Vec<Member> {
        self.channels
            .lock()
            .get(channel)
            .cloned()
            .unwrap_or_default()
    }

    pub fn member_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .get(channel)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn contains_channel(&self, channel: &str) -> bool {
        self.channels.lock().contains_key(channel)
    }

    /// Deliver a payload to every current member of a channel, in
    /// subscription order. Returns the number of queues the payload was
    /// handed to.
    ///
    /// A full member queue drops that member's copy; a closed queue marks
    /// the member for removal. Neither aborts delivery to the rest.
    pub fn broadcast(&self, channel: &str, payload: Bytes) -> usize {
        let members = self.members(channel);
        let mut closed = Vec::new();
        let mut delivered = 0usize;
        for member in &members {
            match member.sender.try_send(payload.clone()) {
                Ok(()) => {
                    delivered += 1;
                    metrics::counter!("hub_broadcast_delivered_total").increment(1);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    metrics::counter!("hub_broadcast_dropped_total").increment(1);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    closed.push(member.id);
                }
            }
        }
        for id in closed {
            self.deregister(channel, id);
        }
        delivered
    }
}
