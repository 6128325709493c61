//! The live-client table.
//!
//! [`ClientRegistry`] is plain, non-thread-safe state. It is owned by the
//! dispatcher task and never shared, so it needs no lock. Each entry holds the
//! only `Sender` of a session's outbound queue; dropping the entry is what
//! closes that queue.

use std::{collections::HashMap, fmt, net::SocketAddr};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use crate::codec::Message;

/// Server name announced in the greeting.
pub const SERVER_NAME: &str = "listd";
/// Protocol version announced in the greeting.
pub const SERVER_VERSION: &str = "0.0";
/// Feature list announced after the greeting.
pub const FEATURES: &[&str] = &["lol"];

/// Identity of one accepted connection. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// First message every client sees: `OHAI listd 0.0`.
pub fn welcome_message() -> Message {
    Message::new("OHAI").arg(SERVER_NAME).arg(SERVER_VERSION)
}

/// Second message every client sees: `FEATURES lol`.
pub fn features_message() -> Message {
    FEATURES
        .iter()
        .fold(Message::new("FEATURES"), |message, feature| message.arg(*feature))
}

struct ClientEntry {
    peer: SocketAddr,
    outbound: UnboundedSender<Message>,
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: HashMap<SessionId, ClientEntry>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.clients.contains_key(&id)
    }

    /// Adds a session and queues the greeting pair on its outbound channel.
    ///
    /// Both messages are queued in the same step that inserts the entry, so no
    /// broadcast can reach the session ahead of them.
    pub fn register(&mut self, id: SessionId, peer: SocketAddr, outbound: UnboundedSender<Message>) {
        for message in [welcome_message(), features_message()] {
            if outbound.send(message).is_err() {
                debug!(session = %id, %peer, "session gone before greeting");
                return;
            }
        }
        self.clients.insert(id, ClientEntry { peer, outbound });
        info!(session = %id, %peer, "new connection");
    }

    /// Removes a session, closing its outbound channel.
    ///
    /// Returns `false` if the session was not registered; repeated removals are
    /// harmless.
    pub fn deregister(&mut self, id: SessionId) -> bool {
        match self.clients.remove(&id) {
            Some(ClientEntry { peer, .. }) => {
                info!(session = %id, %peer, "closed connection");
                true
            }
            None => false,
        }
    }

    /// Queues `message` for every registered session and returns how many
    /// queues accepted it.
    pub fn broadcast(&self, message: &Message) -> usize {
        let mut delivered = 0;
        for (id, client) in &self.clients {
            match client.outbound.send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => debug!(session = %id, peer = %client.peer, "outbound queue closed, skipping"),
            }
        }
        delivered
    }
}
