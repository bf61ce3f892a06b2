use std::net::SocketAddr;

use crate::session::SessionId;

/// Buffered events per subscriber before slow subscribers start lagging.
pub const EVENT_CAPACITY: usize = 256;

/// What a monitoring front end can observe about a running server.
///
/// Events are published on a Tokio `broadcast` channel; see
/// [`crate::server::ChatServer::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Listening(SocketAddr),
    /// A connection was accepted; it has no name yet.
    Connected { id: SessionId, peer: SocketAddr },
    Joined { id: SessionId, name: String },
    Left { id: SessionId, name: String },
    /// A chat line as it was relayed to the other sessions.
    Relayed(String),
    Error(String),
    Stopped,
}
