//! Error types for the relay, split by the layer that produces them.

use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::session::SessionId;

/// Operator-supplied settings that cannot be turned into a [`crate::config::ServerConfig`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid port '{input}': expected a number between 0 and 65535")]
    InvalidPort { input: String },

    #[error("grace period must be greater than zero")]
    ZeroGracePeriod,

    #[error("send timeout must be greater than zero")]
    ZeroSendTimeout,
}

/// Listener failures. Only startup failures surface as errors; accept
/// failures while running are logged by the accept loop instead.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("could not listen on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("listener has no local address")]
    LocalAddr(#[source] io::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session {id} is already registered")]
    AlreadyRegistered { id: SessionId },
}

/// Reasons a session ended abnormally. Every variant still runs the normal
/// close path; the error only decides what gets logged.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("connection closed before a display name was sent")]
    ClosedBeforeName,

    #[error("display name must not be empty")]
    EmptyName,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("session i/o failed")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("failed to connect to {addr}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("not connected to a server")]
    NotConnected,

    #[error("a chat message must fit on one line")]
    MultiLine,

    #[error("client i/o failed")]
    Io(#[from] io::Error),
}
