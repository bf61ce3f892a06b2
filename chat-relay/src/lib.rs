//! Line-oriented TCP chat relay.
//!
//! Clients connect, send a display name as their first line, and every line
//! after that is relayed to all other connected clients. Each module focuses
//! on a concrete responsibility:
//!
//! - [`session`] runs one connection through its lifecycle, from name
//!   handshake to close.
//! - [`registry`] is the shared set of named sessions, guarded by one lock.
//! - [`broadcast`] fans a message out to a snapshot of the registry.
//! - [`server`] accepts connections and coordinates shutdown.
//! - [`message`] renders wire lines and provides async line I/O helpers.
//! - [`client`] drives the protocol from the client side and reports events
//!   to a front end; [`terminal`] is the stdin/stdout front end.
//! - [`config`], [`cli`], [`error`] and [`events`] hold the supporting types.
//!
//! Integration tests under `tests/` run real TCP sessions against an
//! in-process server and the compiled binary.

pub mod broadcast;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod message;
pub mod registry;
pub mod server;
pub mod session;
pub mod terminal;
