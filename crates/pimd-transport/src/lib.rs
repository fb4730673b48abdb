//! Unix-domain-socket listener and connector.
//!
//! The broker only ever speaks to local clients (§1 Non-goals exclude any
//! networked transport), so this crate is a thin, concrete wrapper around
//! `tokio::net::UnixListener`/`UnixStream` rather than a generic transport
//! abstraction: one socket kind, one accept loop, no handshake negotiation
//! beyond the `Hello` greeting the wire layer already carries.

mod error;
mod listener;

pub use error::TransportError;
pub use listener::{BrokerListener, BrokerStream};
