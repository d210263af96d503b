//! Realtime stream modules.
//!
//! - `client`: websocket transport, Socket.IO handshake, and the per-context
//!   connection handle.
//! - `context`: the immutable session endpoint identity a connection is bound to.
//! - `feed`: ordered, non-replaying publish/subscribe channels.
//! - `proto`: wire messages and Socket.IO framing shared with the simulator.
//! - `session`: originator/beneficiary orchestration with console slots.

/// Streaming connection and endpoint configuration.
pub mod client;
/// Session endpoint identity.
pub mod context;
/// Typed event feeds.
pub mod feed;
/// Stream protocol messages.
pub mod proto;
/// Two-console exchange session.
pub mod session;
