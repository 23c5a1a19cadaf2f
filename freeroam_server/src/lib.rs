//! Authoritative freeroam session server.
//!
//! The crate is organized around a single cooperative tick loop
//! ([`server::GameServer::tick`]): the transport feeds it events, it mutates
//! the session registry and entity table, fans out to script engines, and
//! pushes frames back through the transport seam.

pub mod announce;
pub mod entity;
pub mod natives;
pub mod resource;
pub mod server;
pub mod session;
pub mod streaming;
pub mod transport;
