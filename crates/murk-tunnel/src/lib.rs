//! Per-connection relay engine for murk tunnels.
//!
//! A [`Connection`](connection::Connection) bridges two framed
//! transmissions (the obfuscated client-facing legs) with one raw TCP
//! socket to a remote peer:
//!
//! ```text
//! inbound ──read──▶ remote ──read──▶ outbound
//! inbound ◀─keep-alive junk─┐  ┌─drain── outbound
//! ```
//!
//! The engine owns four half-duplex relay loops, an obfuscated plaintext
//! handshake codec with server/client roles, an optional keep-alive
//! subsystem, and a single-firing disposal barrier that tears every leg
//! down exactly once.
//!
//! Transport framing/encryption and name resolution are collaborators
//! behind the [`murk_core::Transmission`] and [`murk_core::Resolve`]
//! seams; this crate never looks inside a frame.

pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod socket;
pub mod tracker;

pub use config::{EndpointConfig, TunnelConfig};
pub use connection::Connection;
pub use error::TunnelError;
pub use tracker::{ConnectionGuard, ConnectionTracker};
