//! The name-resolution seam consumed by the tunnel engine.

use std::fmt::Debug;
use std::net::SocketAddr;

use async_trait::async_trait;

/// Asynchronous name-to-endpoint resolution.
///
/// The tunnel engine only needs "give me an endpoint or nothing": lookup
/// failures and empty answers both surface as `None`, and the engine
/// leaves the connection un-armed. Implementations that want to report
/// richer errors expose their own typed API alongside this trait
/// (`murk-dns` does).
#[async_trait]
pub trait Resolve: Send + Sync + Debug {
    /// Resolve `host` (an IP literal or a domain name) to an endpoint
    /// with the given port.
    async fn resolve(&self, host: &str, port: u16) -> Option<SocketAddr>;
}
