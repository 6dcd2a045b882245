//! Error types for the tunnel crate.

use thiserror::Error;

/// Errors surfaced by tunnel entry points.
///
/// Async failure paths (connect errors, peer close, transport failure)
/// never surface here; they tear the connection down through its
/// disposal barrier and fire the disposed hook instead.
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid remote address: {0}")]
    Addr(#[from] std::net::AddrParseError),

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("connection already disposed")]
    Disposed,
}
