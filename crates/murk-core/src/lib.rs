//! Core seams and constants shared across murk crates.
//!
//! This crate provides:
//! - The [`Transmission`](transmission::Transmission) trait: the framed
//!   transport collaborator consumed by the tunnel engine.
//! - The [`Resolve`](resolve::Resolve) trait: asynchronous name
//!   resolution, implemented by `murk-dns`.
//! - Default constants for buffer sizing, handshake bounds, and
//!   keep-alive timing.

pub mod defaults;
pub mod resolve;
pub mod transmission;

pub use resolve::Resolve;
pub use transmission::{ChannelTransmission, Transmission};

/// Project name.
pub const PROJECT_NAME: &str = "murk";
/// Project version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
