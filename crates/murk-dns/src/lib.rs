//! Async DNS resolver for murk.
//!
//! Provides a shared, caching DNS resolver backed by
//! [`hickory-resolver`](https://crates.io/crates/hickory-resolver) with
//! support for custom UDP/TCP nameservers, and implements the
//! [`murk_core::Resolve`] seam the tunnel engine resolves through.
//!
//! # Usage
//!
//! ```rust,no_run
//! use murk_dns::{DnsConfig, DnsResolver};
//!
//! # async fn example() -> Result<(), murk_dns::DnsError> {
//! let config = DnsConfig::default(); // system resolver with cache
//! let resolver = DnsResolver::new(&config)?;
//!
//! let addr = resolver.resolve_addr("example.com", 443).await?;
//! println!("resolved: {addr}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod resolver;

pub use config::{DnsConfig, DnsStrategy};
pub use error::DnsError;
pub use resolver::DnsResolver;
