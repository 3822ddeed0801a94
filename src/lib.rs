//! socketry: a thin, ownership-safe layer over stream and datagram sockets.
//!
//! - [`socket`]: the exclusive-ownership [`socket::Handle`], addresses,
//!   buffer views, typed socket options and the step-based handle builder.
//! - [`server`]: a thread-per-connection stream echo server and a set of
//!   datagram echo listeners, both with race-free shutdown.
//! - [`client`]: a blocking stream echo client.
//! - [`config`]: command-line and TOML configuration for the binary.

pub mod client;
pub mod config;
pub mod error;
pub mod server;
pub mod socket;

pub use error::{Error, ErrorCode, Result};
