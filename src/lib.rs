//! Reverse tunnels over QUIC.
//!
//! A client behind a restrictive network connects to a public server and asks it to listen on a
//! port. Every connection the server accepts on that port is carried back through the session as a
//! channel, and the client bridges each channel to a local service.

pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod pump;
pub mod server;
pub mod session;

#[cfg(test)]
mod test_utils;

pub use error::{Result, TunnelError};
