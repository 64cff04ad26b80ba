//! IP-echo lookups through the proxy
//!
//! [`EchoClient`] performs the HTTP requests; [`IpCache`] keeps the last
//! answer for a bounded time so routine callers do not hit the network.

pub mod cache;
pub mod client;

pub use cache::IpCache;
pub use client::{EchoClient, USER_AGENT};
