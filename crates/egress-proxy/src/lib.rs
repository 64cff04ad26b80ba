//! Supervisor for a local SOCKS5 proxy daemon used to rotate the egress IP
//!
//! The daemon (by default `wireproxy`) tunnels outbound traffic; restarting it
//! yields a new public address. This crate owns that daemon's lifecycle.

#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! # Architecture
//!
//! - **Supervisor**: [`ProxySupervisor`] spawns the daemon, health-checks it,
//!   self-heals it and rotates it
//! - **Subprocess**: executable validation, secret templating and process
//!   group control
//! - **Probes**: TCP reachability and the SOCKS5 greeting
//! - **HTTP**: IP-echo lookups through the proxy, with a short-lived cache
//!
//! # Usage
//!
//! ```ignore
//! use egress_proxy::{ProxyConfig, ProxySupervisor};
//!
//! let supervisor = ProxySupervisor::new(ProxyConfig::from_env()?)?;
//! tokio::spawn(egress_proxy::signal::shutdown_on_signal(supervisor.clone()));
//!
//! supervisor.start(None).await?;
//! let ip = supervisor.get_current_egress_ip(None).await?;
//! let rotation = supervisor.rotate_ip(Some("acct-7")).await?;
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod probe;
pub mod signal;
pub mod subprocess;
pub mod supervisor;
pub mod traits;

// Re-export commonly used types
pub use config::{EchoEndpoint, EchoFormat, ProxyConfig, SupervisorTimings};
pub use error::{ProxyError, Result};
pub use http::{EchoClient, IpCache};
pub use supervisor::{
    ProxySupervisor, ProxySupervisorBuilder, RotationResult, SupervisorPhase, SupervisorStatus,
};
pub use traits::EgressIpSource;
