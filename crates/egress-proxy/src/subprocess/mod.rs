//! Proxy daemon process control
//!
//! - [`binary`]: executable allow-list and `PATH` resolution
//! - [`template`]: secret substitution into an owner-only temp config
//! - [`process`]: spawning, output draining and group termination

pub mod binary;
pub mod process;
pub mod template;

pub use process::DaemonProcess;
pub use template::RenderedConfig;
