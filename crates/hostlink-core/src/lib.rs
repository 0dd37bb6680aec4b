//! Core library for hostlink
//!
//! Shared pieces of the hostlink control plane that do not depend on the
//! async runtime or on a host:
//!
//! - [`protocol`]: the newline-delimited JSON wire format
//! - [`client`]: a blocking one-shot client
//! - [`config`]: layered TOML configuration
//! - [`registry`]: the cross-process port registry file
//! - [`io`]: file locking and atomic writes used by the registry
//! - [`home`], [`logging`], [`process`]: environment plumbing

pub mod client;
pub mod config;
pub mod home;
pub mod io;
pub mod logging;
pub mod process;
pub mod protocol;
pub mod registry;

pub use protocol::{PROTOCOL_VERSION, ToolRequest, ToolResponse, ToolStatus};
