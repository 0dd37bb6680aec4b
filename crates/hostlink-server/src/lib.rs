//! hostlink control plane
//!
//! Runs inside a single-threaded host application and lets external clients
//! drive its long-running operations (build, test run, artifact compilation,
//! asset refresh) over a small newline-delimited JSON protocol.
//!
//! - [`state`]: per-category operation records and other shared state
//! - [`host`]: the host hook trait, the command queue and its executor
//! - [`coordinator`]: start/await/finish logic per operation category
//! - [`tools`]: the named commands clients call
//! - [`server`]: the TCP accept loop
//! - [`lifecycle`]: port acquisition, liveness and restart handling
//!
//! An embedding host implements [`host::HostOperations`], creates a
//! [`ControlPlane`] and calls [`ControlPlane::initialize`] on startup and on
//! every reload.

pub mod context;
pub mod coordinator;
pub mod host;
pub mod lifecycle;
pub mod server;
pub mod state;
pub mod tools;

pub use context::{ExecutionContext, InstanceInfo};
pub use lifecycle::{ControlPlane, Health, InitOutcome};
