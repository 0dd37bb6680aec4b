//! Startup, liveness and teardown of the control plane.

pub mod control_plane;
pub mod health;
pub mod port;

pub use control_plane::{ControlPlane, InitOutcome};
pub use health::Health;
pub use port::{AcquiredPort, CandidateRejection, PortError, Rejection, acquire_port};
