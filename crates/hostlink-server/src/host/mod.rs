//! Host side of the control plane: the hook trait, the command queue and
//! the executor that drains it on the host thread.

pub mod executor;
pub mod hooks;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
pub mod queue;
pub mod simulated;

pub use executor::{DedicatedExecutor, HostExecutor};
pub use hooks::{
    ArtifactOutcome, ArtifactSelection, BoxedJob, BuildOutcome, BuildRequest, HostError, HostJob,
    HostOperations, IndexRefreshOutcome, IndexRefreshRequest, TestFilter, TestMode,
    TestRunOutcome, TestRunRequest, ready_job,
};
pub use queue::{CommandQueue, QueueClosed};
pub use simulated::{SimulatedHost, SimulatedTimings};
