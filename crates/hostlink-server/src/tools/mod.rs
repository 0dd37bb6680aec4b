//! Tool dispatch: the named automation commands clients call.
//!
//! Start tools hand off to a coordinator and return immediately; status
//! tools read the state managers directly and never touch the queue.

pub mod artifacts;
pub mod build;
pub mod editor;
pub mod index;
pub mod registry;
pub(crate) mod status;
pub mod test_run;
pub mod traits;

pub use registry::{ToolDescriptor, ToolRegistry};
pub use traits::{ErasedTool, NoArguments, Tool, ToolReply};
