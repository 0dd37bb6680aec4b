use super::status::{start_reply, status_reply};
use super::traits::{NoArguments, Tool, ToolReply, empty_schema};
use crate::context::ExecutionContext;
use crate::state::OperationCategory;
use serde_json::Value;
use std::future::{Future, ready};

pub struct BuildTrigger;

impl Tool for BuildTrigger {
    const NAME: &'static str = "build_trigger";
    const DESCRIPTION: &'static str = "Start a build of the host project";
    type Request = NoArguments;

    fn input_schema(&self) -> Value {
        empty_schema()
    }

    fn call(
        &self,
        ctx: &ExecutionContext,
        _request: NoArguments,
    ) -> impl Future<Output = ToolReply> + Send {
        ready(start_reply(OperationCategory::Build, ctx.build().start()))
    }
}

pub struct BuildStatus;

impl Tool for BuildStatus {
    const NAME: &'static str = "build_status";
    const DESCRIPTION: &'static str = "Report the current or last build";
    type Request = NoArguments;

    fn input_schema(&self) -> Value {
        empty_schema()
    }

    fn call(
        &self,
        ctx: &ExecutionContext,
        _request: NoArguments,
    ) -> impl Future<Output = ToolReply> + Send {
        ready(status_reply(&ctx.build().status()))
    }
}
