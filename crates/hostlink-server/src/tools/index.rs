use super::status::{start_reply, status_reply};
use super::traits::{NoArguments, Tool, ToolReply, empty_schema};
use crate::context::ExecutionContext;
use crate::host::IndexRefreshRequest;
use crate::state::OperationCategory;
use serde::Deserialize;
use serde_json::{Value, json};
use std::future::{Future, ready};

#[derive(Debug, Default, Deserialize)]
pub struct IndexRefreshArguments {
    #[serde(default)]
    pub force: bool,
}

pub struct IndexRefresh;

impl Tool for IndexRefresh {
    const NAME: &'static str = "index_refresh";
    const DESCRIPTION: &'static str =
        "Refresh the host's asset index, optionally forcing a full reimport";
    type Request = IndexRefreshArguments;

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "force": { "type": "boolean", "description": "Reimport everything" }
            }
        })
    }

    fn call(
        &self,
        ctx: &ExecutionContext,
        request: IndexRefreshArguments,
    ) -> impl Future<Output = ToolReply> + Send {
        let outcome = ctx.index().start(IndexRefreshRequest {
            force: request.force,
        });
        ready(start_reply(OperationCategory::IndexRefresh, outcome))
    }
}

pub struct IndexStatus;

impl Tool for IndexStatus {
    const NAME: &'static str = "index_status";
    const DESCRIPTION: &'static str = "Report the current or last asset refresh";
    type Request = NoArguments;

    fn input_schema(&self) -> Value {
        empty_schema()
    }

    fn call(
        &self,
        ctx: &ExecutionContext,
        _request: NoArguments,
    ) -> impl Future<Output = ToolReply> + Send {
        ready(status_reply(&ctx.index().status()))
    }
}
