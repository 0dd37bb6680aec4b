use super::status::{start_reply, status_reply};
use super::traits::{NoArguments, Tool, ToolReply, empty_schema};
use crate::context::ExecutionContext;
use crate::coordinator::CancelOutcome;
use crate::host::{TestFilter, TestMode, TestRunRequest};
use crate::state::OperationCategory;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::future::{Future, ready};

const NOTHING_TO_CANCEL: &str = "No test run in progress; nothing to cancel.";

fn schema_with_mode(extra: &[(&str, &str)]) -> Value {
    let mut properties = Map::new();
    properties.insert(
        "test_mode".to_string(),
        json!({
            "type": "string",
            "enum": ["EditMode", "PlayMode"],
            "description": "Runner to use (default EditMode)"
        }),
    );
    for (name, description) in extra {
        properties.insert(
            name.to_string(),
            json!({ "type": "string", "description": description }),
        );
    }
    let required: Vec<&str> = extra.iter().map(|(name, _)| *name).collect();
    json!({ "type": "object", "properties": properties, "required": required })
}

fn start(ctx: &ExecutionContext, mode: Option<TestMode>, filter: TestFilter) -> ToolReply {
    let request = TestRunRequest {
        mode: mode.unwrap_or_default(),
        filter,
    };
    start_reply(OperationCategory::TestRun, ctx.tests().start(request))
}

#[derive(Debug, Default, Deserialize)]
pub struct RunAllArguments {
    #[serde(default)]
    pub test_mode: Option<TestMode>,
}

pub struct RunAll;

impl Tool for RunAll {
    const NAME: &'static str = "tests_run_all";
    const DESCRIPTION: &'static str = "Run every test in the given mode";
    type Request = RunAllArguments;

    fn input_schema(&self) -> Value {
        schema_with_mode(&[])
    }

    fn call(
        &self,
        ctx: &ExecutionContext,
        request: RunAllArguments,
    ) -> impl Future<Output = ToolReply> + Send {
        ready(start(ctx, request.test_mode, TestFilter::All))
    }
}

#[derive(Debug, Deserialize)]
pub struct RunSingleArguments {
    pub test_name: String,
    #[serde(default)]
    pub test_mode: Option<TestMode>,
}

pub struct RunSingle;

impl Tool for RunSingle {
    const NAME: &'static str = "tests_run_single";
    const DESCRIPTION: &'static str = "Run one test by its fully qualified name";
    type Request = RunSingleArguments;

    fn input_schema(&self) -> Value {
        schema_with_mode(&[("test_name", "Fully qualified test name")])
    }

    fn call(
        &self,
        ctx: &ExecutionContext,
        request: RunSingleArguments,
    ) -> impl Future<Output = ToolReply> + Send {
        let filter = TestFilter::Single {
            test_name: request.test_name,
        };
        ready(start(ctx, request.test_mode, filter))
    }
}

#[derive(Debug, Deserialize)]
pub struct RunRegexArguments {
    pub test_filter_regex: String,
    #[serde(default)]
    pub test_mode: Option<TestMode>,
}

pub struct RunRegex;

impl Tool for RunRegex {
    const NAME: &'static str = "tests_run_regex";
    const DESCRIPTION: &'static str = "Run every test whose full name matches a regex";
    type Request = RunRegexArguments;

    fn input_schema(&self) -> Value {
        schema_with_mode(&[("test_filter_regex", "Regex matched against full test names")])
    }

    fn call(
        &self,
        ctx: &ExecutionContext,
        request: RunRegexArguments,
    ) -> impl Future<Output = ToolReply> + Send {
        let filter = TestFilter::Regex {
            pattern: request.test_filter_regex,
        };
        ready(start(ctx, request.test_mode, filter))
    }
}

pub struct TestsStatus;

impl Tool for TestsStatus {
    const NAME: &'static str = "tests_status";
    const DESCRIPTION: &'static str = "Report the current or last test run";
    type Request = NoArguments;

    fn input_schema(&self) -> Value {
        empty_schema()
    }

    fn call(
        &self,
        ctx: &ExecutionContext,
        _request: NoArguments,
    ) -> impl Future<Output = ToolReply> + Send {
        ready(status_reply(&ctx.tests().status()))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelArguments {
    #[serde(default)]
    pub test_run_id: Option<String>,
}

pub struct TestsCancel;

impl Tool for TestsCancel {
    const NAME: &'static str = "tests_cancel";
    const DESCRIPTION: &'static str =
        "Ask the host to cancel the running test run (optionally only if it has the given id)";
    type Request = CancelArguments;

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "test_run_id": { "type": "string", "description": "Identifier returned by the start tool" }
            }
        })
    }

    fn call(
        &self,
        ctx: &ExecutionContext,
        request: CancelArguments,
    ) -> impl Future<Output = ToolReply> + Send {
        async move {
            match ctx.tests().cancel(request.test_run_id.as_deref()).await {
                Ok(outcome) => cancel_reply(outcome),
                Err(e) => ToolReply::error(format!("Test run cancellation failed: {e}")),
            }
        }
    }
}

fn cancel_reply(outcome: CancelOutcome) -> ToolReply {
    match outcome {
        CancelOutcome::NothingToCancel { requested } => {
            ToolReply::warning(NOTHING_TO_CANCEL).with_payload(json!({ "requested": requested }))
        }
        CancelOutcome::Accepted { identifier } => {
            ToolReply::ok(format!("Cancellation requested for test run {identifier}"))
                .with_payload(json!({ "identifier": identifier, "cancel": "accepted" }))
        }
        CancelOutcome::Rejected { identifier } => {
            ToolReply::warning(format!("Host refused to cancel test run {identifier}"))
                .with_payload(json!({ "identifier": identifier, "cancel": "rejected" }))
        }
        CancelOutcome::Pending { identifier } => ToolReply::warning(format!(
            "Cancellation of test run {identifier} is pending; the host has not answered yet"
        ))
        .with_payload(json!({ "identifier": identifier, "cancel": "pending" })),
    }
}
