use super::status::{start_reply, status_reply};
use super::traits::{NoArguments, Tool, ToolReply, empty_schema};
use crate::context::ExecutionContext;
use crate::host::ArtifactSelection;
use crate::state::OperationCategory;
use serde::Deserialize;
use serde_json::{Value, json};
use std::future::{Future, ready};

fn start(ctx: &ExecutionContext, selection: ArtifactSelection) -> ToolReply {
    start_reply(
        OperationCategory::ArtifactBatch,
        ctx.artifacts().start(selection),
    )
}

pub struct CompileAll;

impl Tool for CompileAll {
    const NAME: &'static str = "artifacts_compile_all";
    const DESCRIPTION: &'static str = "Compile every artifact the host knows about";
    type Request = NoArguments;

    fn input_schema(&self) -> Value {
        empty_schema()
    }

    fn call(
        &self,
        ctx: &ExecutionContext,
        _request: NoArguments,
    ) -> impl Future<Output = ToolReply> + Send {
        ready(start(ctx, ArtifactSelection::All))
    }
}

#[derive(Debug, Deserialize)]
pub struct PatternArguments {
    pub pattern: String,
}

pub struct CompileRegex;

impl Tool for CompileRegex {
    const NAME: &'static str = "artifacts_compile_regex";
    const DESCRIPTION: &'static str = "Compile every artifact whose name matches a regex";
    type Request = PatternArguments;

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regex matched against artifact names" }
            },
            "required": ["pattern"]
        })
    }

    fn call(
        &self,
        ctx: &ExecutionContext,
        request: PatternArguments,
    ) -> impl Future<Output = ToolReply> + Send {
        ready(start(
            ctx,
            ArtifactSelection::Pattern {
                pattern: request.pattern,
            },
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct NameArguments {
    pub name: String,
}

pub struct CompileSingle;

impl Tool for CompileSingle {
    const NAME: &'static str = "artifacts_compile_single";
    const DESCRIPTION: &'static str =
        "Compile one artifact; the name is matched exactly, then case-insensitively, then as a substring";
    type Request = NameArguments;

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Artifact name or part of it" }
            },
            "required": ["name"]
        })
    }

    fn call(
        &self,
        ctx: &ExecutionContext,
        request: NameArguments,
    ) -> impl Future<Output = ToolReply> + Send {
        ready(start(ctx, ArtifactSelection::Single { name: request.name }))
    }
}

pub struct ArtifactsStatus;

impl Tool for ArtifactsStatus {
    const NAME: &'static str = "artifacts_status";
    const DESCRIPTION: &'static str =
        "Report the current or last artifact compilation, with per-item progress while running";
    type Request = NoArguments;

    fn input_schema(&self) -> Value {
        empty_schema()
    }

    fn call(
        &self,
        ctx: &ExecutionContext,
        _request: NoArguments,
    ) -> impl Future<Output = ToolReply> + Send {
        ready(status_reply(&ctx.artifacts().status()))
    }
}
