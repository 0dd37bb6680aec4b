use super::traits::{NoArguments, Tool, ToolReply, empty_schema};
use crate::context::ExecutionContext;
use crate::host::hooks::guarded;
use crate::state::OperationCategory;
use serde_json::{Value, json};
use std::future::{Future, ready};

pub struct EditorStatus;

impl Tool for EditorStatus {
    const NAME: &'static str = "editor_status";
    const DESCRIPTION: &'static str =
        "Report host session flags, executor liveness and which operations are running";
    type Request = NoArguments;

    fn input_schema(&self) -> Value {
        empty_schema()
    }

    fn call(
        &self,
        ctx: &ExecutionContext,
        _request: NoArguments,
    ) -> impl Future<Output = ToolReply> + Send {
        let editor = ctx.state().editor.snapshot();
        let running: Vec<OperationCategory> = OperationCategory::ALL
            .into_iter()
            .filter(|category| ctx.state().tracker(*category).is_running())
            .collect();

        let mut payload = serde_json::to_value(&editor).unwrap_or_else(|_| json!({}));
        if let Some(fields) = payload.as_object_mut() {
            fields.insert("instance".to_string(), json!(ctx.instance()));
            fields.insert("queue_depth".to_string(), json!(ctx.queue().len()));
            fields.insert("running".to_string(), json!(running));
        }

        let message = if editor.host.is_playing {
            "Editor is in play mode"
        } else {
            "Editor is in edit mode"
        };
        ready(ToolReply::ok(message).with_payload(payload))
    }
}

pub struct ExitPlayMode;

impl Tool for ExitPlayMode {
    const NAME: &'static str = "editor_exit_play_mode";
    const DESCRIPTION: &'static str = "Leave play mode if the editor is in it";
    type Request = NoArguments;

    fn input_schema(&self) -> Value {
        empty_schema()
    }

    fn call(
        &self,
        ctx: &ExecutionContext,
        _request: NoArguments,
    ) -> impl Future<Output = ToolReply> + Send {
        async move {
            let timeout = ctx.operations().cancel_ack_timeout();
            let reply = ctx
                .run_on_host(timeout, |ctx| guarded(|| ctx.host().exit_play_mode()))
                .await;
            match reply {
                Ok(Some(Ok(true))) => ToolReply::ok("Exited play mode"),
                Ok(Some(Ok(false))) => ToolReply::warning("Editor is not in play mode"),
                Ok(Some(Err(e))) => ToolReply::error(format!("Failed to exit play mode: {e}")),
                Ok(None) => ToolReply::warning(
                    "Exit from play mode requested; the host has not answered yet",
                ),
                Err(e) => ToolReply::error(format!("Failed to exit play mode: {e}")),
            }
        }
    }
}
