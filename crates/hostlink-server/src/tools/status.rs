//! Shared reply shapes for start and status tools.

use super::ToolReply;
use crate::coordinator::{StartError, StartOutcome};
use crate::state::{OperationCategory, OperationRecord, OperationResult, OperationState};
use serde_json::{Value, json};

/// Reply for a coordinator `start`.
pub(crate) fn start_reply(
    category: OperationCategory,
    outcome: Result<StartOutcome, StartError>,
) -> ToolReply {
    match outcome {
        Ok(StartOutcome::Accepted { identifier }) => {
            ToolReply::ok(format!("{} started", category.label())).with_payload(json!({
                "identifier": identifier,
                "state": OperationState::Running,
            }))
        }
        Ok(StartOutcome::AlreadyRunning { identifier }) => {
            ToolReply::warning(category.already_running_message())
                .with_payload(json!({ "identifier": identifier }))
        }
        Err(StartError::InvalidRequest(message)) => ToolReply::error(message),
        Err(e @ StartError::QueueClosed(_)) => {
            ToolReply::error(format!("{} could not be started: {e}", category.label()))
        }
    }
}

/// Reply for a `*_status` tool.
///
/// Reading the record always succeeds, so a failed run is still reported
/// with status `ok`; the record's `state` and `failure` say what happened.
/// The `progress` object is only present while the run is in flight.
pub(crate) fn status_reply(record: &OperationRecord) -> ToolReply {
    let payload = status_payload(record);
    let label = record.category.label();

    match record.state {
        OperationState::Idle => {
            ToolReply::ok(format!("No {} has been started", record.category.noun()))
                .with_payload(payload)
        }
        OperationState::Running => {
            let mut message = format!(
                "{label} running for {:.1}s",
                record.elapsed_secs().unwrap_or_default()
            );
            if let Some(progress) = &record.progress {
                message.push_str(&format!(" ({}/{}", progress.completed, progress.total));
                if !progress.current_item_label.is_empty() {
                    message.push_str(&format!(": {}", progress.current_item_label));
                }
                message.push(')');
            }
            ToolReply::ok(message).with_payload(payload)
        }
        OperationState::Completed => completed_reply(record).with_payload(payload),
        OperationState::Failed => {
            let reason = record.last_error.as_deref().unwrap_or("no details reported");
            ToolReply::ok(format!("{label} failed: {reason}")).with_payload(payload)
        }
    }
}

fn completed_reply(record: &OperationRecord) -> ToolReply {
    let label = record.category.label();
    match &record.result {
        Some(OperationResult::Build { warning_count, .. }) => ToolReply::ok(format!(
            "{label} completed with {warning_count} warning(s)"
        )),
        Some(OperationResult::TestRun { summary, .. }) => ToolReply::ok(format!(
            "{label} completed: {} passed, {} failed, {} skipped",
            summary.passed, summary.failed, summary.skipped
        )),
        Some(OperationResult::ArtifactBatch { items, .. }) if items.is_empty() => {
            ToolReply::warning("No artifacts matched the selection")
        }
        Some(OperationResult::ArtifactBatch {
            successful,
            other_matches,
            ..
        }) => {
            let mut message = format!("{label} completed: {successful} artifact(s) compiled");
            if !other_matches.is_empty() {
                message.push_str(&format!(
                    "; other matches: {}",
                    other_matches.join(", ")
                ));
            }
            ToolReply::ok(message)
        }
        Some(OperationResult::IndexRefresh {
            triggered_build, ..
        }) if *triggered_build => {
            ToolReply::ok(format!("{label} completed and triggered a build"))
        }
        _ => ToolReply::ok(format!("{label} completed")),
    }
}

fn status_payload(record: &OperationRecord) -> Value {
    let mut payload = serde_json::to_value(record).unwrap_or_else(|_| json!({}));
    if let Some(fields) = payload.as_object_mut() {
        fields.remove("host_started");
        if !record.is_running() {
            fields.remove("progress");
        }
        fields.insert("elapsed_secs".to_string(), json!(record.elapsed_secs()));
    }
    payload
}
