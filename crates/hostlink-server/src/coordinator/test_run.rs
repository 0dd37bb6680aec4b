//! Test-run coordinator, the only category that supports cancellation.

use super::{Body, StartError, StartOutcome, launch, start_job};
use crate::context::{ExecutionContext, HostCallError};
use crate::host::{TestFilter, TestRunOutcome, TestRunRequest};
use crate::state::{FailureKind, OperationCategory, OperationRecord, OperationResult};
use regex::Regex;
use tracing::info;

/// Result of a cancellation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// No run is in flight, or the named run is not the running one.
    NothingToCancel { requested: Option<String> },
    /// The host accepted the request. The run has not necessarily stopped.
    Accepted { identifier: String },
    /// The host refused to cancel.
    Rejected { identifier: String },
    /// The host did not answer within the acknowledgement timeout.
    Pending { identifier: String },
}

/// Verdict of the host-thread half of a cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostCancel {
    /// The run ended before the request reached the host thread.
    Finished,
    Accepted,
    Rejected,
}

pub struct TestRunCoordinator<'a> {
    ctx: &'a ExecutionContext,
}

impl<'a> TestRunCoordinator<'a> {
    pub fn new(ctx: &'a ExecutionContext) -> Self {
        Self { ctx }
    }

    /// Start a run. An invalid filter regex is rejected before any state
    /// changes.
    pub fn start(&self, request: TestRunRequest) -> Result<StartOutcome, StartError> {
        if let TestFilter::Regex { pattern } = &request.filter {
            Regex::new(pattern).map_err(|e| {
                StartError::InvalidRequest(format!("Invalid test filter regex '{pattern}': {e}"))
            })?;
        }
        if let TestFilter::Single { test_name } = &request.filter {
            if test_name.trim().is_empty() {
                return Err(StartError::InvalidRequest(
                    "test_name must not be empty".to_string(),
                ));
            }
        }

        let echo = serde_json::to_value(&request).unwrap_or_default();
        let body: Body = Box::new(move |ctx, identifier| {
            let timeout = ctx.operations().test_run_timeout();
            let run_id = identifier.clone();
            start_job(
                ctx,
                OperationCategory::TestRun,
                identifier,
                timeout,
                move |host| host.start_test_run(&run_id, &request),
                Box::new(finish),
            );
        });
        launch(self.ctx, OperationCategory::TestRun, echo, body)
    }

    pub fn status(&self) -> OperationRecord {
        self.ctx.state().test_run.snapshot()
    }

    /// Ask the host to cancel the running test run.
    ///
    /// `identifier` defaults to the running run. The host hook runs on the
    /// host thread; this waits at most `cancel_ack_timeout` for its answer.
    pub async fn cancel(&self, identifier: Option<&str>) -> Result<CancelOutcome, HostCallError> {
        let tracker = &self.ctx.state().test_run;
        let target = match (identifier, tracker.running_identifier()) {
            (requested, None) => {
                return Ok(CancelOutcome::NothingToCancel {
                    requested: requested.map(str::to_string),
                });
            }
            (Some(requested), Some(running)) if requested != running => {
                return Ok(CancelOutcome::NothingToCancel {
                    requested: Some(requested.to_string()),
                });
            }
            (_, Some(running)) => running,
        };

        let timeout = self.ctx.operations().cancel_ack_timeout();
        let run_id = target.clone();
        let reply = self
            .ctx
            .run_on_host(timeout, move |ctx| cancel_on_host(ctx, &run_id))
            .await?;

        Ok(match reply {
            Some(HostCancel::Finished) => CancelOutcome::NothingToCancel {
                requested: identifier.map(str::to_string),
            },
            Some(HostCancel::Accepted) => CancelOutcome::Accepted { identifier: target },
            Some(HostCancel::Rejected) => CancelOutcome::Rejected { identifier: target },
            None => CancelOutcome::Pending { identifier: target },
        })
    }
}

/// Host-thread half of a cancel. A run still waiting for its dependencies
/// has nothing to cancel on the host, so it is failed right here.
fn cancel_on_host(ctx: &ExecutionContext, run_id: &str) -> HostCancel {
    let tracker = &ctx.state().test_run;
    if !tracker.is_current(run_id) {
        return HostCancel::Finished;
    }
    if !tracker.host_started(run_id) {
        info!(run_id, "cancelling test run before it reached the host");
        tracker.fail(
            run_id,
            FailureKind::Cancelled,
            "Test run cancelled before it started",
            None,
        );
        return HostCancel::Accepted;
    }

    let accepted = ctx.host().cancel_test_run(run_id);
    if accepted {
        tracker.mark_cancel_requested(run_id);
    }
    info!(run_id, accepted, "test run cancellation requested");
    if accepted {
        HostCancel::Accepted
    } else {
        HostCancel::Rejected
    }
}

fn finish(ctx: &ExecutionContext, identifier: &str, outcome: TestRunOutcome) {
    let tracker = &ctx.state().test_run;
    let cancelled = outcome.cancelled || tracker.cancel_requested(identifier);
    let summary = outcome.summary;
    let result = OperationResult::TestRun {
        summary: summary.clone(),
        failures: outcome.failures,
        cancelled,
    };

    if cancelled {
        tracker.fail(
            identifier,
            FailureKind::Cancelled,
            "Test run cancelled",
            Some(result),
        );
    } else if !outcome.finished {
        let reason = outcome
            .error
            .unwrap_or_else(|| "test runner stopped unexpectedly".to_string());
        tracker.fail(
            identifier,
            FailureKind::InvocationFailed,
            format!("Test run did not finish: {reason}"),
            Some(result),
        );
    } else {
        info!(
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            "test run finished"
        );
        tracker.complete(identifier, result);
    }
}
