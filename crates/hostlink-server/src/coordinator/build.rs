//! Build coordinator.

use super::{Body, StartError, StartOutcome, launch, start_job};
use crate::context::ExecutionContext;
use crate::host::{BuildOutcome, BuildRequest};
use crate::state::{
    FailureKind, OperationCategory, OperationRecord, OperationResult, Severity,
    operation::count_severity,
};

pub struct BuildCoordinator<'a> {
    ctx: &'a ExecutionContext,
}

impl<'a> BuildCoordinator<'a> {
    pub fn new(ctx: &'a ExecutionContext) -> Self {
        Self { ctx }
    }

    pub fn start(&self) -> Result<StartOutcome, StartError> {
        let request = BuildRequest::default();
        let echo = serde_json::to_value(&request).unwrap_or_default();
        let body: Body = Box::new(move |ctx, identifier| {
            let timeout = ctx.operations().build_timeout();
            start_job(
                ctx,
                OperationCategory::Build,
                identifier,
                timeout,
                move |host| host.start_build(&request),
                Box::new(finish),
            );
        });
        launch(self.ctx, OperationCategory::Build, echo, body)
    }

    pub fn status(&self) -> OperationRecord {
        self.ctx.state().build.snapshot()
    }
}

fn finish(ctx: &ExecutionContext, identifier: &str, outcome: BuildOutcome) {
    let error_count = count_severity(&outcome.diagnostics, Severity::Error);
    let warning_count = count_severity(&outcome.diagnostics, Severity::Warning);
    let result = OperationResult::Build {
        diagnostics: outcome.diagnostics,
        error_count,
        warning_count,
    };

    let tracker = &ctx.state().build;
    if outcome.success {
        tracker.complete(identifier, result);
    } else {
        tracker.fail(
            identifier,
            FailureKind::InvocationFailed,
            format!("Build failed with {error_count} error(s)"),
            Some(result),
        );
    }
}
