//! Index refresh coordinator.

use super::{Body, StartError, StartOutcome, launch, start_job};
use crate::context::ExecutionContext;
use crate::host::{IndexRefreshOutcome, IndexRefreshRequest};
use crate::state::{
    FailureKind, OperationCategory, OperationRecord, OperationResult, Severity,
    operation::count_severity,
};

pub struct IndexCoordinator<'a> {
    ctx: &'a ExecutionContext,
}

impl<'a> IndexCoordinator<'a> {
    pub fn new(ctx: &'a ExecutionContext) -> Self {
        Self { ctx }
    }

    pub fn start(&self, request: IndexRefreshRequest) -> Result<StartOutcome, StartError> {
        let echo = serde_json::to_value(&request).unwrap_or_default();
        let body: Body = Box::new(move |ctx, identifier| {
            let timeout = ctx.operations().index_refresh_timeout();
            start_job(
                ctx,
                OperationCategory::IndexRefresh,
                identifier,
                timeout,
                move |host| host.start_index_refresh(&request),
                Box::new(finish),
            );
        });
        launch(self.ctx, OperationCategory::IndexRefresh, echo, body)
    }

    pub fn status(&self) -> OperationRecord {
        self.ctx.state().index_refresh.snapshot()
    }
}

fn finish(ctx: &ExecutionContext, identifier: &str, outcome: IndexRefreshOutcome) {
    let errors = count_severity(&outcome.diagnostics, Severity::Error);
    let result = OperationResult::IndexRefresh {
        diagnostics: outcome.diagnostics,
        triggered_build: outcome.triggered_build,
    };

    let tracker = &ctx.state().index_refresh;
    if outcome.success {
        tracker.complete(identifier, result);
    } else {
        tracker.fail(
            identifier,
            FailureKind::InvocationFailed,
            format!("Asset refresh failed with {errors} error(s)"),
            Some(result),
        );
    }
}
