//! Artifact batch coordinator: compiles a selection of host artifacts one
//! per tick, publishing progress as it goes.

use super::{Body, StartError, StartOutcome, launch, requeue};
use crate::context::ExecutionContext;
use crate::host::ArtifactSelection;
use crate::host::hooks::guarded;
use crate::state::{
    ArtifactItemResult, Diagnostic, FailureKind, OperationCategory, OperationRecord,
    OperationResult,
};
use regex::Regex;
use std::time::Instant;
use tracing::debug;

pub struct ArtifactCoordinator<'a> {
    ctx: &'a ExecutionContext,
}

impl<'a> ArtifactCoordinator<'a> {
    pub fn new(ctx: &'a ExecutionContext) -> Self {
        Self { ctx }
    }

    pub fn start(&self, selection: ArtifactSelection) -> Result<StartOutcome, StartError> {
        match &selection {
            ArtifactSelection::Pattern { pattern } => {
                Regex::new(pattern).map_err(|e| {
                    StartError::InvalidRequest(format!("Invalid artifact pattern '{pattern}': {e}"))
                })?;
            }
            ArtifactSelection::Single { name } if name.trim().is_empty() => {
                return Err(StartError::InvalidRequest(
                    "artifact name must not be empty".to_string(),
                ));
            }
            _ => {}
        }

        let echo = serde_json::to_value(&selection).unwrap_or_default();
        let body: Body = Box::new(move |ctx, identifier| begin_batch(ctx, identifier, selection));
        launch(self.ctx, OperationCategory::ArtifactBatch, echo, body)
    }

    pub fn status(&self) -> OperationRecord {
        self.ctx.state().artifact_batch.snapshot()
    }
}

/// Resolve `selection` against the host's artifact names.
///
/// Returns the names to compile plus, for a fuzzy single match, the other
/// candidates that were passed over. Single-name matching tries an exact
/// match, then a case-insensitive exact match, then a case-insensitive
/// substring match; among several substring matches the shortest name wins.
pub fn resolve_selection(
    selection: &ArtifactSelection,
    available: &[String],
) -> Result<(Vec<String>, Vec<String>), String> {
    match selection {
        ArtifactSelection::All => Ok((available.to_vec(), vec![])),
        ArtifactSelection::Pattern { pattern } => {
            let re = Regex::new(pattern).map_err(|e| format!("Invalid artifact pattern: {e}"))?;
            let matched = available.iter().filter(|a| re.is_match(a)).cloned().collect();
            Ok((matched, vec![]))
        }
        ArtifactSelection::Single { name } => {
            if let Some(exact) = available.iter().find(|a| *a == name) {
                return Ok((vec![exact.clone()], vec![]));
            }
            let wanted = name.to_lowercase();
            if let Some(folded) = available.iter().find(|a| a.to_lowercase() == wanted) {
                return Ok((vec![folded.clone()], vec![]));
            }

            let mut partial: Vec<&String> = available
                .iter()
                .filter(|a| a.to_lowercase().contains(&wanted))
                .collect();
            // Stable sort keeps host order among equal lengths.
            partial.sort_by_key(|a| a.len());
            let mut partial = partial.into_iter().cloned();
            match partial.next() {
                Some(best) => Ok((vec![best], partial.collect())),
                None => Err(format!("No artifact matches '{name}'")),
            }
        }
    }
}

fn begin_batch(ctx: ExecutionContext, identifier: String, selection: ArtifactSelection) {
    let tracker = &ctx.state().artifact_batch;
    let host = ctx.host().clone();
    let available = match guarded(|| host.list_artifacts()) {
        Ok(names) => names,
        Err(e) => {
            tracker.fail(
                &identifier,
                FailureKind::StartFailed,
                format!("Artifact compilation failed to start: {e}"),
                None,
            );
            return;
        }
    };
    tracker.mark_host_started(&identifier);

    let (items, other_matches) = match resolve_selection(&selection, &available) {
        Ok(resolved) => resolved,
        Err(message) => {
            tracker.fail(&identifier, FailureKind::InvocationFailed, message, None);
            return;
        }
    };

    let total = u32::try_from(items.len()).unwrap_or(u32::MAX);
    tracker.begin_progress(&identifier, total);
    debug!(total, selection = selection.kind(), "artifact batch resolved");

    Batch {
        ctx: ctx.clone(),
        identifier,
        selection: selection.kind(),
        items,
        other_matches,
        next: 0,
        results: Vec::new(),
    }
    .label_next();
}

struct Batch {
    ctx: ExecutionContext,
    identifier: String,
    selection: &'static str,
    items: Vec<String>,
    other_matches: Vec<String>,
    next: usize,
    results: Vec<ArtifactItemResult>,
}

impl Batch {
    fn is_current(&self) -> bool {
        self.ctx
            .state()
            .artifact_batch
            .is_current(&self.identifier)
    }

    /// Publish the label of the next item, or finish when none are left.
    fn label_next(self) {
        if !self.is_current() {
            return;
        }
        let Some(name) = self.items.get(self.next) else {
            self.finish();
            return;
        };
        self.ctx
            .state()
            .artifact_batch
            .set_current_item(&self.identifier, name);
        let ctx = self.ctx.clone();
        requeue(&ctx, move || self.compile_next());
    }

    fn compile_next(mut self) {
        if !self.is_current() {
            return;
        }
        let Some(name) = self.items.get(self.next).cloned() else {
            self.finish();
            return;
        };

        let host = self.ctx.host().clone();
        let started = Instant::now();
        let item = match guarded(|| host.compile_artifact(&name)) {
            Ok(outcome) => ArtifactItemResult {
                name,
                success: outcome.success,
                diagnostics: outcome.diagnostics,
                duration_ms: started.elapsed().as_millis() as u64,
            },
            Err(e) => ArtifactItemResult {
                diagnostics: vec![Diagnostic::error(e.to_string())],
                name,
                success: false,
                duration_ms: started.elapsed().as_millis() as u64,
            },
        };
        self.results.push(item);
        self.next += 1;
        self.ctx
            .state()
            .artifact_batch
            .item_done(&self.identifier);

        let ctx = self.ctx.clone();
        requeue(&ctx, move || self.label_next());
    }

    fn finish(self) {
        let failed = self.results.iter().filter(|r| !r.success).count();
        let total = self.results.len();
        let result = OperationResult::ArtifactBatch {
            selection: self.selection.to_string(),
            successful: total - failed,
            failed,
            items: self.results,
            other_matches: self.other_matches,
        };

        let tracker = &self.ctx.state().artifact_batch;
        if failed == 0 {
            tracker.complete(&self.identifier, result);
        } else {
            tracker.fail(
                &self.identifier,
                FailureKind::InvocationFailed,
                format!("{failed} of {total} artifact(s) failed to compile"),
                Some(result),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::Harness;
    use crate::host::mock::MockHost;
    use crate::state::{OperationState, Progress};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn single(name: &str) -> ArtifactSelection {
        ArtifactSelection::Single { name: name.into() }
    }

    #[test]
    fn test_fuzzy_single_prefers_exact_then_folded_then_shortest_substring() {
        let available = names(&["Custom/Water", "Custom/WaterDeep", "custom/water", "Hidden/Blit"]);

        assert_eq!(
            resolve_selection(&single("custom/water"), &available).unwrap(),
            (names(&["custom/water"]), vec![])
        );
        assert_eq!(
            resolve_selection(&single("HIDDEN/BLIT"), &available).unwrap(),
            (names(&["Hidden/Blit"]), vec![])
        );

        let available = names(&["Custom/WaterDeep", "Custom/Water2", "Hidden/Blit"]);
        let (picked, others) = resolve_selection(&single("water"), &available).unwrap();
        assert_eq!(picked, names(&["Custom/Water2"]));
        assert_eq!(others, names(&["Custom/WaterDeep"]));

        assert!(resolve_selection(&single("lava"), &available).is_err());
    }

    #[test]
    fn test_pattern_selection() {
        let available = names(&["Custom/Water", "Custom/Terrain", "Hidden/Blit"]);
        let (picked, _) = resolve_selection(
            &ArtifactSelection::Pattern {
                pattern: "^Custom/".into(),
            },
            &available,
        )
        .unwrap();
        assert_eq!(picked, names(&["Custom/Water", "Custom/Terrain"]));
    }

    #[test]
    fn test_progress_is_observable_mid_batch() {
        let h = Harness::new(MockHost::new().with_artifacts(&["A", "B", "C"]));
        h.ctx.artifacts().start(ArtifactSelection::All).unwrap();

        // Resolve and label "A".
        h.tick();
        assert_eq!(
            h.ctx.artifacts().status().progress,
            Some(Progress {
                completed: 0,
                total: 3,
                current_item_label: "A".into()
            })
        );
        // Compile "A", then label "B".
        h.tick();
        h.tick();
        assert_eq!(
            h.ctx.artifacts().status().progress,
            Some(Progress {
                completed: 1,
                total: 3,
                current_item_label: "B".into()
            })
        );
        assert_eq!(h.host.compiled(), names(&["A"]));

        h.settle();
        let record = h.ctx.artifacts().status();
        assert_eq!(record.state, OperationState::Completed);
        assert_eq!(
            record.progress,
            Some(Progress {
                completed: 3,
                total: 3,
                current_item_label: String::new()
            })
        );
        assert_eq!(h.host.compiled(), names(&["A", "B", "C"]));
    }

    #[test]
    fn test_progress_never_decreases() {
        let artifacts: Vec<String> = (0..25).map(|i| format!("Shader{i}")).collect();
        let refs: Vec<&str> = artifacts.iter().map(String::as_str).collect();
        let h = Harness::new(MockHost::new().with_artifacts(&refs));
        h.ctx.artifacts().start(ArtifactSelection::All).unwrap();

        let mut last = 0;
        for _ in 0..200 {
            h.tick();
            let record = h.ctx.artifacts().status();
            if let Some(progress) = &record.progress {
                assert!(progress.completed >= last);
                assert!(progress.completed <= progress.total);
                last = progress.completed;
            }
            if !record.is_running() {
                break;
            }
        }
        assert_eq!(last, 25);
    }

    #[test]
    fn test_failed_item_fails_batch_but_compiles_the_rest() {
        let h = Harness::new(MockHost::new().with_artifacts(&["A", "B", "C"]));
        h.host.fail_artifact("B");
        h.ctx.artifacts().start(ArtifactSelection::All).unwrap();
        h.settle();

        let record = h.ctx.artifacts().status();
        assert_eq!(record.state, OperationState::Failed);
        assert_eq!(record.failure, Some(FailureKind::InvocationFailed));
        assert_eq!(
            record.last_error.as_deref(),
            Some("1 of 3 artifact(s) failed to compile")
        );
        let Some(OperationResult::ArtifactBatch { successful, failed, items, .. }) = record.result
        else {
            panic!("missing batch result");
        };
        assert_eq!((successful, failed), (2, 1));
        assert!(!items[1].success);
    }

    #[test]
    fn test_zero_matches_completes_empty() {
        let h = Harness::new(MockHost::new().with_artifacts(&["A"]));
        h.ctx
            .artifacts()
            .start(ArtifactSelection::Pattern {
                pattern: "^Z".into(),
            })
            .unwrap();
        h.settle();
        let record = h.ctx.artifacts().status();
        assert_eq!(record.state, OperationState::Completed);
        assert_eq!(record.progress.unwrap().total, 0);
        assert!(h.host.compiled().is_empty());
    }

    #[test]
    fn test_unknown_single_name_fails_run_and_bad_pattern_is_rejected() {
        let h = Harness::new(MockHost::new().with_artifacts(&["Custom/Water"]));
        h.ctx.artifacts().start(single("lava")).unwrap();
        h.settle();
        let record = h.ctx.artifacts().status();
        assert_eq!(record.failure, Some(FailureKind::InvocationFailed));
        assert_eq!(record.last_error.as_deref(), Some("No artifact matches 'lava'"));

        let rejected = h.ctx.artifacts().start(ArtifactSelection::Pattern {
            pattern: "(".into(),
        });
        assert!(matches!(rejected, Err(StartError::InvalidRequest(_))));
        assert_eq!(h.ctx.artifacts().status().run_count, 1);
    }
}
