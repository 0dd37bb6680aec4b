//! End-to-end tests: a control plane on a real port, driven over TCP with the
//! blocking client, against the scripted mock host.

use hostlink_core::client::call_tool;
use hostlink_core::config::{ConfigOverrides, ConfigSource, ExecutorMode};
use hostlink_core::protocol::ToolResponse;
use hostlink_server::host::mock::{MockHost, test_outcome};
use hostlink_server::host::BuildOutcome;
use hostlink_server::state::{Diagnostic, FailureKind, OperationState, Progress};
use hostlink_server::{ControlPlane, Health, InitOutcome};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

struct TestPlane {
    plane: ControlPlane,
    host: Arc<MockHost>,
    _home: TempDir,
    _workspace: TempDir,
}

impl TestPlane {
    fn start(host: MockHost, mode: ExecutorMode) -> Self {
        let home = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        std::fs::write(
            workspace.path().join(".hostlink.toml"),
            r#"
[server]
port = 0
port_range = 0
shutdown_grace_ms = 200

[operations]
poll_interval_ms = 0
"#,
        )
        .unwrap();

        let source = ConfigSource {
            overrides: ConfigOverrides {
                executor_mode: Some(mode),
                ..ConfigOverrides::default()
            },
            workspace_dir: workspace.path().to_path_buf(),
            home_dir: home.path().to_path_buf(),
        };
        let host = Arc::new(host);
        let mut plane = ControlPlane::new(source, host.clone()).unwrap();
        assert_eq!(plane.initialize().unwrap(), InitOutcome::Started);

        Self {
            plane,
            host,
            _home: home,
            _workspace: workspace,
        }
    }

    fn port(&self) -> u16 {
        self.plane.port().unwrap()
    }

    fn call(&self, tool: &str, arguments: Value) -> ToolResponse {
        call_tool(self.port(), tool, arguments, CALL_TIMEOUT).unwrap()
    }

    fn tick(&self, times: usize) {
        for _ in 0..times {
            self.plane.tick();
        }
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within 5s");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_build_runs_to_completion_with_host_diagnostics() {
    let t = TestPlane::start(MockHost::new(), ExecutorMode::External);

    let started = t.call("build_trigger", json!({}));
    assert!(started.is_ok(), "{}", started.message);
    let identifier = started.field("identifier").cloned().unwrap();

    let status = t.call("build_status", json!({}));
    assert_eq!(status.field("state").unwrap(), "running");
    assert_eq!(status.field("identifier").unwrap(), &identifier);

    t.tick(1);
    assert_eq!(t.host.calls("start_build"), 1);
    t.host.finish_build(BuildOutcome {
        success: true,
        diagnostics: vec![Diagnostic::warning("unused variable").at("Assets/Player.cs", 12)],
    });
    t.tick(1);

    let status = t.call("build_status", json!({}));
    assert_eq!(status.field("state").unwrap(), "completed");
    let result = status.field("result").unwrap();
    assert_eq!(result["kind"], "build");
    assert_eq!(result["warning_count"], 1);
    assert_eq!(result["diagnostics"][0]["file"], "Assets/Player.cs");
    assert!(status.field("progress").is_none());

    // A finished build does not block the next one.
    let again = t.call("build_trigger", json!({}));
    assert!(again.is_ok());
    assert_ne!(again.field("identifier").unwrap(), &identifier);
}

#[test]
fn test_second_test_run_start_is_rejected() {
    let t = TestPlane::start(MockHost::new(), ExecutorMode::External);

    let first = t.call("tests_run_all", json!({ "test_mode": "PlayMode" }));
    assert!(first.is_ok());
    let identifier = first.field("identifier").cloned().unwrap();
    t.tick(1);

    let second = t.call("tests_run_single", json!({ "test_name": "Net.ClientTests.Connects" }));
    assert!(second.is_warning());
    assert_eq!(
        second.message,
        "Tests are already running. Please wait for current test run to complete."
    );

    let status = t.call("tests_status", json!({}));
    assert_eq!(status.field("identifier").unwrap(), &identifier);
    assert_eq!(status.field("request").unwrap()["mode"], "PlayMode");
    assert_eq!(status.field("run_count").unwrap(), 1);
    t.tick(3);
    assert_eq!(t.host.calls("start_test_run"), 1);

    t.host.finish_test_run(test_outcome(4, 1));
    t.tick(1);
    let record = t.plane.state().test_run.snapshot();
    assert_eq!(record.state, OperationState::Completed);
}

#[test]
fn test_artifact_progress_is_visible_mid_batch() {
    let host = MockHost::new().with_artifacts(&["Shaders/Item1", "Shaders/Item2", "Shaders/Item3"]);
    let t = TestPlane::start(host, ExecutorMode::External);

    assert!(t.call("artifacts_compile_all", json!({})).is_ok());
    // Resolve + label item 1, compile item 1, label item 2.
    t.tick(3);

    let status = t.call("artifacts_status", json!({}));
    assert_eq!(status.field("state").unwrap(), "running");
    assert_eq!(
        status.field("progress").unwrap(),
        &json!({ "completed": 1, "total": 3, "current_item_label": "Shaders/Item2" })
    );
    assert_eq!(t.host.compiled(), vec!["Shaders/Item1".to_string()]);

    t.tick(10);
    let status = t.call("artifacts_status", json!({}));
    assert_eq!(status.field("state").unwrap(), "completed");
    assert!(status.field("progress").is_none());
    assert_eq!(status.field("result").unwrap()["successful"], 3);
    assert_eq!(
        t.plane.state().artifact_batch.snapshot().progress,
        Some(Progress {
            completed: 3,
            total: 3,
            current_item_label: String::new(),
        })
    );
}

#[test]
fn test_cancel_without_running_test_run_warns() {
    let t = TestPlane::start(MockHost::new(), ExecutorMode::External);
    let reply = t.call("tests_cancel", json!({}));
    assert!(reply.is_warning());
    assert_eq!(reply.message, "No test run in progress; nothing to cancel.");
}

#[test]
fn test_accepted_cancel_fails_the_run_as_cancelled() {
    let t = TestPlane::start(MockHost::new(), ExecutorMode::Dedicated);
    let started = t.call("tests_run_all", json!({}));
    let identifier = started.field("identifier").unwrap().as_str().unwrap().to_string();
    wait_until(|| t.host.calls("start_test_run") == 1);

    let reply = t.call("tests_cancel", json!({ "test_run_id": identifier }));
    assert!(reply.is_ok(), "{}", reply.message);
    assert_eq!(t.host.cancel_requests(), vec![identifier.clone()]);

    t.host.finish_test_run(test_outcome(1, 0));
    wait_until(|| !t.plane.state().test_run.is_running());
    let record = t.plane.state().test_run.snapshot();
    assert_eq!(record.state, OperationState::Failed);
    assert_eq!(record.failure, Some(FailureKind::Cancelled));
}

#[test]
fn test_shutdown_twice_releases_listener_once() {
    let mut t = TestPlane::start(MockHost::new(), ExecutorMode::Dedicated);
    let port = t.port();
    assert!(t.call("editor_status", json!({})).is_ok());

    t.plane.shutdown();
    t.plane.shutdown();
    assert_eq!(t.plane.health(), Health::Uninitialized);
    assert!(call_tool(port, "editor_status", json!({}), Duration::from_millis(500)).is_err());
}

#[test]
fn test_crashed_listener_is_rebuilt_and_state_survives() {
    let mut t = TestPlane::start(MockHost::new().immediate(), ExecutorMode::Dedicated);
    assert!(t.call("build_trigger", json!({})).is_ok());
    wait_until(|| t.plane.state().build.snapshot().state == OperationState::Completed);

    t.plane.simulate_listener_crash();
    wait_until(|| !t.plane.health().is_healthy());
    assert!(matches!(
        t.plane.health(),
        Health::Inconsistent {
            listener_alive: false,
            ..
        }
    ));

    assert_eq!(t.plane.initialize().unwrap(), InitOutcome::Restarted);
    assert!(t.plane.health().is_healthy());

    let status = t.call("build_status", json!({}));
    assert_eq!(status.field("state").unwrap(), "completed");
    assert_eq!(status.field("run_count").unwrap(), 1);

    let editor = t.call("editor_status", json!({}));
    assert_eq!(editor.field("initializations").unwrap(), 2);
}

#[test]
fn test_tools_list_over_the_wire() {
    let t = TestPlane::start(MockHost::new(), ExecutorMode::External);
    let listed = t.call("tools_list", Value::Null);
    assert!(listed.is_ok());
    let tools = listed.field("tools").unwrap().as_array().unwrap();
    assert_eq!(tools.len(), 15);
    assert!(tools.iter().any(|t| t["name"] == "artifacts_compile_single"));
}
