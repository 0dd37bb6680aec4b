//! Several control planes sharing one home directory, and therefore one port
//! registry.

use chrono::Utc;
use hostlink_core::config::{ConfigOverrides, ConfigSource, ExecutorMode};
use hostlink_core::registry::{PortRegistry, RegistryEntry};
use hostlink_server::host::mock::MockHost;
use hostlink_server::{ControlPlane, InitOutcome};
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const WORKSPACE_CONFIG: &str = r#"
[server]
port_range = 5
bind_retry_budget_ms = 0
shutdown_grace_ms = 200
"#;

fn workspace() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(".hostlink.toml"), WORKSPACE_CONFIG).unwrap();
    dir
}

fn plane(home: &Path, workspace: &Path, port: u16) -> ControlPlane {
    let source = ConfigSource {
        overrides: ConfigOverrides {
            port: Some(port),
            executor_mode: Some(ExecutorMode::External),
            ..ConfigOverrides::default()
        },
        workspace_dir: workspace.to_path_buf(),
        home_dir: home.to_path_buf(),
    };
    ControlPlane::new(source, Arc::new(MockHost::new())).unwrap()
}

/// Base of a range that was free a moment ago.
fn free_base() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
        .min(u16::MAX - 10)
}

#[test]
fn test_instances_sharing_a_home_get_disjoint_ports() {
    let home = TempDir::new().unwrap();
    let (ws_a, ws_b) = (workspace(), workspace());
    let base = free_base();

    let mut a = plane(home.path(), ws_a.path(), base);
    let mut b = plane(home.path(), ws_b.path(), base);
    assert_eq!(a.initialize().unwrap(), InitOutcome::Started);
    assert_eq!(b.initialize().unwrap(), InitOutcome::Started);

    let (port_a, port_b) = (a.port().unwrap(), b.port().unwrap());
    assert_ne!(port_a, port_b);
    assert!((base..=base + 5).contains(&port_a));
    assert!((base..=base + 5).contains(&port_b));

    let registry = PortRegistry::in_home(home.path());
    for plane in [&a, &b] {
        let key = plane.instance_key().unwrap();
        let entry = registry.entry_for(key).unwrap().unwrap();
        assert_eq!(Some(entry.port), plane.port());
        assert_eq!(entry.pid, std::process::id());
    }

    a.shutdown();
    assert_eq!(registry.load().unwrap().len(), 1);
    b.shutdown();
    assert!(registry.load().unwrap().is_empty());
}

#[test]
fn test_unregistered_occupied_port_is_skipped() {
    let home = TempDir::new().unwrap();
    let ws = workspace();
    let holder = TcpListener::bind("127.0.0.1:0").unwrap();
    let taken = holder.local_addr().unwrap().port();
    if taken > u16::MAX - 5 {
        return;
    }

    let mut p = plane(home.path(), ws.path(), taken);
    p.initialize().unwrap();
    let port = p.port().unwrap();
    assert_ne!(port, taken);
    assert!((taken + 1..=taken + 5).contains(&port));
    p.shutdown();
}

#[test]
fn test_stale_claim_on_preferred_port_is_reused() {
    let home = TempDir::new().unwrap();
    let ws = workspace();
    let base = free_base();

    let registry = PortRegistry::in_home(home.path());
    std::fs::create_dir_all(registry.path().parent().unwrap()).unwrap();
    let stale = RegistryEntry {
        instance_key: "/gone/workspace".to_string(),
        port: base,
        registered_at: Utc::now(),
        pid: i32::MAX as u32,
    };
    let body = serde_json::json!({ "instances": [stale] });
    std::fs::write(registry.path(), body.to_string()).unwrap();

    let mut p = plane(home.path(), ws.path(), base);
    p.initialize().unwrap();
    assert_eq!(p.port(), Some(base));

    let keys: Vec<String> = registry
        .load()
        .unwrap()
        .into_iter()
        .map(|e| e.instance_key)
        .collect();
    assert_eq!(keys, vec![p.instance_key().unwrap().to_string()]);
    p.shutdown();
}

#[test]
fn test_exhausted_range_fails_initialize() {
    let home = TempDir::new().unwrap();
    let ws = TempDir::new().unwrap();
    std::fs::write(
        ws.path().join(".hostlink.toml"),
        "[server]\nport_range = 0\nbind_retry_budget_ms = 0\n",
    )
    .unwrap();
    let holder = TcpListener::bind("127.0.0.1:0").unwrap();
    let taken = holder.local_addr().unwrap().port();

    let mut p = plane(home.path(), ws.path(), taken);
    let err = p.initialize().unwrap_err();
    assert!(format!("{err:#}").contains("No usable port"), "{err:#}");
    assert!(p.port().is_none());
    assert!(PortRegistry::in_home(home.path()).load().unwrap().is_empty());
}
