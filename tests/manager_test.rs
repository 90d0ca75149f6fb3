// End-to-end lifecycle through the app registry

use std::fs;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;
use warden::config::load_specs;
use warden::error::WardenError;
use warden::manager::AppManager;
use warden::process::{AppSpec, ResourceMonitor, RuntimeState};

fn sleeper(name: &str) -> AppSpec {
    AppSpec::direct(name, "/bin/sleep").with_args(["30"])
}

#[tokio::test]
async fn test_manager_full_lifecycle() {
    let manager = AppManager::new();
    manager.add(sleeper("web")).await.unwrap();

    manager.start("web").await.unwrap();
    let handle = manager.handle("web").await.unwrap();
    let running = handle
        .wait_for(|s| s.state == RuntimeState::Running)
        .await
        .unwrap();
    let first_pid = running.pid.unwrap();

    manager.stop("web").await.unwrap();
    let stopped = manager.status("web").await.unwrap();
    assert_eq!(stopped.state, RuntimeState::Stopped);
    assert!(stopped.pid.is_none());

    // Stopped apps stay registered and can come back up
    manager.start("web").await.unwrap();
    let running = handle
        .wait_for(|s| s.state == RuntimeState::Running)
        .await
        .unwrap();
    assert_ne!(running.pid.unwrap(), first_pid);

    manager.remove("web").await.unwrap();
    assert!(matches!(
        manager.status("web").await,
        Err(WardenError::AppNotFound(_))
    ));
}

#[tokio::test]
async fn test_shutdown_stops_every_app() {
    let manager = AppManager::new();
    for name in ["one", "two", "three"] {
        manager.add(sleeper(name)).await.unwrap();
        manager.start(name).await.unwrap();
    }

    for name in ["one", "two", "three"] {
        let handle = manager.handle(name).await.unwrap();
        timeout(
            Duration::from_secs(5),
            handle.wait_for(|s| s.state == RuntimeState::Running),
        )
        .await
        .unwrap()
        .unwrap();
    }

    manager.shutdown().await;

    // Everything is down but the registry is intact
    let statuses = manager.statuses().await;
    assert_eq!(statuses.len(), 3);
    for status in statuses {
        assert_eq!(status.state, RuntimeState::Stopped);
    }
}

#[tokio::test]
async fn test_remove_kills_the_process() {
    let manager = AppManager::new();
    manager.add(sleeper("doomed")).await.unwrap();
    manager.start("doomed").await.unwrap();

    let handle = manager.handle("doomed").await.unwrap();
    let running = handle
        .wait_for(|s| s.state == RuntimeState::Running)
        .await
        .unwrap();
    let pid = running.pid.unwrap();

    manager.remove("doomed").await.unwrap();

    let mut monitor = ResourceMonitor::new();
    assert!(!monitor.is_alive(pid));
}

#[tokio::test]
async fn test_reload_through_manager() {
    let manager = AppManager::new();
    manager.add(sleeper("svc")).await.unwrap();
    manager.start("svc").await.unwrap();

    let handle = manager.handle("svc").await.unwrap();
    handle
        .wait_for(|s| s.state == RuntimeState::Running)
        .await
        .unwrap();

    let next = AppSpec::direct("svc", "/bin/sh")
        .with_args(["-c", "exit 0"])
        .with_auto_restart(false);
    manager.reload("svc", next).await.unwrap();
    manager.restart("svc").await.unwrap();

    // The replacement spec exits cleanly and stays down
    let settled = timeout(
        Duration::from_secs(5),
        handle.wait_for(|s| s.state == RuntimeState::Stopped),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(settled.restarts, 1);
}

#[tokio::test]
async fn test_config_file_to_running_apps() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("apps.toml");

    let toml_content = r#"
        [[apps]]
        name = "first"
        script = "/bin/sleep"
        args = ["30"]

        [[apps]]
        name = "second"
        script = "/bin/sleep"
        args = ["30"]
    "#;
    fs::write(&config_path, toml_content).unwrap();

    let specs = load_specs(&config_path).unwrap();
    assert_eq!(specs.len(), 2);

    let manager = AppManager::new();
    for spec in specs {
        let name = spec.name.clone();
        manager.add(spec).await.unwrap();
        manager.start(&name).await.unwrap();
    }

    let names: Vec<String> = manager
        .statuses()
        .await
        .into_iter()
        .map(|status| status.name)
        .collect();
    assert_eq!(names, vec!["first", "second"]);

    for name in ["first", "second"] {
        let handle = manager.handle(name).await.unwrap();
        let status = timeout(
            Duration::from_secs(5),
            handle.wait_for(|s| s.state == RuntimeState::Running),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(status.pid.is_some());
    }

    manager.shutdown().await;
}
