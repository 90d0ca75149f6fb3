// Integration tests for the supervision loop: restarts, backoff,
// memory ceilings and reload staging against real child processes.

use std::time::Duration;
use tokio::time::timeout;
use warden::events::{EventBus, EventKind};
use warden::process::{
    AppSpec, ResourceMonitor, RestartPolicy, RuntimeState, Supervisor, SupervisorConfig,
};

fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        sample_interval: Duration::from_millis(50),
        stop_grace: Duration::from_secs(2),
    }
}

fn fast_policy(max_restarts: usize) -> RestartPolicy {
    RestartPolicy {
        max_restarts,
        window: Duration::from_secs(60),
        first_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn test_crash_loop_ends_in_failed() {
    let spec = AppSpec::direct("crashy", "/bin/sh").with_args(["-c", "exit 1"]);
    let handle = Supervisor::spawn(spec, fast_config(), fast_policy(3), EventBus::default());

    handle.start().await.unwrap();

    let status = timeout(
        Duration::from_secs(10),
        handle.wait_for(|s| s.state == RuntimeState::Failed),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(status.restarts, 3);
    assert!(status.pid.is_none());
    let error = status.last_error.unwrap();
    assert!(
        error.contains("Restart limit exceeded"),
        "unexpected error: {}",
        error
    );
}

#[tokio::test]
async fn test_clean_exit_restarts_when_auto_restart_enabled() {
    let spec = AppSpec::direct("clean-exit", "/bin/sh").with_args(["-c", "exit 0"]);
    let handle = Supervisor::spawn(spec, fast_config(), fast_policy(100), EventBus::default());

    handle.start().await.unwrap();

    // Exit code 0 still counts as an exit worth restarting
    let status = timeout(
        Duration::from_secs(5),
        handle.wait_for(|s| s.restarts >= 2),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(status.restarts >= 2);

    handle.stop().await.unwrap();
    assert_eq!(handle.status().state, RuntimeState::Stopped);

    // No relaunch sneaks in after the stop
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.status().state, RuntimeState::Stopped);
}

#[tokio::test]
async fn test_auto_restart_disabled_settles_in_stopped() {
    let spec = AppSpec::direct("one-shot", "/bin/sh")
        .with_args(["-c", "exit 1"])
        .with_auto_restart(false);
    let handle = Supervisor::spawn(spec, fast_config(), fast_policy(100), EventBus::default());

    handle.start().await.unwrap();

    let status = timeout(
        Duration::from_secs(5),
        handle.wait_for(|s| s.state == RuntimeState::Stopped),
    )
    .await
    .unwrap()
    .unwrap();

    // A disabled restart is not a failure
    assert_eq!(status.restarts, 0);
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn test_stop_cancels_pending_restart() {
    let policy = RestartPolicy {
        max_restarts: 100,
        window: Duration::from_secs(60),
        first_backoff: Duration::from_secs(30),
        max_backoff: Duration::from_secs(30),
    };
    let spec = AppSpec::direct("backoff-stop", "/bin/sh").with_args(["-c", "exit 1"]);
    let handle = Supervisor::spawn(spec, fast_config(), policy, EventBus::default());

    handle.start().await.unwrap();

    // The first relaunch goes out immediately; the second sits in a 30s
    // backoff, which is where the stop lands
    let status = timeout(
        Duration::from_secs(5),
        handle.wait_for(|s| s.state == RuntimeState::Restarting && s.restarts == 1),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(status.restarts, 1);

    handle.stop().await.unwrap();
    assert_eq!(handle.status().state, RuntimeState::Stopped);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let settled = handle.status();
    assert_eq!(settled.state, RuntimeState::Stopped);
    assert_eq!(settled.restarts, 1);
}

#[tokio::test]
async fn test_restart_provides_fresh_process() {
    let spec = AppSpec::direct("fresh", "/bin/sleep").with_args(["30"]);
    let handle = Supervisor::spawn(
        spec,
        fast_config(),
        RestartPolicy::default(),
        EventBus::default(),
    );

    handle.start().await.unwrap();
    let first = handle
        .wait_for(|s| s.state == RuntimeState::Running)
        .await
        .unwrap();
    let first_pid = first.pid.unwrap();

    handle.restart().await.unwrap();
    let second = handle.status();
    assert_eq!(second.state, RuntimeState::Running);
    assert_eq!(second.restarts, 1);
    let second_pid = second.pid.unwrap();
    assert_ne!(first_pid, second_pid);

    // The old process is dead and reaped before the new one is adopted
    let mut monitor = ResourceMonitor::new();
    assert!(!monitor.is_alive(first_pid));
    assert!(monitor.is_alive(second_pid));

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_memory_ceiling_breach_restarts_process() {
    let bus = EventBus::new(64);
    let mut events = bus.subscribe();

    // A 1-byte ceiling guarantees the first sample breaches it
    let spec = AppSpec::direct("hungry", "/bin/sleep")
        .with_args(["30"])
        .with_memory_ceiling(1);
    let handle = Supervisor::spawn(spec, fast_config(), fast_policy(100), bus);

    handle.start().await.unwrap();
    let first = handle
        .wait_for(|s| s.state == RuntimeState::Running)
        .await
        .unwrap();
    let first_pid = first.pid.unwrap();

    let breach = timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if event.kind == EventKind::CeilingBreached {
                break event;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(breach.app, "hungry");
    assert_eq!(breach.pid, Some(first_pid));
    assert!(breach.rss_bytes.unwrap() > 1);

    // The breach terminates the process and brings up a replacement
    let status = timeout(
        Duration::from_secs(5),
        handle.wait_for(|s| s.restarts >= 1 && s.state == RuntimeState::Running),
    )
    .await
    .unwrap()
    .unwrap();
    assert_ne!(status.pid.unwrap(), first_pid);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_reload_applies_on_next_start() {
    let spec = AppSpec::direct("rolling", "/bin/sleep").with_args(["30"]);
    let handle = Supervisor::spawn(
        spec,
        fast_config(),
        RestartPolicy::default(),
        EventBus::default(),
    );

    handle.start().await.unwrap();
    let before = handle
        .wait_for(|s| s.state == RuntimeState::Running)
        .await
        .unwrap();

    // Staging alone must not disturb the live process
    let next = AppSpec::direct("rolling", "/bin/sh")
        .with_args(["-c", "exit 0"])
        .with_auto_restart(false);
    handle.reload(next).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let during = handle.status();
    assert_eq!(during.state, RuntimeState::Running);
    assert_eq!(during.pid, before.pid);

    // The next start picks up the staged spec, which runs to completion
    // and stays down
    handle.restart().await.unwrap();
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
async fn test_start_after_failure_tries_again() {
    let spec = AppSpec::direct("recoverable", "/bin/sh").with_args(["-c", "exit 1"]);
    let handle = Supervisor::spawn(spec, fast_config(), fast_policy(2), EventBus::default());

    handle.start().await.unwrap();
    let failed = timeout(
        Duration::from_secs(10),
        handle.wait_for(|s| s.state == RuntimeState::Failed),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(failed.restarts, 2);
    assert!(failed.last_error.is_some());

    // Swap in a healthy spec; the manual start forgets the crash loop
    let next = AppSpec::direct("recoverable", "/bin/sleep").with_args(["30"]);
    handle.reload(next).await.unwrap();
    handle.start().await.unwrap();

    let running = handle
        .wait_for(|s| s.state == RuntimeState::Running)
        .await
        .unwrap();
    assert!(running.last_error.is_none());
    assert!(running.pid.is_some());

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_status_carries_memory_samples() {
    let spec = AppSpec::direct("sampled", "/bin/sleep").with_args(["30"]);
    let handle = Supervisor::spawn(
        spec,
        fast_config(),
        RestartPolicy::default(),
        EventBus::default(),
    );

    handle.start().await.unwrap();
    let status = timeout(
        Duration::from_secs(5),
        handle.wait_for(|s| s.last_sample.is_some()),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(status.last_sample.unwrap().rss_bytes > 0);

    handle.stop().await.unwrap();
}
