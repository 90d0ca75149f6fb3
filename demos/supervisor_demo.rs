use std::time::Duration;
use warden::manager::AppManager;
use warden::process::{AppSpec, RestartPolicy, SupervisorConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    println!("=== Warden Supervisor Demo ===\n");

    let manager = AppManager::with_config(
        SupervisorConfig {
            sample_interval: Duration::from_secs(2),
            stop_grace: Duration::from_secs(2),
        },
        RestartPolicy {
            max_restarts: 3,
            window: Duration::from_secs(60),
            first_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(4),
        },
    );

    // Print lifecycle events as they happen
    let mut events = manager.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("  event: {:?} for '{}'", event.kind, event.app);
        }
    });

    // One app that keeps dying and one that behaves
    let crasher = AppSpec::direct("crasher", "/bin/sh").with_args([
        "-c",
        "echo 'I will crash!'; sleep 1; exit 1",
    ]);
    let stable = AppSpec::direct("stable", "/bin/sleep").with_args(["30"]);

    println!("Registering and starting apps...\n");
    manager.add(crasher).await?;
    manager.add(stable).await?;
    manager.start("crasher").await?;
    manager.start("stable").await?;

    for round in 1..=7 {
        tokio::time::sleep(Duration::from_secs(2)).await;

        println!("--- Status check #{} ---", round);
        for status in manager.statuses().await {
            println!(
                "  {} [{}]: pid={:?}, restarts={}",
                status.name, status.state, status.pid, status.restarts
            );
        }
        println!();
    }

    println!("=== Final Status ===");
    for status in manager.statuses().await {
        println!(
            "  {} [{}]: restarts={}, last_error={:?}",
            status.name, status.state, status.restarts, status.last_error
        );
    }

    println!("\nCleaning up...");
    manager.shutdown().await;

    println!("Demo complete!");
    Ok(())
}
