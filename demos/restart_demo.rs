// Demonstrates crash-loop handling: the exponential backoff sequence,
// the rolling restart window, and the terminal Failed state.

use std::time::Duration;
use warden::events::{EventBus, EventKind};
use warden::process::{AppSpec, RestartPolicy, RuntimeState, Supervisor, SupervisorConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let bus = EventBus::new(64);
    let mut events = bus.subscribe();

    // Delay progression: 0s, 1s, 2s, 4s, then the limit trips
    let policy = RestartPolicy {
        max_restarts: 4,
        window: Duration::from_secs(60),
        first_backoff: Duration::from_secs(1),
        max_backoff: Duration::from_secs(8),
    };

    let spec = AppSpec::direct("crasher", "/bin/sh").with_args(["-c", "exit 1"]);
    let handle = Supervisor::spawn(spec, SupervisorConfig::default(), policy, bus);

    handle.start().await?;

    while let Ok(event) = events.recv().await {
        match event.kind {
            EventKind::ProcessStarted => {
                println!("started (pid {:?})", event.pid);
            }
            EventKind::ProcessExited => {
                println!("exited: {:?}", event.exit);
            }
            EventKind::RestartScheduled => {
                println!("restart in {:?} ({:?})", event.delay, event.reason);
            }
            EventKind::RestartAbandoned => {
                println!("giving up ({:?})", event.reason);
                break;
            }
            _ => {}
        }
    }

    let status = handle
        .wait_for(|s| s.state == RuntimeState::Failed)
        .await?;
    println!(
        "\nfinal state: {} after {} restarts",
        status.state, status.restarts
    );
    if let Some(error) = status.last_error {
        println!("error: {}", error);
    }

    Ok(())
}
