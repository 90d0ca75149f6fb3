//! Lifecycle event bus.
//!
//! [`EventBus`] is a thin wrapper around [`tokio::sync::broadcast`] that lets
//! supervisor loops hand lifecycle events to whoever cares to listen, without
//! knowing who that is. Publishing never blocks and never fails; events are
//! simply dropped when nobody is subscribed.

use crate::process::policy::{ExitEvent, RestartReason};
use crate::process::supervisor::RuntimeState;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;

/// What happened to a supervised app
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The runtime state changed
    StateChanged,
    /// A process came up
    ProcessStarted,
    /// The process exited or was terminated
    ProcessExited,
    /// A launch attempt failed
    LaunchFailed,
    /// A resource sample breached the memory ceiling
    CeilingBreached,
    /// The policy scheduled a relaunch
    RestartScheduled,
    /// The policy decided against relaunching
    RestartAbandoned,
}

/// One lifecycle event, timestamped at creation
#[derive(Debug, Clone)]
pub struct AppEvent {
    /// Name of the app the event belongs to
    pub app: String,
    pub kind: EventKind,
    pub at: SystemTime,
    /// State before the transition, for [`EventKind::StateChanged`]
    pub prior: Option<RuntimeState>,
    /// State after the transition, for [`EventKind::StateChanged`]
    pub state: Option<RuntimeState>,
    pub pid: Option<u32>,
    pub delay: Option<Duration>,
    pub reason: Option<RestartReason>,
    pub exit: Option<ExitEvent>,
    pub rss_bytes: Option<u64>,
    pub error: Option<String>,
}

impl AppEvent {
    pub fn now(app: impl Into<String>, kind: EventKind) -> Self {
        Self {
            app: app.into(),
            kind,
            at: SystemTime::now(),
            prior: None,
            state: None,
            pid: None,
            delay: None,
            reason: None,
            exit: None,
            rss_bytes: None,
            error: None,
        }
    }

    pub fn with_transition(mut self, prior: RuntimeState, state: RuntimeState) -> Self {
        self.prior = Some(prior);
        self.state = Some(state);
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_reason(mut self, reason: RestartReason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn with_exit(mut self, exit: ExitEvent) -> Self {
        self.exit = Some(exit);
        self
    }

    pub fn with_rss(mut self, rss_bytes: u64) -> Self {
        self.rss_bytes = Some(rss_bytes);
        self
    }

    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }
}

/// Default broadcast channel capacity
const DEFAULT_CAPACITY: usize = 256;

/// Broadcast channel for lifecycle events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl EventBus {
    /// Creates a new bus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes an event to all subscribers
    ///
    /// Errors are ignored if there are no active subscribers.
    pub fn publish(&self, event: AppEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribes to the bus and returns a new receiver
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.publish(AppEvent::now("web", EventKind::ProcessStarted));
    }

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(AppEvent::now("web", EventKind::ProcessStarted).with_pid(42));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.app, "web");
        assert_eq!(event.kind, EventKind::ProcessStarted);
        assert_eq!(event.pid, Some(42));
    }

    #[test]
    fn test_event_builders() {
        let event = AppEvent::now("api", EventKind::StateChanged)
            .with_transition(RuntimeState::Starting, RuntimeState::Running)
            .with_delay(Duration::from_secs(2))
            .with_reason(RestartReason::CrashExit)
            .with_exit(ExitEvent::CrashExit(9))
            .with_rss(1024)
            .with_error("boom");

        assert_eq!(event.prior, Some(RuntimeState::Starting));
        assert_eq!(event.state, Some(RuntimeState::Running));
        assert_eq!(event.delay, Some(Duration::from_secs(2)));
        assert_eq!(event.reason, Some(RestartReason::CrashExit));
        assert_eq!(event.exit, Some(ExitEvent::CrashExit(9)));
        assert_eq!(event.rss_bytes, Some(1024));
        assert_eq!(event.error.as_deref(), Some("boom"));
    }
}
