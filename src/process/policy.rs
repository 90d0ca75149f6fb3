use crate::process::spec::AppSpec;
use std::time::{Duration, SystemTime};

/// Why a supervised process needs a restart decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitEvent {
    /// Process exited on its own with an exit code
    NormalExit(i32),
    /// Process was killed by a signal
    CrashExit(i32),
    /// Supervisor terminated the process for exceeding its memory ceiling
    MemoryExceeded,
    /// Operator asked for the process to stop
    ManualStop,
}

/// Classification attached to a restart decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    CrashExit,
    MemoryExceeded,
    ManualStop,
    Disabled,
}

impl std::fmt::Display for RestartReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartReason::CrashExit => write!(f, "crash-exit"),
            RestartReason::MemoryExceeded => write!(f, "memory-exceeded"),
            RestartReason::ManualStop => write!(f, "manual-stop"),
            RestartReason::Disabled => write!(f, "disabled"),
        }
    }
}

/// Outcome of consulting the restart policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartDecision {
    /// Whether the process should be relaunched
    pub should_restart: bool,
    /// How long to wait before relaunching
    pub delay: Duration,
    /// What kind of event drove the decision
    pub reason: RestartReason,
}

/// Restart policy configuration
///
/// The delay sequence within one crash-loop window is 0, 1s, 2s, 4s, ...
/// capped at `max_backoff`. Restarts older than `window` fall out of the
/// count, so a process that stays up for a full window starts over at a
/// zero delay.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Maximum number of restarts within the window before giving up
    pub max_restarts: usize,
    /// Rolling window for counting restarts
    pub window: Duration,
    /// Delay for the second restart in a window; doubles from there
    pub first_backoff: Duration,
    /// Upper bound on the backoff delay
    pub max_backoff: Duration,
}

impl RestartPolicy {
    /// Create a restart policy with default values
    pub fn new() -> Self {
        Self {
            max_restarts: 15,
            window: Duration::from_secs(60),
            first_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }

    /// Decide whether and when to relaunch after an exit event
    pub fn decide(
        &self,
        event: ExitEvent,
        spec: &AppSpec,
        history: &RestartHistory,
    ) -> RestartDecision {
        if event == ExitEvent::ManualStop {
            return RestartDecision {
                should_restart: false,
                delay: Duration::ZERO,
                reason: RestartReason::ManualStop,
            };
        }

        let reason = match event {
            ExitEvent::MemoryExceeded => RestartReason::MemoryExceeded,
            _ => RestartReason::CrashExit,
        };

        if !spec.auto_restart {
            return RestartDecision {
                should_restart: false,
                delay: Duration::ZERO,
                reason: RestartReason::Disabled,
            };
        }

        // Crash-loop detection: too many restarts within the window
        let recent_restarts = history.count_within(self.window);
        if recent_restarts >= self.max_restarts {
            return RestartDecision {
                should_restart: false,
                delay: Duration::ZERO,
                reason,
            };
        }

        RestartDecision {
            should_restart: true,
            delay: self.backoff_delay(recent_restarts),
            reason,
        }
    }

    /// Calculate the backoff delay given the number of recent restarts
    ///
    /// The first restart in a window goes out immediately; each one after
    /// that doubles the previous delay.
    pub fn backoff_delay(&self, recent_restarts: usize) -> Duration {
        if recent_restarts == 0 {
            return Duration::ZERO;
        }
        let exponent = (recent_restarts - 1).min(u32::MAX as usize) as u32;
        self.first_backoff
            .saturating_mul(2_u32.saturating_pow(exponent))
            .min(self.max_backoff)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Rolling history of restart timestamps for one app
#[derive(Debug, Clone, Default)]
pub struct RestartHistory {
    restart_times: Vec<SystemTime>,
}

impl RestartHistory {
    /// Create an empty history
    pub fn new() -> Self {
        Self {
            restart_times: Vec::new(),
        }
    }

    /// Record a restart at the current time
    pub fn record(&mut self) {
        self.restart_times.push(SystemTime::now());
    }

    /// Count restarts within the given window
    pub fn count_within(&self, window: Duration) -> usize {
        let now = SystemTime::now();
        self.restart_times
            .iter()
            .filter(|&&time| {
                now.duration_since(time)
                    .map(|age| age < window)
                    .unwrap_or(false)
            })
            .count()
    }

    /// Drop records older than the window
    pub fn prune(&mut self, window: Duration) {
        let now = SystemTime::now();
        self.restart_times.retain(|&time| {
            now.duration_since(time)
                .map(|age| age < window)
                .unwrap_or(false)
        });
    }

    /// Forget all recorded restarts
    pub fn clear(&mut self) {
        self.restart_times.clear();
    }
}
