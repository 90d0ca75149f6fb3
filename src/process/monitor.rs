use crate::error::{Result, WardenError};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use sysinfo::{Pid, ProcessRefreshKind, System};

/// One resident-memory reading for a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    /// When the sample was taken
    pub at: SystemTime,

    /// Resident set size in bytes
    pub rss_bytes: u64,
}

/// Collects resource usage for supervised processes
///
/// Each supervisor loop owns its own monitor, so sampling never needs a
/// lock.
pub struct ResourceMonitor {
    /// System information collector
    system: System,
}

impl ResourceMonitor {
    /// Create a new resource monitor
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Take a memory sample for the given pid
    ///
    /// # Returns
    /// * `Ok(ResourceSample)` - The process exists and was sampled
    /// * `Err(ProcessNotFound)` - The OS no longer knows the pid
    pub fn sample(&mut self, pid: u32) -> Result<ResourceSample> {
        let sys_pid = Pid::from_u32(pid);

        // Refresh specific process information
        self.system.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::everything(),
        );

        match self.system.process(sys_pid) {
            Some(process) => Ok(ResourceSample {
                at: SystemTime::now(),
                rss_bytes: process.memory(),
            }),
            // Process not found in the system - it has exited
            None => Err(WardenError::ProcessNotFound(pid)),
        }
    }

    /// Check if a process is still alive in the system
    pub fn is_alive(&mut self, pid: u32) -> bool {
        self.sample(pid).is_ok()
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::process::Command;

    #[test]
    fn test_sample_own_process() {
        let mut monitor = ResourceMonitor::new();

        let sample = monitor.sample(std::process::id()).unwrap();
        assert!(sample.rss_bytes > 0);
    }

    #[tokio::test]
    async fn test_sample_live_child() {
        let mut monitor = ResourceMonitor::new();

        let mut child = Command::new("/bin/sleep")
            .arg("5")
            .spawn()
            .expect("Failed to spawn process");
        let pid = child.id().expect("Failed to get PID");

        let sample = monitor.sample(pid).unwrap();
        assert!(sample.rss_bytes > 0);

        child.kill().await.expect("Failed to kill process");
        let _ = child.wait().await;
    }

    #[tokio::test]
    async fn test_sample_dead_process() {
        let mut monitor = ResourceMonitor::new();

        let mut child = Command::new("/bin/sleep")
            .arg("5")
            .spawn()
            .expect("Failed to spawn process");
        let pid = child.id().expect("Failed to get PID");

        assert!(monitor.is_alive(pid));

        child.kill().await.expect("Failed to kill process");
        let _ = child.wait().await;

        // Give system time to update
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        match monitor.sample(pid) {
            Err(WardenError::ProcessNotFound(p)) => assert_eq!(p, pid),
            other => panic!("Expected ProcessNotFound, got {:?}", other),
        }
        assert!(!monitor.is_alive(pid));
    }
}
