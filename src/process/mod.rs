// Process module - Core process lifecycle management

pub mod launcher;
pub mod monitor;
pub mod policy;
pub mod spec;
pub mod supervisor;

pub use launcher::{launch, ProcessHandle};
pub use monitor::{ResourceMonitor, ResourceSample};
pub use policy::{ExitEvent, RestartDecision, RestartHistory, RestartPolicy, RestartReason};
pub use spec::{AppSpec, LaunchTarget};
pub use supervisor::{AppStatus, RuntimeState, Supervisor, SupervisorConfig, SupervisorHandle};
