use crate::error::{Result, WardenError};
use crate::events::{AppEvent, EventBus, EventKind};
use crate::process::launcher::{launch, ProcessHandle};
use crate::process::monitor::{ResourceMonitor, ResourceSample};
use crate::process::policy::{ExitEvent, RestartHistory, RestartPolicy, RestartReason};
use crate::process::spec::AppSpec;
use serde::{Deserialize, Serialize};
use std::process::ExitStatus;
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Runtime state of one supervised app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeState {
    Stopped,
    Starting,
    Running,
    Restarting,
    Stopping,
    Failed,
}

impl std::fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeState::Stopped => write!(f, "stopped"),
            RuntimeState::Starting => write!(f, "starting"),
            RuntimeState::Running => write!(f, "running"),
            RuntimeState::Restarting => write!(f, "restarting"),
            RuntimeState::Stopping => write!(f, "stopping"),
            RuntimeState::Failed => write!(f, "failed"),
        }
    }
}

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How often to sample process resources
    pub sample_interval: Duration,
    /// How long a process gets between SIGTERM and SIGKILL
    pub stop_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(5),
            stop_grace: Duration::from_secs(5),
        }
    }
}

/// Point-in-time view of a supervised app
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppStatus {
    /// App name
    pub name: String,
    /// Current runtime state
    pub state: RuntimeState,
    /// OS pid of the live process, if any
    pub pid: Option<u32>,
    /// When the current process came up
    pub started_at: Option<SystemTime>,
    /// Last known resource sample; survives the process it was taken from
    pub last_sample: Option<ResourceSample>,
    /// How many times the app has been relaunched
    pub restarts: u64,
    /// Why the app is Failed, when it is
    pub last_error: Option<String>,
}

/// Operator requests accepted by a supervisor loop
enum Command {
    Start(oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<Result<()>>),
    Restart(oneshot::Sender<Result<()>>),
    Reload(Box<AppSpec>, oneshot::Sender<Result<()>>),
}

/// Client side of one supervisor loop
///
/// Cheap to clone. Commands are serialized through the loop's queue;
/// [`SupervisorHandle::status`] reads a watch channel and never blocks on
/// the loop.
#[derive(Clone)]
pub struct SupervisorHandle {
    name: String,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<AppStatus>,
}

impl SupervisorHandle {
    /// Name of the supervised app
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the loop to launch the process
    ///
    /// A no-op when the app is already running. Starting a Failed app
    /// clears its crash-loop history first.
    pub async fn start(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Start(tx), rx).await
    }

    /// Ask the loop to terminate the process
    ///
    /// Idempotent: stopping a stopped app succeeds. Cancels a pending
    /// restart delay.
    pub async fn stop(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Stop(tx), rx).await
    }

    /// Terminate and immediately relaunch, bypassing any backoff
    pub async fn restart(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Restart(tx), rx).await
    }

    /// Stage a replacement spec; it takes effect on the next (re)start
    pub async fn reload(&self, spec: AppSpec) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(Command::Reload(Box::new(spec), tx), rx).await
    }

    /// Current status, straight from the watch channel
    pub fn status(&self) -> AppStatus {
        self.status.borrow().clone()
    }

    /// Wait until the status matches the predicate
    ///
    /// The current status is checked first, so callers never miss a state
    /// the app is already in.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&AppStatus) -> bool,
    ) -> Result<AppStatus> {
        let mut rx = self.status.clone();
        let status = rx
            .wait_for(|status| predicate(status))
            .await
            .map_err(|_| WardenError::SupervisorGone(self.name.clone()))?;
        Ok(status.clone())
    }

    async fn request(&self, command: Command, rx: oneshot::Receiver<Result<()>>) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| WardenError::SupervisorGone(self.name.clone()))?;
        rx.await
            .map_err(|_| WardenError::SupervisorGone(self.name.clone()))?
    }
}

/// Whether the supervisor loop keeps going after handling a state
enum Flow {
    Continue,
    Shutdown,
}

/// How an interruptible restart delay ended
enum BackoffWait {
    Elapsed,
    Cancelled,
    ChannelClosed,
}

/// Supervisor loop for a single app
///
/// Owns the app's RuntimeState and its ProcessHandle exclusively; every
/// mutation happens inside [`Supervisor::run`], so no two handles for the
/// same app can ever be alive at once.
pub struct Supervisor {
    spec: AppSpec,
    /// Replacement spec staged by reload, applied on the next start
    staged: Option<AppSpec>,
    config: SupervisorConfig,
    policy: RestartPolicy,
    monitor: ResourceMonitor,
    history: RestartHistory,
    commands: mpsc::UnboundedReceiver<Command>,
    status_tx: watch::Sender<AppStatus>,
    events: EventBus,
    state: RuntimeState,
    child: Option<ProcessHandle>,
    /// Exit event carried from Running into Restarting
    pending_exit: Option<ExitEvent>,
    /// Reply channel for the command that triggered the current launch
    pending_ack: Option<oneshot::Sender<Result<()>>>,
    started_at: Option<SystemTime>,
    last_sample: Option<ResourceSample>,
    restarts: u64,
    last_error: Option<String>,
}

impl Supervisor {
    /// Spawn the supervisor task for one app and return its handle
    ///
    /// The app starts out Stopped; call [`SupervisorHandle::start`] to
    /// bring it up. The task ends once every handle has been dropped,
    /// terminating any process still alive.
    pub fn spawn(
        spec: AppSpec,
        config: SupervisorConfig,
        policy: RestartPolicy,
        events: EventBus,
    ) -> SupervisorHandle {
        let name = spec.name.clone();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(AppStatus {
            name: name.clone(),
            state: RuntimeState::Stopped,
            pid: None,
            started_at: None,
            last_sample: None,
            restarts: 0,
            last_error: None,
        });

        let supervisor = Self {
            spec,
            staged: None,
            config,
            policy,
            monitor: ResourceMonitor::new(),
            history: RestartHistory::new(),
            commands: command_rx,
            status_tx,
            events,
            state: RuntimeState::Stopped,
            child: None,
            pending_exit: None,
            pending_ack: None,
            started_at: None,
            last_sample: None,
            restarts: 0,
            last_error: None,
        };
        tokio::spawn(supervisor.run());

        SupervisorHandle {
            name,
            commands: command_tx,
            status: status_rx,
        }
    }

    async fn run(mut self) {
        debug!("Supervisor loop for app '{}' started", self.spec.name);

        loop {
            let flow = match self.state {
                RuntimeState::Stopped | RuntimeState::Failed => self.idle().await,
                RuntimeState::Starting => self.starting().await,
                RuntimeState::Running => self.running().await,
                RuntimeState::Restarting => self.restarting().await,
                // Stopping only exists inside a termination; normalize if
                // the loop ever lands here
                RuntimeState::Stopping => {
                    self.set_state(RuntimeState::Stopped);
                    Flow::Continue
                }
            };
            if matches!(flow, Flow::Shutdown) {
                break;
            }
        }

        // Every handle is gone; take a live child down with the loop
        if self.child.is_some() {
            self.set_state(RuntimeState::Stopping);
            self.terminate_child().await;
            self.set_state(RuntimeState::Stopped);
        }
        debug!("Supervisor loop for app '{}' ended", self.spec.name);
    }

    /// Stopped or Failed: nothing to watch, wait for a command
    async fn idle(&mut self) -> Flow {
        match self.commands.recv().await {
            None => Flow::Shutdown,
            Some(Command::Start(ack)) | Some(Command::Restart(ack)) => {
                if self.state == RuntimeState::Failed {
                    // A manual start is the operator's reset: forget the
                    // crash loop and try fresh
                    self.history.clear();
                    self.last_error = None;
                }
                self.pending_ack = Some(ack);
                self.set_state(RuntimeState::Starting);
                Flow::Continue
            }
            Some(Command::Stop(ack)) => {
                let _ = ack.send(Ok(()));
                Flow::Continue
            }
            Some(Command::Reload(spec, ack)) => {
                let _ = ack.send(self.stage_spec(*spec));
                Flow::Continue
            }
        }
    }

    /// Launch the process, retrying once before giving up
    async fn starting(&mut self) -> Flow {
        if let Some(next) = self.staged.take() {
            info!("App '{}' switching to its staged spec", self.spec.name);
            self.spec = next;
        }

        let launched = match launch(&self.spec).await {
            Ok(handle) => Ok(handle),
            Err(first) => {
                warn!(
                    "Launch attempt for app '{}' failed: {}; retrying once",
                    self.spec.name, first
                );
                self.events.publish(
                    AppEvent::now(&self.spec.name, EventKind::LaunchFailed)
                        .with_error(first.to_string()),
                );
                launch(&self.spec).await
            }
        };

        match launched {
            Ok(handle) => {
                self.adopt(handle);
                self.ack(Ok(()));
            }
            Err(e) => {
                error!("App '{}' failed to launch: {}", self.spec.name, e);
                self.events.publish(
                    AppEvent::now(&self.spec.name, EventKind::LaunchFailed)
                        .with_error(e.to_string()),
                );
                self.last_error = Some(e.to_string());
                self.set_state(RuntimeState::Failed);
                self.ack(Err(e));
            }
        }
        Flow::Continue
    }

    /// Watch the live process: exit, resource ticks, and commands
    async fn running(&mut self) -> Flow {
        let mut ticker = tokio::time::interval(self.config.sample_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; consume it so sampling
        // starts one interval in
        ticker.tick().await;

        enum Wake {
            Exited(std::io::Result<ExitStatus>),
            Tick,
            Command(Option<Command>),
        }

        loop {
            let wake = match self.child.as_mut() {
                Some(handle) => {
                    tokio::select! {
                        result = handle.child.wait() => Wake::Exited(result),
                        _ = ticker.tick() => Wake::Tick,
                        command = self.commands.recv() => Wake::Command(command),
                    }
                }
                None => {
                    // Running without a child cannot normally happen;
                    // recover by treating it as a crash
                    self.begin_restart(ExitEvent::CrashExit(0));
                    return Flow::Continue;
                }
            };

            match wake {
                Wake::Exited(result) => {
                    let exit = self.classify_exit(result);
                    self.child = None;
                    self.started_at = None;
                    info!("Process for app '{}' exited: {:?}", self.spec.name, exit);
                    self.events.publish(
                        AppEvent::now(&self.spec.name, EventKind::ProcessExited).with_exit(exit),
                    );
                    self.begin_restart(exit);
                    return Flow::Continue;
                }
                Wake::Tick => {
                    if self.sample_tick().await {
                        return Flow::Continue;
                    }
                }
                Wake::Command(None) => return Flow::Shutdown,
                Wake::Command(Some(command)) => {
                    if self.command_while_running(command).await {
                        return Flow::Continue;
                    }
                }
            }
        }
    }

    /// Consult the policy, wait out the delay, relaunch or settle
    async fn restarting(&mut self) -> Flow {
        let exit = self.pending_exit.take().unwrap_or(ExitEvent::CrashExit(0));
        let decision = self.policy.decide(exit, &self.spec, &self.history);

        if decision.should_restart {
            info!(
                "App '{}' will restart in {:?} ({})",
                self.spec.name, decision.delay, decision.reason
            );
            self.events.publish(
                AppEvent::now(&self.spec.name, EventKind::RestartScheduled)
                    .with_reason(decision.reason)
                    .with_delay(decision.delay)
                    .with_exit(exit),
            );
            return match self.wait_backoff(decision.delay).await {
                BackoffWait::Elapsed => {
                    self.history.record();
                    self.history.prune(self.policy.window);
                    self.restarts += 1;
                    self.set_state(RuntimeState::Starting);
                    Flow::Continue
                }
                BackoffWait::Cancelled => Flow::Continue,
                BackoffWait::ChannelClosed => Flow::Shutdown,
            };
        }

        self.events.publish(
            AppEvent::now(&self.spec.name, EventKind::RestartAbandoned)
                .with_reason(decision.reason)
                .with_exit(exit),
        );
        match decision.reason {
            RestartReason::ManualStop | RestartReason::Disabled => {
                info!(
                    "App '{}' will stay stopped ({})",
                    self.spec.name, decision.reason
                );
                self.set_state(RuntimeState::Stopped);
            }
            RestartReason::CrashExit | RestartReason::MemoryExceeded => {
                let recent = self.history.count_within(self.policy.window);
                let e = WardenError::RestartLimitExceeded(
                    self.spec.name.clone(),
                    recent,
                    self.policy.window.as_secs(),
                );
                error!("App '{}' is crash looping; giving up: {}", self.spec.name, e);
                self.last_error = Some(e.to_string());
                self.set_state(RuntimeState::Failed);
            }
        }
        Flow::Continue
    }

    /// Sleep out a restart delay, staying responsive to commands
    ///
    /// A stop cancels the relaunch; a start or restart skips the rest of
    /// the delay.
    async fn wait_backoff(&mut self, delay: Duration) -> BackoffWait {
        if delay.is_zero() {
            return BackoffWait::Elapsed;
        }

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return BackoffWait::Elapsed,
                command = self.commands.recv() => match command {
                    None => return BackoffWait::ChannelClosed,
                    Some(Command::Stop(ack)) => {
                        info!(
                            "Stop for app '{}' cancels the pending restart",
                            self.spec.name
                        );
                        self.set_state(RuntimeState::Stopped);
                        let _ = ack.send(Ok(()));
                        return BackoffWait::Cancelled;
                    }
                    Some(Command::Start(ack)) | Some(Command::Restart(ack)) => {
                        self.pending_ack = Some(ack);
                        return BackoffWait::Elapsed;
                    }
                    Some(Command::Reload(spec, ack)) => {
                        let _ = ack.send(self.stage_spec(*spec));
                    }
                }
            }
        }
    }

    /// Handle a command while the process is up; true if the loop left
    /// the Running state
    async fn command_while_running(&mut self, command: Command) -> bool {
        match command {
            Command::Start(ack) => {
                // Already running
                let _ = ack.send(Ok(()));
                false
            }
            Command::Stop(ack) => {
                info!("Stopping app '{}' on request", self.spec.name);
                self.set_state(RuntimeState::Stopping);
                self.terminate_child().await;
                self.set_state(RuntimeState::Stopped);
                let _ = ack.send(Ok(()));
                true
            }
            Command::Restart(ack) => {
                info!("Restarting app '{}' on request", self.spec.name);
                self.set_state(RuntimeState::Stopping);
                self.terminate_child().await;
                self.restarts += 1;
                self.pending_ack = Some(ack);
                self.set_state(RuntimeState::Starting);
                true
            }
            Command::Reload(spec, ack) => {
                let _ = ack.send(self.stage_spec(*spec));
                false
            }
        }
    }

    /// Take a resource sample and enforce the memory ceiling; true if the
    /// loop left the Running state
    async fn sample_tick(&mut self) -> bool {
        let Some(pid) = self.child.as_ref().map(|handle| handle.pid) else {
            return false;
        };

        match self.monitor.sample(pid) {
            Ok(sample) => {
                self.last_sample = Some(sample);
                self.push_status();

                let Some(ceiling) = self.spec.memory_ceiling else {
                    return false;
                };
                if sample.rss_bytes <= ceiling {
                    return false;
                }

                warn!(
                    "App '{}' exceeded its memory ceiling ({} > {} bytes); restarting",
                    self.spec.name, sample.rss_bytes, ceiling
                );
                self.events.publish(
                    AppEvent::now(&self.spec.name, EventKind::CeilingBreached)
                        .with_rss(sample.rss_bytes)
                        .with_pid(pid),
                );
                self.begin_restart(ExitEvent::MemoryExceeded);
                self.terminate_child().await;
                true
            }
            Err(WardenError::ProcessNotFound(_)) => {
                // The pid vanished before the exit notification; reap and
                // classify what the child left behind
                let exit = self.reap_exited().await;
                info!("Process for app '{}' exited: {:?}", self.spec.name, exit);
                self.events.publish(
                    AppEvent::now(&self.spec.name, EventKind::ProcessExited).with_exit(exit),
                );
                self.begin_restart(exit);
                true
            }
            Err(e) => {
                warn!("Resource sample for app '{}' failed: {}", self.spec.name, e);
                false
            }
        }
    }

    /// Record the exit event and move to Restarting
    fn begin_restart(&mut self, exit: ExitEvent) {
        self.pending_exit = Some(exit);
        self.set_state(RuntimeState::Restarting);
    }

    /// Wire up a freshly launched process and move to Running
    fn adopt(&mut self, mut handle: ProcessHandle) {
        self.forward_output(&mut handle);
        info!("App '{}' started (PID: {})", self.spec.name, handle.pid);
        self.events.publish(
            AppEvent::now(&self.spec.name, EventKind::ProcessStarted).with_pid(handle.pid),
        );
        self.started_at = Some(handle.spawned_at);
        self.last_sample = None;
        self.last_error = None;
        self.child = Some(handle);
        self.set_state(RuntimeState::Running);
    }

    /// Forward the child's stdout and stderr into the log stream
    fn forward_output(&self, handle: &mut ProcessHandle) {
        if let Some(stdout) = handle.child.stdout.take() {
            let app = self.spec.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!("[{}] {}", app, line);
                }
            });
        }
        if let Some(stderr) = handle.child.stderr.take() {
            let app = self.spec.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("[{}] {}", app, line);
                }
            });
        }
    }

    /// SIGTERM, grace period, SIGKILL, reap
    async fn terminate_child(&mut self) {
        let Some(mut handle) = self.child.take() else {
            return;
        };
        self.started_at = None;
        let pid = handle.pid;

        info!(
            "Stopping process for app '{}' (PID: {}) with SIGTERM",
            self.spec.name, pid
        );
        if let Err(e) = send_sigterm(&mut handle) {
            warn!(
                "Failed to signal process {} for app '{}': {}",
                pid, self.spec.name, e
            );
        }

        match tokio::time::timeout(self.config.stop_grace, handle.child.wait()).await {
            Ok(Ok(status)) => {
                debug!(
                    "Process for app '{}' exited with status: {:?}",
                    self.spec.name, status
                );
            }
            Ok(Err(e)) => {
                warn!(
                    "Wait failed for process {} of app '{}': {}",
                    pid, self.spec.name, e
                );
            }
            Err(_) => {
                warn!(
                    "Process for app '{}' (PID: {}) did not exit within {:?}, sending SIGKILL",
                    self.spec.name, pid, self.config.stop_grace
                );
                send_sigkill(&mut handle);
            }
        }

        // Reap before dropping the handle so no zombie outlives it
        let _ = handle.child.wait().await;
        info!("Process for app '{}' (PID: {}) stopped", self.spec.name, pid);
        self.push_status();
    }

    /// Reap a child that died without going through terminate
    async fn reap_exited(&mut self) -> ExitEvent {
        match self.child.take() {
            Some(mut handle) => {
                self.started_at = None;
                let result = handle.child.wait().await;
                self.classify_exit(result)
            }
            None => ExitEvent::CrashExit(0),
        }
    }

    /// Map an OS exit status onto an exit event
    fn classify_exit(&self, result: std::io::Result<ExitStatus>) -> ExitEvent {
        match result {
            Ok(status) => match status.code() {
                Some(code) => ExitEvent::NormalExit(code),
                None => {
                    #[cfg(unix)]
                    {
                        use std::os::unix::process::ExitStatusExt;
                        ExitEvent::CrashExit(status.signal().unwrap_or(0))
                    }
                    #[cfg(not(unix))]
                    {
                        ExitEvent::CrashExit(0)
                    }
                }
            },
            Err(e) => {
                warn!("Wait on child of app '{}' failed: {}", self.spec.name, e);
                ExitEvent::CrashExit(0)
            }
        }
    }

    /// Stage a replacement spec for the next start
    fn stage_spec(&mut self, next: AppSpec) -> Result<()> {
        if next.name != self.spec.name {
            return Err(WardenError::SpecNameMismatch(
                next.name,
                self.spec.name.clone(),
            ));
        }
        next.validate()?;
        info!(
            "App '{}' staged a replacement spec; it applies on the next start",
            self.spec.name
        );
        self.staged = Some(next);
        Ok(())
    }

    fn ack(&mut self, result: Result<()>) {
        if let Some(tx) = self.pending_ack.take() {
            let _ = tx.send(result);
        }
    }

    fn set_state(&mut self, next: RuntimeState) {
        if self.state == next {
            return;
        }
        let prior = self.state;
        self.state = next;
        debug!("App '{}' state: {} -> {}", self.spec.name, prior, next);
        self.events.publish(
            AppEvent::now(&self.spec.name, EventKind::StateChanged).with_transition(prior, next),
        );
        self.push_status();
    }

    fn push_status(&self) {
        self.status_tx.send_replace(AppStatus {
            name: self.spec.name.clone(),
            state: self.state,
            pid: self.child.as_ref().map(|handle| handle.pid),
            started_at: self.started_at,
            last_sample: self.last_sample,
            restarts: self.restarts,
            last_error: self.last_error.clone(),
        });
    }
}

#[cfg(unix)]
fn send_sigterm(handle: &mut ProcessHandle) -> std::result::Result<(), String> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;
    signal::kill(Pid::from_raw(handle.pid as i32), Signal::SIGTERM).map_err(|e| e.to_string())
}

#[cfg(not(unix))]
fn send_sigterm(handle: &mut ProcessHandle) -> std::result::Result<(), String> {
    // No SIGTERM off unix; go straight for the kill
    handle.child.start_kill().map_err(|e| e.to_string())
}

fn send_sigkill(handle: &mut ProcessHandle) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;
        let _ = signal::kill(Pid::from_raw(handle.pid as i32), Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    {
        let _ = handle.child.start_kill();
    }
}
