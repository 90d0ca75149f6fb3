use crate::error::{Result, WardenError};
use crate::events::{AppEvent, EventBus};
use crate::process::policy::RestartPolicy;
use crate::process::spec::AppSpec;
use crate::process::supervisor::{AppStatus, Supervisor, SupervisorConfig, SupervisorHandle};
use indexmap::IndexMap;
use tokio::sync::{broadcast, RwLock};
use tracing::warn;

/// Registry of supervised apps
///
/// Keeps insertion order so listings read the way the config file was
/// written. The registry lock only guards membership; every per-app
/// operation goes through that app's own supervisor loop, so a slow stop
/// on one app never blocks commands to another.
pub struct AppManager {
    apps: RwLock<IndexMap<String, SupervisorHandle>>,
    config: SupervisorConfig,
    policy: RestartPolicy,
    events: EventBus,
}

impl AppManager {
    /// Create a manager with default supervision settings
    pub fn new() -> Self {
        Self::with_config(SupervisorConfig::default(), RestartPolicy::default())
    }

    /// Create a manager with explicit supervision settings
    pub fn with_config(config: SupervisorConfig, policy: RestartPolicy) -> Self {
        Self {
            apps: RwLock::new(IndexMap::new()),
            config,
            policy,
            events: EventBus::default(),
        }
    }

    /// Register an app without starting it
    pub async fn add(&self, spec: AppSpec) -> Result<SupervisorHandle> {
        spec.validate()?;

        let mut apps = self.apps.write().await;
        if apps.contains_key(&spec.name) {
            return Err(WardenError::AppAlreadyExists(spec.name.clone()));
        }

        let name = spec.name.clone();
        let handle = Supervisor::spawn(
            spec,
            self.config.clone(),
            self.policy.clone(),
            self.events.clone(),
        );
        apps.insert(name, handle.clone());
        Ok(handle)
    }

    /// Stop an app and drop it from the registry
    ///
    /// Deregisters first so no new operation can reach the app, then stops
    /// it through the normal termination path.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let handle = {
            let mut apps = self.apps.write().await;
            apps.shift_remove(name)
                .ok_or_else(|| WardenError::AppNotFound(name.to_string()))?
        };

        if let Err(e) = handle.stop().await {
            warn!("Stop during removal of app '{}' failed: {}", name, e);
        }
        Ok(())
    }

    /// Launch an app
    pub async fn start(&self, name: &str) -> Result<()> {
        self.handle(name).await?.start().await
    }

    /// Stop an app's process, keeping it registered
    pub async fn stop(&self, name: &str) -> Result<()> {
        self.handle(name).await?.stop().await
    }

    /// Restart an app, bypassing any pending restart delay
    pub async fn restart(&self, name: &str) -> Result<()> {
        self.handle(name).await?.restart().await
    }

    /// Stage a replacement spec; it applies on the app's next start
    pub async fn reload(&self, name: &str, spec: AppSpec) -> Result<()> {
        self.handle(name).await?.reload(spec).await
    }

    /// Status of one app
    pub async fn status(&self, name: &str) -> Result<AppStatus> {
        Ok(self.handle(name).await?.status())
    }

    /// Status of every registered app, in registration order
    pub async fn statuses(&self) -> Vec<AppStatus> {
        let apps = self.apps.read().await;
        apps.values().map(|handle| handle.status()).collect()
    }

    /// Handle for one app
    pub async fn handle(&self, name: &str) -> Result<SupervisorHandle> {
        let apps = self.apps.read().await;
        apps.get(name)
            .cloned()
            .ok_or_else(|| WardenError::AppNotFound(name.to_string()))
    }

    /// Subscribe to lifecycle events from every app
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.events.subscribe()
    }

    /// Stop every app, keeping the registry intact
    pub async fn shutdown(&self) {
        let handles: Vec<SupervisorHandle> = {
            let apps = self.apps.read().await;
            apps.values().cloned().collect()
        };
        for handle in handles {
            if let Err(e) = handle.stop().await {
                warn!("Failed to stop app '{}': {}", handle.name(), e);
            }
        }
    }
}

impl Default for AppManager {
    fn default() -> Self {
        Self::new()
    }
}
