use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the Warden supervisor
#[derive(Debug, Error)]
pub enum WardenError {
    // Launch errors
    #[error("Executable not found: {}", .0.display())]
    ExecutableNotFound(PathBuf),

    #[error("Failed to spawn process for app '{0}': {1}")]
    SpawnError(String, #[source] std::io::Error),

    // Monitoring errors
    #[error("Process not found: {0}")]
    ProcessNotFound(u32),

    // Restart policy errors
    #[error("Restart limit exceeded for app '{0}': {1} restarts within {2}s")]
    RestartLimitExceeded(String, usize, u64),

    // Registry errors
    #[error("App not found: {0}")]
    AppNotFound(String),

    #[error("App already exists: {0}")]
    AppAlreadyExists(String),

    #[error("Replacement spec is named '{0}' but the app is named '{1}'")]
    SpecNameMismatch(String, String),

    #[error("Supervisor for app '{0}' is no longer running")]
    SupervisorGone(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),
}

/// Result type alias for Warden operations
pub type Result<T> = std::result::Result<T, WardenError>;
