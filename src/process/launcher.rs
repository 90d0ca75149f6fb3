use crate::error::{Result, WardenError};
use crate::process::spec::{AppSpec, LaunchTarget};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::SystemTime;
use tokio::process::{Child, Command};

/// Handle to a live OS process
///
/// Exactly one handle exists per running app; the supervisor that launched
/// it owns the handle until the process is reaped.
#[derive(Debug)]
pub struct ProcessHandle {
    /// The child process
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,

    /// When the process was spawned
    pub spawned_at: SystemTime,
}

/// Launch the process described by an app spec
///
/// Builds a tokio::process::Command from the spec, applying:
/// - The launch target (direct executable or interpreter + script)
/// - Command-line arguments
/// - Working directory
/// - Environment variables, overlaid onto the inherited environment
/// - Stdout/stderr pipe capture
///
/// Relative executable and script paths are resolved against the spec's
/// working directory and must exist; bare names (no path separator) are
/// left to the PATH lookup done by exec.
///
/// # Returns
/// * `Ok(ProcessHandle)` - Successfully launched process
/// * `Err(WardenError)` - Resolution or spawn failure
pub async fn launch(spec: &AppSpec) -> Result<ProcessHandle> {
    let cwd = spec.cwd.as_deref();

    // Build the command from the launch target
    let mut command = match &spec.target {
        LaunchTarget::Direct { program } => {
            let program = resolve_executable(program, cwd)?;
            Command::new(program)
        }
        LaunchTarget::ViaInterpreter {
            interpreter,
            script,
        } => {
            let interpreter = resolve_executable(interpreter, cwd)?;
            let script = resolve_script(script, cwd)?;
            let mut command = Command::new(interpreter);
            command.arg(script);
            command
        }
    };

    // Apply command-line arguments
    if !spec.args.is_empty() {
        command.args(&spec.args);
    }

    // Apply working directory if specified
    if let Some(ref cwd) = spec.cwd {
        command.current_dir(cwd);
    }

    // Overlay environment variables onto the inherited environment
    for (key, value) in &spec.env {
        command.env(key, value);
    }

    // Capture stdout and stderr as pipes so the supervisor can forward them
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    // Spawn the process
    let child = command
        .spawn()
        .map_err(|e| WardenError::SpawnError(spec.name.clone(), e))?;

    // Get the process ID
    let pid = match child.id() {
        Some(pid) => pid,
        None => {
            return Err(WardenError::SpawnError(
                spec.name.clone(),
                std::io::Error::other("process exited before a pid could be read"),
            ));
        }
    };

    Ok(ProcessHandle {
        child,
        pid,
        spawned_at: SystemTime::now(),
    })
}

/// Resolve an executable path against the working directory
///
/// Bare names are returned unchanged so exec's PATH lookup applies.
/// Everything else must exist after resolution.
fn resolve_executable(path: &Path, cwd: Option<&Path>) -> Result<PathBuf> {
    if !path.is_absolute() && path.components().count() == 1 {
        return Ok(path.to_path_buf());
    }

    let resolved = resolve_against_cwd(path, cwd);
    if !resolved.exists() {
        return Err(WardenError::ExecutableNotFound(resolved));
    }
    Ok(resolved)
}

/// Resolve a script path against the working directory
///
/// Scripts never go through PATH lookup, so even bare names are resolved
/// and checked.
fn resolve_script(path: &Path, cwd: Option<&Path>) -> Result<PathBuf> {
    let resolved = resolve_against_cwd(path, cwd);
    if !resolved.exists() {
        return Err(WardenError::ExecutableNotFound(resolved));
    }
    Ok(resolved)
}

fn resolve_against_cwd(path: &Path, cwd: Option<&Path>) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match cwd {
        Some(cwd) => cwd.join(path),
        None => path.to_path_buf(),
    }
}
